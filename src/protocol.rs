//! Wire protocol: control messages (UTF-8 JSON text frames) and the
//! `FileMetadata` they carry. Chunk bytes themselves are raw binary
//! frames, routed by the receiver to whichever upload is currently being
//! received — there is no per-chunk envelope.

use serde::{Deserialize, Serialize};

/// Current protocol version. Carried in every `FileMetadata` so future
/// incompatible changes can be detected rather than silently
/// misinterpreted.
pub const PROTOCOL_VERSION: u32 = 2;

/// Minimum chunk size accepted from a remote offer.
pub const MIN_CHUNK_SIZE: u64 = 16 * 1024;

/// The on-wire description of one file, immutable for the lifetime of an
/// `uploadId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Equal to `upload_id`, kept for backward-compatible readers that
    /// key off `id` rather than `uploadId`.
    pub id: String,
    /// Stable across reconnects; the resume key.
    pub upload_id: String,
    pub protocol_version: u32,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// A structured error payload carried by `transfer-error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferErrorPayload {
    pub code: String,
    pub message: String,
}

/// A control frame exchanged over the text side of the channel.
///
/// Unknown `type` values fail to deserialize; the caller should treat
/// that as a `transfer_control_message_parse_error` event rather than a
/// fatal error, per the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    /// sender -> receiver: initiates a transfer.
    FileOffer { metadata: FileMetadata },
    /// receiver -> sender: unblocks the sender, conveys the resume point.
    ReceiverReady {
        file_id: String,
        upload_id: String,
        resume_from_chunk: u64,
    },
    /// sender -> receiver: signals the final chunk; triggers finalize.
    TransferComplete {
        file_id: String,
        upload_id: String,
        checksum: String,
    },
    /// receiver -> sender: demands a re-send from `from_chunk`.
    RequestRetransmit {
        file_id: String,
        upload_id: String,
        from_chunk: u64,
        reason: String,
    },
    /// either direction: fatal for this transfer.
    TransferError {
        file_id: String,
        error: TransferErrorPayload,
    },
}

impl ControlMessage {
    /// Serializes this message as a single-line JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a text frame, returning `None` (rather than erroring) on an
    /// unrecognized `type`, matching the wire contract's "ignored with a
    /// parse-error event" rule.
    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

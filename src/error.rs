//! # Error Handling
//!
//! Transfer errors are organized by the taxonomy in the transfer-engine
//! design: **validation** errors reject a malformed offer outright,
//! **transport-transient** errors are recoverable and drive the sender's
//! auto-resume loop, **integrity** errors are resolved via retransmit
//! without ever reaching a user-visible callback, **resource** errors are
//! fatal for the current transfer, and **policy** errors are fatal and
//! non-negotiable.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           ERROR TAXONOMY                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Validation         (reject, never retry)                           │
//! │  │   ├── InvalidFileId                                              │
//! │  │   ├── InvalidMetadata                                            │
//! │  │   └── InvalidChunkSequence                                       │
//! │  │                                                                  │
//! │  Transport-transient (recoverable, auto-resume loops)               │
//! │  │   ├── TransferTimeout                                            │
//! │  │   ├── ReceiverNotReady                                           │
//! │  │   ├── DataChannelNotReady                                        │
//! │  │   ├── DataChannelSendFailed                                      │
//! │  │   └── AutoResumeTimeout                                          │
//! │  │                                                                  │
//! │  Integrity           (resolved via retransmit, not user-visible)    │
//! │  │   ├── ChecksumMismatch                                           │
//! │  │   └── ReceiverBufferExhausted                                    │
//! │  │                                                                  │
//! │  Resource            (fatal for this transfer, surfaced both ends)  │
//! │  │   ├── ChunkPersistFailed                                         │
//! │  │   └── SourceFileChanged                                          │
//! │  │                                                                  │
//! │  Policy              (fatal, non-negotiable)                        │
//! │      ├── MessageTooLarge                                            │
//! │      └── RetransmitNotSupported                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for transfer-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the transfer engine.
///
/// Every variant carries a stable `code()` string matching the wire-level
/// error codes in the control-message taxonomy, so a `transfer-error`
/// frame's `error.code` round-trips onto the same `Error` variant on either
/// end.
#[derive(Error, Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    /// A `file-offer` carried an empty or malformed `uploadId`/`id`.
    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    /// A `file-offer` failed metadata validation (chunk size too small,
    /// negative size, etc).
    #[error("invalid file metadata: {0}")]
    InvalidMetadata(String),

    /// A chunk arrived out of the order the wire protocol guarantees.
    #[error("invalid chunk sequence: {0}")]
    InvalidChunkSequence(String),

    /// A control frame could not be parsed as JSON, or had an unknown
    /// `type`.
    #[error("could not parse transfer control message: {0}")]
    TransferControlParseError(String),

    // ------------------------------------------------------------------
    // Transport-transient (recoverable)
    // ------------------------------------------------------------------
    /// The sender did not observe `receiver-ready` within the timeout.
    #[error("transfer timed out waiting for {0}")]
    TransferTimeout(String),

    /// A chunk or control frame arrived for a transfer the receiver has
    /// not accepted yet.
    #[error("receiver is not ready for upload {0}")]
    ReceiverNotReady(String),

    /// The data channel is not open.
    #[error("data channel is not ready")]
    DataChannelNotReady,

    /// A `send` call on the transport failed.
    #[error("data channel send failed: {0}")]
    DataChannelSendFailed(String),

    /// The outer auto-resume loop exceeded `AUTO_RESUME_MAX_WAIT_MS`
    /// without completing the transfer.
    #[error("auto-resume exceeded its deadline for upload {0}")]
    AutoResumeTimeout(String),

    // ------------------------------------------------------------------
    // Integrity (resolved via retransmit)
    // ------------------------------------------------------------------
    /// The finalized file's checksum did not match the sender's.
    #[error("checksum mismatch for upload {0}")]
    ChecksumMismatch(String),

    /// The receiver's in-memory buffer guard tripped before the store
    /// could absorb backlog.
    #[error("receiver buffer exhausted for upload {0}")]
    ReceiverBufferExhausted(String),

    // ------------------------------------------------------------------
    // Resource (fatal for this transfer)
    // ------------------------------------------------------------------
    /// Writing a chunk or session record to the persistent store failed.
    #[error("failed to persist chunk data: {0}")]
    ChunkPersistFailed(String),

    /// The source file's fingerprint changed between offer and a later
    /// read (retransmit or completion re-hash).
    #[error("source file changed during transfer of {0}")]
    SourceFileChanged(String),

    // ------------------------------------------------------------------
    // Policy (fatal, non-negotiable)
    // ------------------------------------------------------------------
    /// A chunk (or control frame) exceeded the transport's
    /// `maxMessageSize`.
    #[error("message of {actual} bytes exceeds the transport limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the message that was rejected.
        actual: usize,
        /// The transport's maximum message size.
        limit: usize,
    },

    /// A retransmit was requested for an upload with no retained runtime
    /// session to serve it from.
    #[error("retransmit not supported for upload {0}")]
    RetransmitNotSupported(String),

    // ------------------------------------------------------------------
    // Internal / conversions
    // ------------------------------------------------------------------
    /// The persistent store returned a backend-specific failure.
    #[error("store error: {0}")]
    Store(String),

    /// Serialization or deserialization of a control message failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An I/O operation (streaming sink, temp file) failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl Error {
    /// Returns the wire-level machine code for this error, matching the
    /// codes named in the control-message error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidFileId(_) => "INVALID_FILE_ID",
            Error::InvalidMetadata(_) => "INVALID_METADATA",
            Error::InvalidChunkSequence(_) => "INVALID_CHUNK_SEQUENCE",
            Error::TransferControlParseError(_) => "TRANSFER_CONTROL_PARSE_ERROR",
            Error::TransferTimeout(_) => "TRANSFER_TIMEOUT",
            Error::ReceiverNotReady(_) => "RECEIVER_NOT_READY",
            Error::DataChannelNotReady => "DATA_CHANNEL_NOT_READY",
            Error::DataChannelSendFailed(_) => "DATA_CHANNEL_SEND_FAILED",
            Error::AutoResumeTimeout(_) => "AUTO_RESUME_TIMEOUT",
            Error::ChecksumMismatch(_) => "CHECKSUM_MISMATCH",
            Error::ReceiverBufferExhausted(_) => "RECEIVER_BUFFER_EXHAUSTED",
            Error::ChunkPersistFailed(_) => "CHUNK_PERSIST_FAILED",
            Error::SourceFileChanged(_) => "SOURCE_FILE_CHANGED",
            Error::MessageTooLarge { .. } => "MESSAGE_TOO_LARGE",
            Error::RetransmitNotSupported(_) => "RETRANSMIT_NOT_SUPPORTED",
            Error::Store(_) => "STORE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error is transport-transient and should drive the
    /// sender's auto-resume loop rather than fail the transfer outright.
    ///
    /// Mirrors `isRecoverableSendInterruption`: recoverable errors never
    /// leave the engine as a user-visible failure on their own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DataChannelNotReady
                | Error::DataChannelSendFailed(_)
                | Error::TransferTimeout(_)
                | Error::ReceiverNotReady(_)
        )
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_taxonomy() {
        assert_eq!(Error::InvalidFileId("x".into()).code(), "INVALID_FILE_ID");
        assert_eq!(
            Error::MessageTooLarge { actual: 10, limit: 5 }.code(),
            "MESSAGE_TOO_LARGE"
        );
        assert_eq!(Error::DataChannelNotReady.code(), "DATA_CHANNEL_NOT_READY");
    }

    #[test]
    fn transport_transient_errors_are_recoverable() {
        assert!(Error::DataChannelNotReady.is_recoverable());
        assert!(Error::DataChannelSendFailed("closed".into()).is_recoverable());
        assert!(Error::TransferTimeout("up1".into()).is_recoverable());
        assert!(Error::ReceiverNotReady("up1".into()).is_recoverable());
    }

    #[test]
    fn policy_and_integrity_errors_are_not_recoverable() {
        assert!(!Error::MessageTooLarge { actual: 1, limit: 1 }.is_recoverable());
        assert!(!Error::ChecksumMismatch("up1".into()).is_recoverable());
        assert!(!Error::ChunkPersistFailed("disk full".into()).is_recoverable());
    }
}

//! Receiver flow (C7): accepts an offer, ingests chunks through a
//! per-file write queue (here, simply the sequential order frames are
//! processed in — a single task drains one transport, so ingestion is
//! already serialized without an explicit queue), and finalizes or
//! requests retransmission.

use serde_json::json;

use crate::engine::{TransferEngine, SinkFactory, MEMORY_GUARD_THRESHOLD_BYTES};
use crate::error::{Error, Result};
use crate::finalize::{finalize, FinalizeError};
use crate::integrity::{calculate_total_chunks, hash_bytes};
use crate::protocol::{ControlMessage, FileMetadata, TransferErrorPayload, MIN_CHUNK_SIZE};
use crate::store::{PersistedChunk, PersistedSession, SessionDirection, TransferStatus};
use crate::transport::Transport;

/// Runtime state for one incoming transfer.
#[derive(Debug)]
pub struct IncomingRuntimeSession {
    pub upload_id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub received_chunks: u64,
    pub chunk_checksums: Vec<Option<String>>,
    pub last_reported_percent: u8,
}

impl IncomingRuntimeSession {
    fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        ((self.received_chunks * 100) / self.total_chunks).min(100) as u8
    }
}

/// What the caller should do after a control message was handled.
pub enum ReceiverAction {
    /// Nothing further required right now.
    None,
    /// Send a `request-retransmit` frame for this upload.
    RequestRetransmit { from_chunk: u64, reason: String },
    /// The file finished reassembling and verifying successfully.
    Completed(crate::finalize::FinalizedFile),
}

/// Validates and accepts a `file-offer`, persisting a fresh or resumed
/// `incoming` session and returning the `receiver-ready` reply to send.
pub async fn handle_file_offer<T: Transport>(
    engine: &TransferEngine<'_, T>,
    metadata: &FileMetadata,
) -> Result<(IncomingRuntimeSession, ControlMessage)> {
    let upload_id = if metadata.upload_id.is_empty() {
        metadata.id.clone()
    } else {
        metadata.upload_id.clone()
    };
    if upload_id.is_empty() {
        return Err(Error::InvalidFileId("empty upload id".to_string()));
    }
    if metadata.chunk_size < MIN_CHUNK_SIZE {
        return Err(Error::InvalidMetadata(format!(
            "chunk size {} below minimum {}",
            metadata.chunk_size, MIN_CHUNK_SIZE
        )));
    }

    let total_chunks = calculate_total_chunks(metadata.size, metadata.chunk_size);
    let session_key = PersistedSession::session_key_for(SessionDirection::Incoming, &upload_id);
    let existing = engine.store.get_session(&session_key).await?;

    let resume_from_chunk = match existing {
        Some(existing)
            if existing.size == metadata.size
                && existing.chunk_size == metadata.chunk_size
                && existing.total_chunks == total_chunks
                && existing.status != TransferStatus::Completed =>
        {
            let contiguous = engine
                .store
                .get_contiguous_chunk_count(&upload_id, total_chunks)
                .await?;
            existing.next_chunk_index.min(contiguous)
        }
        Some(_) => {
            engine.store.delete_upload(&upload_id).await?;
            0
        }
        None => 0,
    };

    if metadata.size > MEMORY_GUARD_THRESHOLD_BYTES {
        engine.events.emit(
            "transfer_memory_guard_warning",
            json!({"uploadId": upload_id, "sizeBytes": metadata.size}),
        );
    }

    let now = engine.clock.now_millis();
    let record = PersistedSession {
        session_key,
        direction: SessionDirection::Incoming,
        status: TransferStatus::Active,
        upload_id: upload_id.clone(),
        protocol_version: metadata.protocol_version,
        name: metadata.name.clone(),
        size: metadata.size,
        mime_type: metadata.mime_type.clone(),
        chunk_size: metadata.chunk_size,
        total_chunks,
        next_chunk_index: resume_from_chunk,
        bytes_transferred: resume_from_chunk * metadata.chunk_size,
        remote_peer_id: engine.remote_peer_id.clone(),
        fingerprint: metadata.fingerprint.clone(),
        file_checksum: None,
        created_at: now,
        updated_at: now,
    };
    engine.store.put_session(&record).await?;

    engine.events.emit(
        "transfer_offer_received",
        json!({"uploadId": upload_id, "resumeFromChunk": resume_from_chunk}),
    );
    if resume_from_chunk > 0 {
        engine.events.emit(
            "transfer_resume_negotiated",
            json!({"uploadId": upload_id, "startChunk": resume_from_chunk}),
        );
    }

    let reply = ControlMessage::ReceiverReady {
        file_id: upload_id.clone(),
        upload_id: upload_id.clone(),
        resume_from_chunk,
    };

    let mut chunk_checksums = vec![None; total_chunks as usize];
    for i in 0..resume_from_chunk.min(total_chunks) {
        if let Some(chunk) = engine.store.get_chunk(&upload_id, i).await? {
            chunk_checksums[i as usize] = Some(chunk.checksum);
        }
    }

    Ok((
        IncomingRuntimeSession {
            upload_id,
            name: metadata.name.clone(),
            size: metadata.size,
            mime_type: metadata.mime_type.clone(),
            chunk_size: metadata.chunk_size,
            total_chunks,
            received_chunks: resume_from_chunk,
            chunk_checksums,
            last_reported_percent: 0,
        },
        reply,
    ))
}

/// Ingests one binary chunk frame bound to `session`.
pub async fn handle_chunk<T: Transport>(
    engine: &TransferEngine<'_, T>,
    session: &mut IncomingRuntimeSession,
    bytes: &[u8],
) -> Result<()> {
    if session.received_chunks >= session.total_chunks {
        return Ok(());
    }

    let index = session.received_chunks;
    let checksum = hash_bytes(bytes);

    let now = engine.clock.now_millis();
    engine
        .store
        .put_chunk(&PersistedChunk {
            upload_id: session.upload_id.clone(),
            chunk_index: index,
            data: bytes.to_vec(),
            checksum: checksum.clone(),
            updated_at: now,
        })
        .await
        .map_err(|_| Error::ChunkPersistFailed(session.upload_id.clone()))?;

    session.chunk_checksums[index as usize] = Some(checksum);
    session.received_chunks += 1;

    let bytes_transferred = ((index + 1) * session.chunk_size).min(session.size);
    let record = PersistedSession {
        session_key: PersistedSession::session_key_for(SessionDirection::Incoming, &session.upload_id),
        direction: SessionDirection::Incoming,
        status: TransferStatus::Active,
        upload_id: session.upload_id.clone(),
        protocol_version: crate::protocol::PROTOCOL_VERSION,
        name: session.name.clone(),
        size: session.size,
        mime_type: session.mime_type.clone(),
        chunk_size: session.chunk_size,
        total_chunks: session.total_chunks,
        next_chunk_index: session.received_chunks,
        bytes_transferred,
        remote_peer_id: engine.remote_peer_id.clone(),
        fingerprint: None,
        file_checksum: None,
        created_at: now,
        updated_at: now,
    };
    engine.store.put_session(&record).await?;

    let percent = session.progress_percent();
    if percent != session.last_reported_percent || session.received_chunks == session.total_chunks {
        session.last_reported_percent = percent;
        engine.events.emit(
            "transfer_receive_progress",
            json!({"uploadId": session.upload_id, "percent": percent}),
        );
    }
    Ok(())
}

/// Handles `transfer-complete`: finalizes the file, or produces a
/// `request-retransmit` action if the receiver's store disagrees with
/// the sender's claim.
pub async fn handle_transfer_complete<T: Transport>(
    engine: &TransferEngine<'_, T>,
    session: &IncomingRuntimeSession,
    expected_checksum: &str,
    sink_factory: &SinkFactory,
) -> Result<ReceiverAction> {
    let sink = sink_factory().map_err(Error::from)?;
    match finalize(
        &*engine.store,
        &session.upload_id,
        session.total_chunks,
        Some(expected_checksum),
        sink,
    )
    .await
    {
        Ok(outcome) => {
            engine.store.delete_upload(&session.upload_id).await?;
            engine.events.emit(
                "transfer_receive_complete",
                json!({"uploadId": session.upload_id, "checksum": outcome.file_checksum}),
            );
            Ok(ReceiverAction::Completed(outcome.file))
        }
        Err(FinalizeError::MissingChunk(_)) => {
            let contiguous = engine
                .store
                .get_contiguous_chunk_count(&session.upload_id, session.total_chunks)
                .await?;
            Ok(ReceiverAction::RequestRetransmit {
                from_chunk: contiguous,
                reason: "missing_chunks".to_string(),
            })
        }
        Err(FinalizeError::ChecksumMismatch { .. }) => Ok(ReceiverAction::RequestRetransmit {
            from_chunk: 0,
            reason: "CHECKSUM_MISMATCH".to_string(),
        }),
        Err(FinalizeError::Io(message)) => Err(Error::ChunkPersistFailed(message)),
    }
}

/// Applies a `request-retransmit` issued against an incoming transfer:
/// rewinds local bookkeeping and deletes chunks at/after `from_chunk` so
/// the resent bytes cleanly replace whatever was there.
pub async fn reset_for_retransmit<T: Transport>(
    engine: &TransferEngine<'_, T>,
    session: &mut IncomingRuntimeSession,
    from_chunk: u64,
) -> Result<()> {
    session.received_chunks = from_chunk.min(session.total_chunks);
    session.chunk_checksums.truncate(session.received_chunks as usize);
    session
        .chunk_checksums
        .resize(session.total_chunks as usize, None);
    engine.store.delete_chunks_from(&session.upload_id, session.received_chunks).await
}

/// Builds the `transfer-error` frame for a fatal error on this upload.
pub fn error_message(upload_id: &str, err: &Error) -> ControlMessage {
    ControlMessage::TransferError {
        file_id: upload_id.to_string(),
        error: TransferErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    }
}

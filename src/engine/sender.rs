//! Sender flow (C6): `send_file` drives one file through offer,
//! negotiation, streaming, and finish, retrying the whole sequence under
//! an outer auto-resume deadline whenever a transport-transient error
//! interrupts it.

use std::time::Duration;

use serde_json::json;

use crate::engine::{
    FileSource, TransferEngine, AUTO_RESUME_MAX_WAIT_MS, AUTO_RESUME_POLL_INTERVAL_MS,
    RECEIVER_READY_TIMEOUT_MS,
};
use crate::error::{Error, Result};
use crate::integrity::{
    calculate_total_chunks, derive_file_checksum, fingerprint, hash_bytes, normalize_chunk_index,
};
use crate::protocol::{ControlMessage, FileMetadata, PROTOCOL_VERSION};
use crate::store::{PersistedSession, SessionDirection, TransferStatus};
use crate::transport::{IncomingFrame, Transport};

/// Runtime state for one outgoing transfer, kept across auto-resume
/// attempts so a reconnect mid-stream doesn't lose in-memory checksums.
pub struct OutgoingRuntimeSession {
    pub upload_id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub next_chunk_index: u64,
    pub chunk_checksums: Vec<Option<String>>,
    pub fingerprint: String,
    pub last_reported_percent: u8,
    /// Number of times this transfer had to wait on the backpressure
    /// arbiter, reported in `transfer_send_complete` so callers can judge
    /// whether the link was bottlenecked.
    pub backpressure_events: u64,
    /// The transport message-size ceiling resolved for this transfer
    /// (override or transport-reported), if any.
    pub message_limit_bytes: Option<u64>,
}

impl OutgoingRuntimeSession {
    fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        ((self.next_chunk_index * 100) / self.total_chunks).min(100) as u8
    }
}

fn generate_upload_id(fingerprint: &str, now_millis: i64) -> String {
    hash_bytes(format!("{fingerprint}|{now_millis}").as_bytes())[..32].to_string()
}

/// Sends `source` to the peer, looping under `AUTO_RESUME_MAX_WAIT_MS`
/// whenever a recoverable (transport-transient) error interrupts the
/// stream.
pub async fn send_file<T: Transport>(
    engine: &mut TransferEngine<'_, T>,
    source: &dyn FileSource,
) -> Result<()> {
    let deadline = engine.clock.now_millis() + AUTO_RESUME_MAX_WAIT_MS as i64;
    let fp = fingerprint(
        source.name(),
        source.size(),
        source.mime_type(),
        source.last_modified_millis(),
    );

    loop {
        match run_one_attempt(engine, source, &fp).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_recoverable() => {
                engine.events.emit(
                    "transfer_auto_resume_attempt",
                    json!({"fingerprint": fp, "error": err.code()}),
                );
                let remaining = deadline - engine.clock.now_millis();
                if remaining <= 0 {
                    return Err(Error::AutoResumeTimeout(fp));
                }
                wait_for_channel_ready(engine, remaining as u64).await?;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn wait_for_channel_ready<T: Transport>(
    engine: &TransferEngine<'_, T>,
    remaining_ms: u64,
) -> Result<()> {
    let deadline = engine.clock.now_millis() + remaining_ms as i64;
    loop {
        if !engine.transport.is_closed() {
            return Ok(());
        }
        if engine.clock.now_millis() >= deadline {
            return Err(Error::DataChannelNotReady);
        }
        tokio::time::sleep(Duration::from_millis(AUTO_RESUME_POLL_INTERVAL_MS)).await;
    }
}

async fn run_one_attempt<T: Transport>(
    engine: &mut TransferEngine<'_, T>,
    source: &dyn FileSource,
    fp: &str,
) -> Result<()> {
    let mut session = select_session(engine, source, fp).await?;

    offer_and_await_ready(engine, &mut session).await?;
    let next_chunk_index = session.next_chunk_index;
    stream_chunks(engine, source, &mut session, next_chunk_index).await?;
    finish(engine, source, &mut session).await
}

async fn select_session<T: Transport>(
    engine: &mut TransferEngine<'_, T>,
    source: &dyn FileSource,
    fp: &str,
) -> Result<OutgoingRuntimeSession> {
    let existing = engine
        .store
        .find_outgoing_session_by_fingerprint(fp, engine.remote_peer_id.as_deref())
        .await?;

    let (upload_id, existing_chunk_size, local_resume_chunk) = match existing {
        Some(session) if session.size == source.size() && session.status != TransferStatus::Completed => {
            (session.upload_id, Some(session.chunk_size), session.next_chunk_index)
        }
        _ => (generate_upload_id(fp, engine.clock.now_millis()), None, 0),
    };

    let message_limit_bytes = engine
        .overrides
        .force_max_message_size
        .or_else(|| engine.transport.max_message_size());

    // A resumed session keeps the chunk size it was originally offered
    // with; only a fresh transfer consults the planner.
    let chunk_size = match existing_chunk_size {
        Some(size) => size,
        None => {
            let rtt = engine.overrides.force_rtt_ms;
            engine.planner.plan(rtt, message_limit_bytes).chunk_size
        }
    };
    let total_chunks = calculate_total_chunks(source.size(), chunk_size);

    Ok(OutgoingRuntimeSession {
        upload_id,
        name: source.name().to_string(),
        size: source.size(),
        mime_type: source.mime_type().to_string(),
        chunk_size,
        total_chunks,
        next_chunk_index: local_resume_chunk.min(total_chunks),
        chunk_checksums: vec![None; total_chunks as usize],
        fingerprint: fp.to_string(),
        last_reported_percent: 0,
        backpressure_events: 0,
        message_limit_bytes,
    })
}

async fn offer_and_await_ready<T: Transport>(
    engine: &mut TransferEngine<'_, T>,
    session: &mut OutgoingRuntimeSession,
) -> Result<()> {
    let metadata = FileMetadata {
        id: session.upload_id.clone(),
        upload_id: session.upload_id.clone(),
        protocol_version: PROTOCOL_VERSION,
        name: session.name.clone(),
        size: session.size,
        mime_type: session.mime_type.clone(),
        chunk_size: session.chunk_size,
        total_chunks: session.total_chunks,
        file_checksum: None,
        fingerprint: Some(session.fingerprint.clone()),
    };

    let offer = ControlMessage::FileOffer { metadata };
    let json = offer.to_json().map_err(Error::from)?;
    engine.transport.send_text(&json).await?;

    let wait = async {
        loop {
            match engine.transport.recv().await {
                Some(IncomingFrame::Text(text)) => {
                    if let Some(ControlMessage::ReceiverReady {
                        upload_id,
                        resume_from_chunk,
                        ..
                    }) = ControlMessage::from_json(&text)
                    {
                        if upload_id == session.upload_id {
                            return Ok(resume_from_chunk);
                        }
                    }
                }
                Some(IncomingFrame::Binary(_)) => continue,
                None => return Err(Error::DataChannelNotReady),
            }
        }
    };

    let remote_resume_chunk = tokio::time::timeout(
        Duration::from_millis(RECEIVER_READY_TIMEOUT_MS),
        wait,
    )
    .await
    .map_err(|_| Error::TransferTimeout(session.upload_id.clone()))??;

    let start = normalize_chunk_index(
        session.next_chunk_index.max(remote_resume_chunk) as f64,
        session.total_chunks,
    );
    session.next_chunk_index = start;

    if start > 0 {
        engine.events.emit(
            "transfer_resume_negotiated",
            json!({"uploadId": session.upload_id, "startChunk": start}),
        );
    }
    Ok(())
}

/// Re-derives `source`'s fingerprint and compares it against the one
/// recorded at offer time, catching the case where the underlying file
/// was replaced or modified mid-transfer (e.g. across an auto-resume
/// gap) rather than silently streaming bytes that no longer match what
/// the receiver was told to expect.
fn verify_source_unchanged(source: &dyn FileSource, session: &OutgoingRuntimeSession) -> Result<()> {
    let current = fingerprint(
        source.name(),
        source.size(),
        source.mime_type(),
        source.last_modified_millis(),
    );
    if current != session.fingerprint {
        return Err(Error::SourceFileChanged(session.upload_id.clone()));
    }
    Ok(())
}

async fn stream_chunks<T: Transport>(
    engine: &mut TransferEngine<'_, T>,
    source: &dyn FileSource,
    session: &mut OutgoingRuntimeSession,
    start_chunk: u64,
) -> Result<()> {
    verify_source_unchanged(source, session)?;

    let max_message_size = engine
        .overrides
        .force_max_message_size
        .or_else(|| engine.transport.max_message_size());

    for index in start_chunk..session.total_chunks {
        let start = index * session.chunk_size;
        let end = (start + session.chunk_size).min(session.size);
        let bytes = source.read_range(start, end).map_err(Error::from)?;

        if let Some(limit) = max_message_size {
            if bytes.len() as u64 > limit {
                return Err(Error::MessageTooLarge {
                    actual: bytes.len(),
                    limit: limit as usize,
                });
            }
        }

        let wait_threshold = engine.backpressure.wait_threshold();
        if engine.transport.buffered_amount() > wait_threshold {
            engine.backpressure.wait(&*engine.transport).await?;
            session.backpressure_events += 1;
            if engine.backpressure.take_mode_active_event() {
                engine.events.emit("backpressure_mode_active", json!({}));
            }
        }

        engine
            .transport
            .send_binary(&bytes)
            .await
            .map_err(|_| Error::DataChannelSendFailed(session.upload_id.clone()))?;

        let checksum = hash_bytes(&bytes);
        session.chunk_checksums[index as usize] = Some(checksum);
        session.next_chunk_index = index + 1;

        persist(engine, session, TransferStatus::Active, end).await?;

        let percent = session.progress_percent();
        if percent != session.last_reported_percent || session.next_chunk_index == session.total_chunks {
            session.last_reported_percent = percent;
            engine.events.emit(
                "transfer_send_progress",
                json!({"uploadId": session.upload_id, "percent": percent}),
            );
        }
    }
    Ok(())
}

async fn finish<T: Transport>(
    engine: &mut TransferEngine<'_, T>,
    source: &dyn FileSource,
    session: &mut OutgoingRuntimeSession,
) -> Result<()> {
    verify_source_unchanged(source, session)?;

    let mut checksums = Vec::with_capacity(session.chunk_checksums.len());
    for (index, checksum) in session.chunk_checksums.iter().enumerate() {
        match checksum {
            Some(c) => checksums.push(c.clone()),
            None => {
                let start = index as u64 * session.chunk_size;
                let end = (start + session.chunk_size).min(session.size);
                let bytes = source.read_range(start, end).map_err(Error::from)?;
                checksums.push(hash_bytes(&bytes));
            }
        }
    }
    let file_checksum = derive_file_checksum(&checksums);

    let complete = ControlMessage::TransferComplete {
        file_id: session.upload_id.clone(),
        upload_id: session.upload_id.clone(),
        checksum: file_checksum.clone(),
    };
    engine
        .transport
        .send_text(&complete.to_json().map_err(Error::from)?)
        .await?;

    persist(engine, session, TransferStatus::Completed, session.size).await?;
    engine.events.emit(
        "transfer_send_complete",
        json!({
            "uploadId": session.upload_id,
            "fileSizeBytes": session.size,
            "totalChunks": session.total_chunks,
            "checksum": file_checksum,
            "backpressureEvents": session.backpressure_events,
            "chunkSizeUsed": session.chunk_size,
            "messageLimitBytes": session.message_limit_bytes,
        }),
    );
    Ok(())
}

async fn persist<T: Transport>(
    engine: &TransferEngine<'_, T>,
    session: &OutgoingRuntimeSession,
    status: TransferStatus,
    bytes_transferred: u64,
) -> Result<()> {
    let now = engine.clock.now_millis();
    let record = PersistedSession {
        session_key: PersistedSession::session_key_for(SessionDirection::Outgoing, &session.upload_id),
        direction: SessionDirection::Outgoing,
        status,
        upload_id: session.upload_id.clone(),
        protocol_version: PROTOCOL_VERSION,
        name: session.name.clone(),
        size: session.size,
        mime_type: session.mime_type.clone(),
        chunk_size: session.chunk_size,
        total_chunks: session.total_chunks,
        next_chunk_index: session.next_chunk_index,
        bytes_transferred,
        remote_peer_id: engine.remote_peer_id.clone(),
        fingerprint: Some(session.fingerprint.clone()),
        file_checksum: None,
        created_at: now,
        updated_at: now,
    };
    engine.store.put_session(&record).await
}

/// Retransmit service: re-streams `[normalize(from_chunk), total_chunks)`
/// with the same backpressure discipline, then resends
/// `transfer-complete`. Returns `RETRANSMIT_NOT_SUPPORTED` if the caller
/// has no retained runtime session for `upload_id` (handled by the
/// caller, which only invokes this with a session it already holds).
pub async fn handle_retransmit_request<T: Transport>(
    engine: &mut TransferEngine<'_, T>,
    source: &dyn FileSource,
    session: &mut OutgoingRuntimeSession,
    from_chunk: u64,
) -> Result<()> {
    let start = normalize_chunk_index(from_chunk as f64, session.total_chunks);
    session.next_chunk_index = start;
    stream_chunks(engine, source, session, start).await?;
    finish(engine, source, session).await
}

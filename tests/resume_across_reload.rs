//! Simulates a sender reload: a prior process persisted an `outgoing`
//! session partway through a transfer and then vanished. A fresh engine
//! sharing the same store resumes from the persisted `nextChunkIndex`
//! instead of restarting the file from chunk zero.

use std::sync::Arc;

use peershare_core::config::RuntimeOverrides;
use peershare_core::engine::sender;
use peershare_core::event::{EventEmitter, MemorySink};
use peershare_core::integrity::{calculate_total_chunks, fingerprint};
use peershare_core::protocol::ControlMessage;
use peershare_core::store::memory::MemoryStore;
use peershare_core::store::{PersistedSession, SessionDirection, TransferStatus, TransferStore};
use peershare_core::time::FakeClock;
use peershare_core::transport::memory::{ChannelPair, ChannelPairConfig};
use peershare_core::transport::{IncomingFrame, Transport};
use peershare_core::{MemoryFileSource, TransferEngine};

#[tokio::test]
async fn resumes_from_persisted_next_chunk_index() {
    let chunk_size = 16 * 1024u64;
    let name = "reload.bin";
    let mime_type = "application/octet-stream";
    let bytes: Vec<u8> = (0..(chunk_size as usize * 4)).map(|i| (i % 256) as u8).collect();
    let upload_id = "reload-upload-1".to_string();
    let total_chunks = calculate_total_chunks(bytes.len() as u64, chunk_size);
    let resume_from = 2u64;

    let store = Arc::new(MemoryStore::new());
    let fp = fingerprint(name, bytes.len() as u64, mime_type, 0);
    store
        .put_session(&PersistedSession {
            session_key: PersistedSession::session_key_for(SessionDirection::Outgoing, &upload_id),
            direction: SessionDirection::Outgoing,
            status: TransferStatus::Active,
            upload_id: upload_id.clone(),
            protocol_version: peershare_core::PROTOCOL_VERSION,
            name: name.to_string(),
            size: bytes.len() as u64,
            mime_type: mime_type.to_string(),
            chunk_size,
            total_chunks,
            next_chunk_index: resume_from,
            bytes_transferred: resume_from * chunk_size,
            remote_peer_id: None,
            fingerprint: Some(fp),
            file_checksum: None,
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();

    let (a, b) = ChannelPair::new(ChannelPairConfig {
        max_message_size: Some(chunk_size + 4096),
    });
    let clock = FakeClock::new(0);
    let sink = MemorySink::new();
    let overrides = RuntimeOverrides {
        force_max_message_size: Some((chunk_size + 1024) as u64),
        ..RuntimeOverrides::default()
    };
    let mut engine = TransferEngine::new(
        Arc::new(a),
        store.clone(),
        &clock,
        EventEmitter::new(&clock, &sink),
        overrides,
        true,
    );
    let source = MemoryFileSource::new(name, mime_type, bytes.clone());

    let responder = tokio::spawn(async move {
        let mut received = Vec::new();
        match b.recv().await {
            Some(IncomingFrame::Text(text)) => {
                if let Some(ControlMessage::FileOffer { metadata }) =
                    ControlMessage::from_json(&text)
                {
                    let ready = ControlMessage::ReceiverReady {
                        file_id: metadata.id.clone(),
                        upload_id: metadata.upload_id.clone(),
                        resume_from_chunk: 0,
                    };
                    b.send_text(&ready.to_json().unwrap()).await.unwrap();
                }
            }
            other => panic!("expected file-offer, got {other:?}"),
        }
        loop {
            match b.recv().await {
                Some(IncomingFrame::Binary(chunk)) => received.push(chunk),
                Some(IncomingFrame::Text(text)) => {
                    if matches!(
                        ControlMessage::from_json(&text),
                        Some(ControlMessage::TransferComplete { .. })
                    ) {
                        break;
                    }
                }
                None => break,
            }
        }
        received
    });

    sender::send_file(&mut engine, &source).await.unwrap();
    let received = responder.await.unwrap();

    // Only the tail past `resume_from` is ever put on the wire.
    assert_eq!(received.len() as u64, total_chunks - resume_from);
    let expected_start = (resume_from * chunk_size) as usize;
    assert_eq!(received[0], bytes[expected_start..expected_start + chunk_size as usize]);

    let completed = store
        .get_session(&PersistedSession::session_key_for(
            SessionDirection::Outgoing,
            &upload_id,
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);
}

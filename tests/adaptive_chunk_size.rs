//! A forced `maxMessageSize` clamps every chunk the sender puts on the
//! wire, dominating whatever the chunk planner's RTT tiering would have
//! picked on its own.

use std::sync::Arc;

use peershare_core::config::RuntimeOverrides;
use peershare_core::engine::sender;
use peershare_core::event::{EventEmitter, MemorySink};
use peershare_core::protocol::ControlMessage;
use peershare_core::store::memory::MemoryStore;
use peershare_core::time::FakeClock;
use peershare_core::transport::memory::{ChannelPair, ChannelPairConfig};
use peershare_core::transport::{IncomingFrame, Transport};
use peershare_core::{MemoryFileSource, TransferEngine};

#[tokio::test]
async fn forced_max_message_size_clamps_every_chunk() {
    let (a, b) = ChannelPair::new(ChannelPairConfig::default());
    let store = Arc::new(MemoryStore::new());
    let clock = FakeClock::new(0);
    let sink = MemorySink::new();

    let overrides = RuntimeOverrides {
        force_max_message_size: Some(20_000),
        ..RuntimeOverrides::default()
    };
    let mut engine = TransferEngine::new(
        Arc::new(a),
        store,
        &clock,
        EventEmitter::new(&clock, &sink),
        overrides,
        true,
    );

    // Large enough to span several chunks at the clamped 16 KiB size.
    let bytes = vec![42u8; 50_000];
    let source = MemoryFileSource::new("big.bin", "application/octet-stream", bytes.clone());

    let responder = tokio::spawn(async move {
        let mut chunk_sizes = Vec::new();
        match b.recv().await {
            Some(IncomingFrame::Text(text)) => {
                if let Some(ControlMessage::FileOffer { metadata }) =
                    ControlMessage::from_json(&text)
                {
                    assert_eq!(metadata.chunk_size, 16 * 1024);
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
                Some(IncomingFrame::Binary(bytes)) => chunk_sizes.push(bytes.len()),
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
        chunk_sizes
    });

    sender::send_file(&mut engine, &source).await.unwrap();
    let chunk_sizes = responder.await.unwrap();

    assert_eq!(chunk_sizes.len(), 4);
    for &size in &chunk_sizes[..chunk_sizes.len() - 1] {
        assert_eq!(size, 16 * 1024);
    }
    assert_eq!(*chunk_sizes.last().unwrap(), 50_000 - 3 * 16 * 1024);
}

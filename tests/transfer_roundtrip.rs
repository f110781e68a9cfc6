//! Drives a full transfer end to end: sender's `send_file` against the
//! receiver's own offer/chunk/complete handlers over a single
//! `ChannelPair`, rather than a hand-rolled responder that only echoes
//! what the sender expects.

use std::sync::Arc;

use peershare_core::engine::receiver::{self, ReceiverAction};
use peershare_core::engine::sender;
use peershare_core::engine::SinkFactory;
use peershare_core::event::MemorySink;
use peershare_core::finalize::MemorySink as FinalizeMemorySink;
use peershare_core::store::memory::MemoryStore;
use peershare_core::time::FakeClock;
use peershare_core::transport::memory::{ChannelPair, ChannelPairConfig};
use peershare_core::transport::{IncomingFrame, Transport};
use peershare_core::{config::RuntimeOverrides, protocol::ControlMessage};
use peershare_core::{MemoryFileSource, TransferEngine};

#[tokio::test]
async fn full_offer_chunks_complete_round_trip() {
    let (a, b) = ChannelPair::new(ChannelPairConfig::default());

    let sender_store = Arc::new(MemoryStore::new());
    let sender_clock = FakeClock::new(0);
    let sender_sink = MemorySink::new();
    let mut sender_engine = TransferEngine::new(
        Arc::new(a),
        sender_store,
        &sender_clock,
        peershare_core::event::EventEmitter::new(&sender_clock, &sender_sink),
        RuntimeOverrides::default(),
        true,
    );

    let receiver_store = Arc::new(MemoryStore::new());
    let receiver_clock = FakeClock::new(0);
    let receiver_sink = MemorySink::new();
    let receiver_engine = TransferEngine::new(
        Arc::new(b),
        receiver_store,
        &receiver_clock,
        peershare_core::event::EventEmitter::new(&receiver_clock, &receiver_sink),
        RuntimeOverrides::default(),
        false,
    );

    let original = (0..200u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>();
    let source = MemoryFileSource::new("photo.jpg", "image/jpeg", original.clone());

    let receiver_future = async {
        let mut session = None;
        let mut finalized = None;
        let sink_factory: SinkFactory = Box::new(|| Ok(Box::new(FinalizeMemorySink::new())));

        loop {
            match receiver_engine.transport.recv().await {
                Some(IncomingFrame::Text(text)) => match ControlMessage::from_json(&text) {
                    Some(ControlMessage::FileOffer { metadata }) => {
                        let (runtime_session, reply) =
                            receiver::handle_file_offer(&receiver_engine, &metadata)
                                .await
                                .unwrap();
                        receiver_engine
                            .transport
                            .send_text(&reply.to_json().unwrap())
                            .await
                            .unwrap();
                        session = Some(runtime_session);
                    }
                    Some(ControlMessage::TransferComplete { checksum, .. }) => {
                        let session = session.as_ref().unwrap();
                        let action = receiver::handle_transfer_complete(
                            &receiver_engine,
                            session,
                            &checksum,
                            &sink_factory,
                        )
                        .await
                        .unwrap();
                        if let ReceiverAction::Completed(file) = action {
                            finalized = Some(file.read_to_vec().unwrap());
                        }
                        break;
                    }
                    _ => {}
                },
                Some(IncomingFrame::Binary(bytes)) => {
                    let session = session.as_mut().unwrap();
                    receiver::handle_chunk(&receiver_engine, session, &bytes)
                        .await
                        .unwrap();
                }
                None => break,
            }
        }

        finalized
    };

    let (send_result, finalized) =
        tokio::join!(sender::send_file(&mut sender_engine, &source), receiver_future);
    send_result.unwrap();

    assert_eq!(finalized, Some(original));
    assert!(receiver_sink
        .event_names()
        .contains(&"transfer_receive_complete".to_string()));
    assert_eq!(
        sender_sink.event_names().last().map(String::as_str),
        Some("transfer_send_complete")
    );
}

//! # peershare-core
//!
//! The client-side transfer engine for PeerShare: chunking and integrity,
//! backpressure, resumable persisted state, tiered reconnect recovery,
//! adaptive chunk sizing, a multi-file send queue, and the
//! offer/ready/chunks/complete/retransmit wire protocol exchanged over a
//! single ordered, reliable message channel (a WebRTC `RTCDataChannel` in
//! production, an in-memory fake in tests).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          TRANSFER ENGINE                             │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │                                                                       │
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────────┐  ┌────────────┐ │
//! │  │  protocol  │  │ chunk_planner│  │  backpressure │  │ integrity  │ │
//! │  │            │  │              │  │               │  │            │ │
//! │  │ wire msgs  │  │ RTT-adaptive │  │ event/poll    │  │ per-chunk  │ │
//! │  │ (C2)       │  │ chunk size   │  │ arbitration   │  │ checksums  │ │
//! │  └─────┬──────┘  │ (C4)         │  │ (C5)          │  │ (C1)       │ │
//! │        │         └──────┬───────┘  └───────┬───────┘  └─────┬──────┘ │
//! │        └────────────────┴──────────┬────────┴────────────────┘       │
//! │                                     │                                │
//! │                        ┌────────────▼────────────┐                  │
//! │                        │     engine::sender       │                  │
//! │                        │     engine::receiver     │ (C6 / C7)        │
//! │                        └────────────┬────────────┘                  │
//! │                                     │                                │
//! │  ┌──────────────┐  ┌────────────────┼───────────┐  ┌───────────────┐ │
//! │  │   recovery   │  │    store       │           │  │  send_queue   │ │
//! │  │              │◄─┤ (sessions +    │           │  │               │ │
//! │  │ restart-ice /│  │  chunks, C3)   │           │  │ reducer (C10) │ │
//! │  │ rebuild (C8) │  └────────────────┘           │  └───────────────┘ │
//! │  └──────────────┘                               │                   │
//! │                          ┌────────────────────────▼────────┐         │
//! │                          │  transport::Transport (C6 seam)  │         │
//! │                          │  memory (tests) / webrtc (wasm)  │         │
//! │                          └──────────────────────────────────┘         │
//! │                                                                       │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error taxonomy shared across the engine
//! - [`time`] - Clock abstraction (wall clock vs. fake clock for tests)
//! - [`integrity`] - Per-chunk/per-file checksums and chunk-index math
//! - [`protocol`] - Wire message shapes (offer/ready/chunks/complete/retransmit/error)
//! - [`config`] - Tunable knobs, with any host-provided runtime overrides
//! - [`event`] - Structured single-line JSON event envelope
//! - [`backpressure`] - Event-driven/polling send-buffer arbitration
//! - [`chunk_planner`] - RTT- and message-limit-driven adaptive chunk sizing
//! - [`transport`] - The `Transport` seam, plus the in-memory and WebRTC backends
//! - [`store`] - Resumable persisted session/chunk state
//! - [`finalize`] - Assembling and verifying a completed incoming file
//! - [`send_queue`] - Pure reducer driving a multi-file send queue
//! - [`recovery`] - Tiered reconnect recovery (restart-ice, rebuild, probe)
//! - [`signalling`] - Rendezvous message set and initiator/joiner role state
//! - [`engine`] - Ties the above together into the sender and receiver flows
//!
//! ## Platform Support
//!
//! This crate targets both native (tests, tooling) and `wasm32` (the
//! browser) builds. Persistence uses `rusqlite` natively; the `wasm32`
//! target instead expects the host to supply a [`store::TransferStore`]
//! backed by IndexedDB. The data channel itself is always the host's
//! concern on `wasm32` ([`transport::webrtc::WebRtcTransport`]); native
//! builds and tests drive the engine with [`transport::memory`] instead.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod backpressure;
pub mod chunk_planner;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod finalize;
pub mod integrity;
pub mod protocol;
pub mod recovery;
pub mod send_queue;
pub mod signalling;
pub mod store;
pub mod time;
pub mod transport;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use engine::{FileSource, MemoryFileSource, SinkFactory, TransferEngine};
pub use error::{Error, Result};
pub use protocol::{ControlMessage, FileMetadata, PROTOCOL_VERSION};
pub use transport::Transport;

/// Crate version, as set in `Cargo.toml`.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

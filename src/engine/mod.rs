//! Transfer engine: owns one peer connection's worth of collaborators
//! (transport, store, clock, events, backpressure, chunk planning) and
//! exposes the sender (C6) and receiver (C7) flows as free functions over
//! `&mut TransferEngine` plus per-transfer runtime state, rather than as
//! methods — the runtime state differs in shape between the two
//! directions and neither needs the others' fields.

pub mod receiver;
pub mod sender;

use std::io;
use std::sync::Arc;

use crate::backpressure::BackpressureArbiter;
use crate::chunk_planner::ChunkPlanner;
use crate::config::{BackpressureConfig, ChunkPlannerConfig, RuntimeOverrides};
use crate::event::EventEmitter;
use crate::finalize::ChunkSink;
use crate::store::TransferStore;
use crate::time::Clock;
use crate::transport::Transport;

/// Sender watches for `receiver-ready` for this long before treating the
/// offer as timed out (recoverable).
pub const RECEIVER_READY_TIMEOUT_MS: u64 = 10_000;

/// Outer auto-resume loop deadline.
pub const AUTO_RESUME_MAX_WAIT_MS: u64 = 120_000;

/// Poll interval while waiting for the data channel to reopen between
/// auto-resume attempts.
pub const AUTO_RESUME_POLL_INTERVAL_MS: u64 = 200;

/// Total file size above which the receiver emits a memory-guard warning
/// event, since chunk bytes are not retained in memory once persisted.
pub const MEMORY_GUARD_THRESHOLD_BYTES: u64 = 256 * 1024 * 1024;

/// A read-only view of the local file being sent, decoupled from any
/// concrete filesystem or browser `File` API so the sender can be driven
/// by an in-memory fake in tests.
pub trait FileSource: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    fn mime_type(&self) -> &str;
    fn last_modified_millis(&self) -> i64;
    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

/// An in-memory `FileSource`, used by tests and any host that already
/// holds the file's bytes in memory.
pub struct MemoryFileSource {
    name: String,
    mime_type: String,
    last_modified_millis: i64,
    bytes: Vec<u8>,
}

impl MemoryFileSource {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            last_modified_millis: 0,
            bytes,
        }
    }
}

impl FileSource for MemoryFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn last_modified_millis(&self) -> i64 {
        self.last_modified_millis
    }

    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let start = start as usize;
        let end = (end as usize).min(self.bytes.len());
        Ok(self.bytes.get(start..end).unwrap_or(&[]).to_vec())
    }
}

/// Builds a fresh chunk sink for an incoming file. A host passes a
/// closure wrapping `StreamingDiskSink::new` in production and
/// `MemorySink::new` in tests.
pub type SinkFactory = Box<dyn Fn() -> io::Result<Box<dyn ChunkSink + Send>> + Send + Sync>;

/// Per-connection collaborators the sender and receiver flows share.
///
/// Generic over the concrete transport so [`BackpressureArbiter::wait`]
/// (itself generic, for zero-cost dispatch) can be called directly; the
/// recovery controller (C8), which only needs dynamic dispatch, is handed
/// an `Arc<dyn Transport>` coerced from the same `Arc<T>`.
pub struct TransferEngine<'a, T: Transport> {
    pub transport: Arc<T>,
    pub store: Arc<dyn TransferStore>,
    pub clock: &'a dyn Clock,
    pub events: EventEmitter<'a>,
    pub backpressure: BackpressureArbiter,
    pub planner: ChunkPlanner<'a>,
    pub overrides: RuntimeOverrides,
    pub is_initiator: bool,
    pub remote_peer_id: Option<String>,
}

impl<'a, T: Transport> TransferEngine<'a, T> {
    pub fn new(
        transport: Arc<T>,
        store: Arc<dyn TransferStore>,
        clock: &'a dyn Clock,
        events: EventEmitter<'a>,
        overrides: RuntimeOverrides,
        is_initiator: bool,
    ) -> Self {
        let backpressure_config = overrides.apply_to_backpressure(BackpressureConfig::default());
        Self {
            transport,
            store,
            clock,
            events,
            backpressure: BackpressureArbiter::new(backpressure_config),
            planner: ChunkPlanner::new(ChunkPlannerConfig::default(), clock),
            overrides,
            is_initiator,
            remote_peer_id: None,
        }
    }

    /// This engine's transport, upcast for collaborators (the recovery
    /// controller) that only need dynamic dispatch.
    pub fn transport_dyn(&self) -> Arc<dyn Transport>
    where
        T: 'static,
    {
        self.transport.clone()
    }

    /// Deletes sessions (and their chunks) older than `max_age_millis`,
    /// for a host to schedule periodically. Not called by the sender or
    /// receiver flows themselves; stale session rows would otherwise
    /// accumulate indefinitely for transfers that never complete.
    pub async fn prune_stale_sessions(&self, now_millis: i64, max_age_millis: i64) -> crate::error::Result<u64> {
        self.store.prune_stale_sessions(now_millis, max_age_millis).await
    }
}

//! The `Transport` trait: the engine's only dependency on the underlying
//! peer connection.
//!
//! Out of scope for this crate is the signalling relay and the concrete
//! WebRTC/ICE stack; this trait is the contract the engine assumes an
//! ordered, reliable, message-oriented channel provides. Two
//! implementations exist: [`memory::ChannelPair`], an in-memory fake used
//! by every test and any non-browser host, and (only on `wasm32`)
//! [`webrtc::WebRtcTransport`], a real `RtcDataChannel`-backed
//! implementation.

pub mod memory;

#[cfg(target_arch = "wasm32")]
pub mod webrtc;

use async_trait::async_trait;

use crate::error::Result;

/// High-level connectivity state of the underlying peer connection, as
/// observed by the recovery controller (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The data channel is open and the peer connection is healthy.
    Connected,
    /// The peer connection dropped; recovery should begin its grace
    /// period.
    Disconnected,
    /// The peer connection and/or data channel has been torn down and
    /// will not recover on its own.
    Closed,
}

/// A frame received from the peer, tagged by the same text/binary
/// distinction the wire format uses to separate control messages from
/// chunk bytes.
#[derive(Debug, Clone)]
pub enum IncomingFrame {
    /// A UTF-8 control message.
    Text(String),
    /// Raw chunk bytes.
    Binary(Vec<u8>),
}

/// A snapshot of transport-level statistics, used by the chunk planner
/// (C2, for RTT) and the recovery controller's race-probe monitor (C8).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Round-trip time of the currently selected ICE candidate pair, in
    /// milliseconds, if available.
    pub selected_rtt_ms: Option<u64>,
    /// Best round-trip time observed across any candidate pair this
    /// connection has tried, in milliseconds, if available.
    pub best_observed_rtt_ms: Option<u64>,
}

/// The ordered, reliable, message-oriented channel the engine sends
/// control frames and chunk bytes over.
///
/// Control messages are sent as text frames, chunk bytes as binary
/// frames — implementations must preserve that distinction since the
/// receiver dispatches on frame type.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bytes currently queued for send but not yet flushed to the wire.
    fn buffered_amount(&self) -> u64;

    /// The transport's maximum single-message size in bytes, if bounded.
    fn max_message_size(&self) -> Option<u64>;

    /// Whether the channel is closed (send/receive will fail).
    fn is_closed(&self) -> bool;

    /// Sends a UTF-8 text frame (a JSON-encoded control message).
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Sends a binary frame (raw chunk bytes).
    async fn send_binary(&self, data: &[u8]) -> Result<()>;

    /// Receives the next frame from the peer, or `None` once the channel
    /// has closed and no further frames will arrive.
    async fn recv(&self) -> Option<IncomingFrame>;

    /// Resolves once `buffered_amount()` falls to or below `threshold`,
    /// or once a one-shot low-buffer event fires, whichever the
    /// implementation supports. Returns an error if the channel closes
    /// while waiting.
    async fn wait_for_buffered_amount_low(&self, threshold: u64) -> Result<()>;

    /// Closes the channel and releases any underlying resources.
    async fn close(&self);

    /// Requests an ICE restart on the underlying peer connection. Only
    /// meaningful for the initiator; implementations that cannot restart
    /// ICE (e.g. the in-memory fake) return `Ok(())` as a no-op.
    async fn restart_ice(&self) -> Result<()>;

    /// A snapshot of current transport statistics.
    fn get_stats(&self) -> TransportStats;

    /// The transport's current high-level connection state.
    fn connection_state(&self) -> ConnectionState;
}

//! Signalling/session driver (C9): the message set exchanged over a
//! persistent rendezvous connection to bring up a peer connection, and
//! the small amount of role/ordering state that governs who sends the
//! first offer.
//!
//! Grounded on the message-envelope shape of a relay client's
//! request/response enums, generalized from that transport's
//! DID-addressed messaging into this crate's room/peer-id addressing.

use serde::{Deserialize, Serialize};

/// A message exchanged with the rendezvous connection, in either
/// direction. Every variant carries `room_id` and `peer_id`; messages
/// addressed to one specific peer in the room also carry `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignallingMessage {
    Register {
        room_id: String,
        peer_id: String,
    },
    /// Sent to everyone already in the room once `Register` succeeds;
    /// `is_creator` tells the recipient whether it is the initiator.
    Registered {
        room_id: String,
        peer_id: String,
        is_creator: bool,
    },
    PeerJoined {
        room_id: String,
        peer_id: String,
    },
    PeerLeft {
        room_id: String,
        peer_id: String,
    },
    Offer {
        room_id: String,
        peer_id: String,
        target_id: String,
        payload: String,
    },
    Answer {
        room_id: String,
        peer_id: String,
        target_id: String,
        payload: String,
    },
    IceCandidate {
        room_id: String,
        peer_id: String,
        target_id: String,
        payload: String,
    },
    Error {
        room_id: String,
        peer_id: String,
        payload: String,
    },
}

/// This endpoint's role in the pair, fixed at registration: the creator
/// always initiates the offer and is the only side allowed to restart
/// ICE; the joiner waits for the incoming data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Joiner,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        matches!(self, Role::Creator)
    }
}

/// Buffers remote ICE candidates that arrive before the remote
/// description has been applied, and tracks whether a re-offer is owed
/// after a peer connection rebuild.
pub struct SignallingSession {
    room_id: String,
    peer_id: String,
    role: Option<Role>,
    remote_description_set: bool,
    buffered_candidates: Vec<String>,
    offer_owed: bool,
}

impl SignallingSession {
    pub fn new(room_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            peer_id: peer_id.into(),
            role: None,
            remote_description_set: false,
            buffered_candidates: Vec::new(),
            offer_owed: false,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Applies a `Registered` response, fixing this session's role for
    /// its lifetime. The creator owes the first offer immediately.
    pub fn on_registered(&mut self, is_creator: bool) {
        let role = if is_creator { Role::Creator } else { Role::Joiner };
        self.role = Some(role);
        if role.is_initiator() {
            self.offer_owed = true;
        }
    }

    /// Whether this side should emit an `Offer` now (initial registration
    /// or after a re-init).
    pub fn should_send_offer(&self) -> bool {
        self.offer_owed && self.role == Some(Role::Creator)
    }

    /// Clears the pending-offer flag once the offer has actually been
    /// sent.
    pub fn mark_offer_sent(&mut self) {
        self.offer_owed = false;
    }

    /// Marks that the peer connection was rebuilt and, if this side is
    /// the initiator, a fresh offer is owed again.
    pub fn on_reinit(&mut self) {
        self.remote_description_set = false;
        self.buffered_candidates.clear();
        if self.role == Some(Role::Creator) {
            self.offer_owed = true;
        }
    }

    /// Records that the remote description has been applied, returning
    /// any candidates that were buffered while it was unset so the
    /// caller can flush them to the peer connection.
    pub fn mark_remote_description_set(&mut self) -> Vec<String> {
        self.remote_description_set = true;
        std::mem::take(&mut self.buffered_candidates)
    }

    /// Handles an incoming remote ICE candidate: returns it immediately
    /// for application if the remote description is already set,
    /// otherwise buffers it.
    pub fn on_remote_candidate(&mut self, candidate: String) -> Option<String> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.buffered_candidates.push(candidate);
            None
        }
    }

    /// Only the creator may call ICE restart.
    pub fn may_restart_ice(&self) -> bool {
        self.role == Some(Role::Creator)
    }
}

use std::time::Duration;

use crate::session::{SessionId, SessionState};

/// Failures reported by the peer data-channel transport
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("webrtc: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("no local description after gathering")]
    MissingDescription,

    #[error("peer connection failed")]
    ConnectionFailed,

    #[error("data channel error: {0}")]
    Channel(String),

    #[error("peer link already destroyed")]
    Destroyed,

    #[error("transport rejected description: {0}")]
    Rejected(String),
}

/// Errors surfaced by the session broker and the relay bridge
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Offer generation or answer application failed
    #[error("negotiation failed: {0}")]
    Negotiation(#[source] PeerError),

    /// The referenced session id is not in the table
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The session exists but cannot accept the operation in its current state
    #[error("session {session_id} is {state}")]
    InvalidState {
        session_id: SessionId,
        state: SessionState,
    },

    /// The data channel reported an error after connecting
    #[error("transport error: {0}")]
    Transport(#[source] PeerError),

    /// The local TCP connection failed or errored
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("negotiation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors of the pub/sub signaling transport
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("relay: {0}")]
    Relay(String),

    #[error("envelope: {0}")]
    Envelope(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("signaling transport closed")]
    Closed,
}

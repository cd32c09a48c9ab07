//! Pub/sub signaling adapter
//!
//! Offers, answers and keepalives travel as [`SignalMessage`]s over a topic
//! derived from the connector id. [`nostr::NostrSignaling`] is the production
//! transport, [`memory::MemoryRelay`] an in-process one for tests.

pub mod envelope;
pub mod memory;
pub mod nostr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SignalingError;
use crate::peer::SessionDescription;
use crate::session::SessionId;

pub use envelope::TopicKeys;
pub use memory::MemoryRelay;
pub use nostr::NostrSignaling;

/// Message exchanged on the signaling topic
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// A viewer asks for a fresh offer; `req_id` correlates the reply
    RequestOffer { req_id: String },

    Offer {
        req_id: String,
        session_id: SessionId,
        offer: SessionDescription,
    },

    Answer {
        session_id: SessionId,
        answer: SessionDescription,
    },

    /// Broker liveness beacon
    Keepalive { ts: DateTime<Utc> },
}

impl SignalMessage {
    pub fn keepalive() -> Self {
        SignalMessage::Keepalive { ts: Utc::now() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::RequestOffer { .. } => "request-offer",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Keepalive { .. } => "keepalive",
        }
    }
}

/// Publish/subscribe channel bound to one topic.
///
/// Delivery is best effort and at least once; no ordering is assumed.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn publish(&self, msg: SignalMessage) -> Result<(), SignalingError>;

    /// Next message from another participant; `None` once the transport closed
    async fn recv(&self) -> Option<SignalMessage>;
}

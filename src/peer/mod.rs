pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod mock;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::PeerError;

pub use connection::WebRtcConnector;
pub use types::{IceServer, PeerEvent, SdpKind, SessionDescription};

// ========== CONSTANTS ==========

/// Label of the tunnel data channel
pub const DATA_CHANNEL_LABEL: &str = "starlight-tunnel";

/// Default bound on ICE gathering before the offer is emitted anyway
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handle to one negotiated data channel
pub type PeerHandle = Arc<dyn PeerLink>;

/// Receiving half of a link's event hooks
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// One peer connection with its data channel.
///
/// Events (`open`, `data`, `error`, `close`) are delivered on the receiver
/// returned by [`PeerConnector::connect`].
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Generate the local offer; resolves once the description is complete
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Apply the remote answer
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), PeerError>;

    /// Send one chunk over the data channel
    async fn send(&self, data: Bytes) -> Result<(), PeerError>;

    /// Forced teardown; calling it more than once is a no-op
    async fn destroy(&self);
}

/// Factory for fresh peer links
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self) -> Result<(PeerHandle, PeerEvents), PeerError>;
}

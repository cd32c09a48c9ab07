pub mod bridge;
pub mod broker;
pub mod config;
pub mod error;
pub mod host;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use bridge::{probe_target, RelayBridge, RelayTarget};
pub use broker::{Broker, BrokerEvent, Offer};
pub use config::Config;
pub use error::{BrokerError, PeerError, SignalingError};
pub use session::{Details, SessionId, SessionState, SessionTable};
pub use signaling::{SignalMessage, SignalingTransport};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::error::SignalingError;
use crate::signaling::{SignalMessage, SignalingTransport};

/// In-process topic shared by any number of endpoints
#[derive(Clone)]
pub struct MemoryRelay {
    tx: broadcast::Sender<(Arc<str>, SignalMessage)>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self { tx }
    }

    /// Join the topic as `name`; an endpoint never receives its own messages
    pub fn endpoint(&self, name: &str) -> MemoryEndpoint {
        MemoryEndpoint {
            name: Arc::from(name),
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
        }
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemoryEndpoint {
    name: Arc<str>,
    tx: broadcast::Sender<(Arc<str>, SignalMessage)>,
    rx: Mutex<broadcast::Receiver<(Arc<str>, SignalMessage)>>,
}

#[async_trait]
impl SignalingTransport for MemoryEndpoint {
    async fn publish(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        // no subscriber is not a failure on a pub/sub topic
        let _ = self.tx.send((self.name.clone(), msg));
        Ok(())
    }

    async fn recv(&self) -> Option<SignalMessage> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok((from, msg)) if from != self.name => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Memory relay endpoint {} lagged by {} messages", self.name, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoints_skip_their_own_messages() {
        let relay = MemoryRelay::new();
        let host = relay.endpoint("host");
        let viewer = relay.endpoint("viewer");

        host.publish(SignalMessage::keepalive()).await.unwrap();
        viewer
            .publish(SignalMessage::RequestOffer {
                req_id: "r1".into(),
            })
            .await
            .unwrap();

        assert!(matches!(
            viewer.recv().await,
            Some(SignalMessage::Keepalive { .. })
        ));
        assert_eq!(
            host.recv().await,
            Some(SignalMessage::RequestOffer {
                req_id: "r1".into()
            })
        );
    }
}

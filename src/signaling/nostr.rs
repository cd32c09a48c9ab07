use async_trait::async_trait;
use nostr_sdk::prelude::*;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::SignalingError;
use crate::signaling::envelope::TopicKeys;
use crate::signaling::{SignalMessage, SignalingTransport};

/// Ephemeral event kind carrying sealed signaling envelopes
pub const SIGNAL_KIND: u16 = 21111;

/// Signaling over a Nostr relay.
///
/// Every envelope is an ephemeral event tagged with the topic hash and
/// signed by a throwaway key generated per process.
pub struct NostrSignaling {
    keys: Keys,
    client: Client,
    envelope: Arc<TopicKeys>,
    inbox: Mutex<mpsc::UnboundedReceiver<SignalMessage>>,
}

fn topic_tag() -> SingleLetterTag {
    SingleLetterTag::lowercase(Alphabet::T)
}

impl NostrSignaling {
    /// Connect to `relay_url` and subscribe to the topic of `connector_id`
    pub async fn connect(relay_url: &str, connector_id: &str) -> Result<Self, SignalingError> {
        let keys = Keys::generate();
        let client = ClientBuilder::new()
            .signer(keys.clone())
            .database(nostr_sdk::database::MemoryDatabase::new())
            .build();

        client
            .add_relay(relay_url)
            .await
            .map_err(|e| SignalingError::Relay(e.to_string()))?;
        client.connect().await;

        let envelope = Arc::new(TopicKeys::derive(connector_id));
        let filter = Filter::new()
            .kind(Kind::Custom(SIGNAL_KIND))
            .custom_tag(topic_tag(), vec![envelope.topic().to_string()])
            .since(Timestamp::now());

        client
            .subscribe(vec![filter], None)
            .await
            .map_err(|e| SignalingError::Relay(e.to_string()))?;

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        spawn_forwarder(
            client.notifications(),
            keys.public_key(),
            envelope.clone(),
            inbox_tx,
        );

        info!("Signaling on {} (topic {})", relay_url, &envelope.topic()[..8]);
        Ok(Self {
            keys,
            client,
            envelope,
            inbox: Mutex::new(inbox),
        })
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Relay disconnect failed: {}", e);
        }
    }
}

/// Opens incoming envelopes and queues them for `recv`
fn spawn_forwarder(
    mut notifications: broadcast::Receiver<RelayPoolNotification>,
    own_key: PublicKey,
    envelope: Arc<TopicKeys>,
    inbox: mpsc::UnboundedSender<SignalMessage>,
) {
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(RelayPoolNotification::Event { event, .. }) => {
                    if event.kind != Kind::Custom(SIGNAL_KIND) || event.pubkey == own_key {
                        continue;
                    }
                    match envelope.open(&event.content) {
                        Ok(msg) => {
                            debug!("Received {} from {}", msg.kind(), &event.pubkey.to_hex()[..8]);
                            if inbox.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping unreadable envelope: {}", e),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Relay notifications lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Relay forwarder stopped");
    });
}

#[async_trait]
impl SignalingTransport for NostrSignaling {
    async fn publish(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        let sealed = self.envelope.seal(&msg)?;
        let tags = vec![Tag::custom(
            TagKind::SingleLetter(topic_tag()),
            vec![self.envelope.topic().to_string()],
        )];

        let event = EventBuilder::new(Kind::Custom(SIGNAL_KIND), sealed, tags)
            .to_event(&self.keys)
            .map_err(|e| SignalingError::Relay(e.to_string()))?;

        let output = self
            .client
            .send_event(event)
            .await
            .map_err(|e| SignalingError::Relay(e.to_string()))?;
        if output.success.is_empty() {
            return Err(SignalingError::Relay("no relay accepted the event".into()));
        }
        debug!("Published {}", msg.kind());
        Ok(())
    }

    async fn recv(&self) -> Option<SignalMessage> {
        self.inbox.lock().await.recv().await
    }
}

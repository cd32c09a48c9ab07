#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use starlight_lib::peer::mock::{MockConnector, MockRemote};
use starlight_lib::peer::SessionDescription;
use starlight_lib::{Broker, BrokerEvent, Details, SessionId};

pub const WAIT: Duration = Duration::from_secs(3);

pub struct Harness {
    pub broker: Broker,
    pub connector: Arc<MockConnector>,
    pub remotes: mpsc::UnboundedReceiver<MockRemote>,
    pub events: mpsc::UnboundedReceiver<BrokerEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(negotiation_timeout: Duration) -> Self {
        let (connector, remotes) = MockConnector::new();
        let broker = Broker::new(connector.clone(), negotiation_timeout);
        let events = broker.subscribe();
        Self {
            broker,
            connector,
            remotes,
            events,
        }
    }

    /// Create an offer and return the session id with its remote end
    pub async fn offer(&mut self) -> (SessionId, MockRemote) {
        let offer = self.broker.create_offer(Details::Null).await.unwrap();
        let remote = self.remotes.recv().await.unwrap();
        (offer.session_id, remote)
    }

    /// Offer, answer and open a session, consuming its `Opened` event
    pub async fn connected(&mut self) -> (SessionId, MockRemote) {
        let (id, remote) = self.offer().await;
        self.broker
            .handle_answer(&id, SessionDescription::answer("v=0"))
            .await
            .unwrap();
        remote.open();
        match self.next_event().await {
            BrokerEvent::Opened { session_id, .. } => assert_eq!(session_id, id),
            other => panic!("expected Opened, got {other:?}"),
        }
        (id, remote)
    }

    pub async fn next_event(&mut self) -> BrokerEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("no broker event in time")
            .expect("broker event stream ended")
    }

    pub async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(150), self.events.recv()).await;
        assert!(extra.is_err(), "unexpected event: {:?}", extra);
    }
}

/// Poll until `check` holds or the wait elapses
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

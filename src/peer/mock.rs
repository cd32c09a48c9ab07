//! In-memory peer transport for tests
//!
//! `MockConnector` hands out links whose remote end is driven by the test
//! through a [`MockRemote`]: open the channel, push data, raise errors, and
//! read back what the broker sent.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::PeerError;
use crate::peer::types::{PeerEvent, SessionDescription};
use crate::peer::{PeerConnector, PeerEvents, PeerHandle, PeerLink};

/// Connector producing mock links
pub struct MockConnector {
    created: AtomicUsize,
    fail_offers: AtomicBool,
    reject_answers: AtomicBool,
    connect_delay_ms: AtomicU64,
    answer_delay_ms: AtomicU64,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

impl MockConnector {
    /// New connector plus the stream of remote ends, one per created link
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, remotes_rx) = mpsc::unbounded_channel();
        let connector = Self {
            created: AtomicUsize::new(0),
            fail_offers: AtomicBool::new(false),
            reject_answers: AtomicBool::new(false),
            connect_delay_ms: AtomicU64::new(0),
            answer_delay_ms: AtomicU64::new(0),
            remotes,
        };
        (Arc::new(connector), remotes_rx)
    }

    pub fn fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    pub fn reject_answers(&self, reject: bool) {
        self.reject_answers.store(reject, Ordering::SeqCst);
    }

    /// Stall `connect` before the link exists
    pub fn connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Stall every `apply_answer` of links created from now on
    pub fn answer_delay(&self, delay: Duration) {
        self.answer_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(&self) -> Result<(PeerHandle, PeerEvents), PeerError> {
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            destroyed: AtomicBool::new(false),
            answers: Mutex::new(Vec::new()),
        });

        let link = MockLink {
            n,
            fail_offer: self.fail_offers.load(Ordering::SeqCst),
            reject_answer: self.reject_answers.load(Ordering::SeqCst),
            answer_delay: Duration::from_millis(self.answer_delay_ms.load(Ordering::SeqCst)),
            events: events_tx.clone(),
            sent: sent_tx,
            shared: shared.clone(),
        };
        let remote = MockRemote {
            events: events_tx,
            sent: Arc::new(tokio::sync::Mutex::new(sent_rx)),
            shared,
        };
        let _ = self.remotes.send(remote);

        Ok((Arc::new(link), events_rx))
    }
}

struct Shared {
    destroyed: AtomicBool,
    answers: Mutex<Vec<SessionDescription>>,
}

struct MockLink {
    n: usize,
    fail_offer: bool,
    reject_answer: bool,
    answer_delay: Duration,
    events: mpsc::UnboundedSender<PeerEvent>,
    sent: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
}

#[async_trait]
impl PeerLink for MockLink {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        if self.fail_offer {
            return Err(PeerError::Channel("offer generation failed".into()));
        }
        Ok(SessionDescription::offer(format!("v=0\r\ns=mock-offer-{}\r\n", self.n)))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), PeerError> {
        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }
        if self.reject_answer || self.shared.destroyed.load(Ordering::SeqCst) {
            return Err(PeerError::Rejected("answer refused by mock".into()));
        }
        let mut answers = self
            .shared
            .answers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // a connection in `stable` refuses a second remote description
        if !answers.is_empty() {
            return Err(PeerError::Rejected("remote description already set".into()));
        }
        answers.push(answer);
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<(), PeerError> {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return Err(PeerError::Destroyed);
        }
        self.sent.send(data).map_err(|_| PeerError::Destroyed)
    }

    async fn destroy(&self) {
        if !self.shared.destroyed.swap(true, Ordering::SeqCst) {
            // a real channel reports its own close after a forced teardown
            let _ = self.events.send(PeerEvent::Closed);
        }
    }
}

/// Test-side end of a mock link
#[derive(Clone)]
pub struct MockRemote {
    events: mpsc::UnboundedSender<PeerEvent>,
    sent: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    shared: Arc<Shared>,
}

impl MockRemote {
    /// Fire the channel's `open` hook
    pub fn open(&self) {
        let _ = self.events.send(PeerEvent::Open);
    }

    /// Deliver an inbound payload as the remote peer
    pub fn deliver(&self, data: impl Into<Bytes>) {
        let _ = self.events.send(PeerEvent::Data(data.into()));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.events.send(PeerEvent::Error(PeerError::Channel(reason.to_string())));
    }

    pub fn close(&self) {
        let _ = self.events.send(PeerEvent::Closed);
    }

    /// Next chunk the local side sent over the channel
    pub async fn recv_sent(&self) -> Option<Bytes> {
        self.sent.lock().await.recv().await
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> Vec<SessionDescription> {
        self.shared
            .answers
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, PeerError};
use crate::peer::{PeerConnector, PeerEvent, PeerEvents, PeerHandle, SessionDescription};
use crate::session::{Details, SessionId, SessionState, SessionTable};

/// Lifecycle events delivered to subscribers.
///
/// Per session: `Opened` precedes any `Message`, and a session that opened
/// ends with exactly one `Error` or `Closed`.
#[derive(Clone)]
pub enum BrokerEvent {
    Opened {
        peer: PeerHandle,
        session_id: SessionId,
        details: Details,
    },
    Message {
        peer: PeerHandle,
        payload: Bytes,
        session_id: SessionId,
        details: Details,
    },
    Error {
        peer: PeerHandle,
        error: Arc<BrokerError>,
        session_id: SessionId,
        details: Details,
    },
    Closed {
        peer: PeerHandle,
        session_id: SessionId,
        details: Details,
    },
}

impl BrokerEvent {
    pub fn session_id(&self) -> &str {
        match self {
            BrokerEvent::Opened { session_id, .. }
            | BrokerEvent::Message { session_id, .. }
            | BrokerEvent::Error { session_id, .. }
            | BrokerEvent::Closed { session_id, .. } => session_id,
        }
    }
}

impl std::fmt::Debug for BrokerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerEvent::Opened { session_id, .. } => write!(f, "Opened({session_id})"),
            BrokerEvent::Message {
                session_id, payload, ..
            } => write!(f, "Message({session_id}, {} bytes)", payload.len()),
            BrokerEvent::Error {
                session_id, error, ..
            } => write!(f, "Error({session_id}, {error})"),
            BrokerEvent::Closed { session_id, .. } => write!(f, "Closed({session_id})"),
        }
    }
}

/// Result of a successful `create_offer`
#[derive(Debug, Clone)]
pub struct Offer {
    pub session_id: SessionId,
    pub offer: SessionDescription,
}

/// How a session left the table
enum Termination {
    Closed,
    Errored(BrokerError),
    TimedOut(Duration),
}

impl Termination {
    fn state(&self) -> SessionState {
        match self {
            Termination::Closed => SessionState::Closed,
            Termination::Errored(_) => SessionState::Errored,
            Termination::TimedOut(_) => SessionState::TimedOut,
        }
    }
}

struct Inner {
    table: SessionTable,
    connector: Arc<dyn PeerConnector>,
    negotiation_timeout: Duration,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BrokerEvent>>>,
}

/// Session broker: drives negotiation and owns the session table
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    pub fn new(connector: Arc<dyn PeerConnector>, negotiation_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: SessionTable::new(),
                connector,
                negotiation_timeout,
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn table(&self) -> &SessionTable {
        &self.inner.table
    }

    /// Register a listener for lifecycle events.
    ///
    /// Listeners only see events raised after they subscribe.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BrokerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        rx
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<BrokerEvent>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: BrokerEvent) {
        let mut subscribers = self.subscribers();
        if subscribers.is_empty() {
            debug!("No subscriber for {:?}", event);
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Allocate a session and generate its local offer.
    ///
    /// On failure nothing is left in the table.
    pub async fn create_offer(&self, details: Details) -> Result<Offer, BrokerError> {
        let (peer, events) = self
            .inner
            .connector
            .connect()
            .await
            .map_err(BrokerError::Negotiation)?;

        let session_id = self.table().create(peer.clone(), details);
        debug!(session_id = %session_id, "Session created, generating offer");

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!(session_id = %session_id, "Offer generation failed: {}", e);
                self.table().remove(&session_id);
                peer.destroy().await;
                return Err(BrokerError::Negotiation(e));
            }
        };

        tokio::spawn(self.clone().drive(session_id.clone(), events));

        info!(session_id = %session_id, "Offer ready");
        Ok(Offer { session_id, offer })
    }

    /// Apply the remote answer for `session_id`.
    ///
    /// Unknown ids fail without touching the table. The session moves to
    /// `Answering` before the answer is applied, so a repeated delivery of
    /// the same answer finds it claimed and is accepted as a no-op.
    pub async fn handle_answer(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> Result<(), BrokerError> {
        let session = match self.table().transition(
            session_id,
            &[SessionState::Offering],
            SessionState::Answering,
        ) {
            Ok(session) => session,
            Err(BrokerError::InvalidState {
                state: SessionState::Answering,
                ..
            }) => {
                debug!(session_id = %session_id, "Duplicate answer ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = session.peer.apply_answer(answer).await {
            warn!(session_id = %session_id, "Answer rejected: {}", e);
            let reason = PeerError::Rejected(e.to_string());
            self.fail(session_id, BrokerError::Negotiation(reason)).await;
            return Err(BrokerError::Negotiation(e));
        }

        info!(session_id = %session_id, "Answer applied");
        Ok(())
    }

    /// Send a chunk to a connected session's peer
    pub async fn send(&self, session_id: &str, data: Bytes) -> Result<(), BrokerError> {
        let session = self.table().get(session_id)?;
        if session.state != SessionState::Connected {
            return Err(BrokerError::InvalidState {
                session_id: session_id.to_string(),
                state: session.state,
            });
        }
        session
            .peer
            .send(data)
            .await
            .map_err(BrokerError::Transport)
    }

    /// Send a chunk to every connected session; returns how many accepted it
    pub async fn send_to_all(&self, data: Bytes) -> usize {
        let mut delivered = 0;
        for session_id in self.table().ids() {
            match self.send(&session_id, data.clone()).await {
                Ok(()) => delivered += 1,
                Err(BrokerError::InvalidState { .. }) => {}
                Err(e) => warn!(session_id = %session_id, "Broadcast send failed: {}", e),
            }
        }
        delivered
    }

    /// Close a session. Returns false when it was already gone.
    pub async fn close(&self, session_id: &str) -> bool {
        self.finish(session_id, Termination::Closed).await
    }

    /// Tear a session down through the error path
    pub async fn fail(&self, session_id: &str, error: BrokerError) -> bool {
        self.finish(session_id, Termination::Errored(error)).await
    }

    /// Close every session, best effort; returns how many were closed
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for session_id in self.table().ids() {
            if self.close(&session_id).await {
                closed += 1;
            }
        }
        info!("Closed {} session(s)", closed);
        closed
    }

    /// Remove the session and release its resources.
    ///
    /// Removal is the once-only guard: whichever path removes the session
    /// reports the outcome, every later path is a no-op.
    async fn finish(&self, session_id: &str, termination: Termination) -> bool {
        let Some(session) = self.table().remove(session_id) else {
            return false;
        };

        let was_connected = session.state == SessionState::Connected;
        let next = termination.state();
        let peer = session.peer.clone();
        let details = session.details.clone();
        let lifetime = session.created_at.elapsed();

        drop(session.socket);
        peer.destroy().await;

        info!(
            session_id = %session_id,
            "Session {} -> {} after {:.1}s",
            session.state,
            next,
            lifetime.as_secs_f64()
        );

        if !was_connected {
            match termination {
                Termination::Errored(e) => {
                    warn!(session_id = %session_id, "Session ended before opening: {}", e)
                }
                Termination::TimedOut(after) => {
                    warn!(session_id = %session_id, "Negotiation timed out after {:?}", after)
                }
                Termination::Closed => {}
            }
            return true;
        }

        let session_id = session_id.to_string();
        match termination {
            Termination::Closed => self.emit(BrokerEvent::Closed {
                peer,
                session_id,
                details,
            }),
            Termination::Errored(error) => self.emit(BrokerEvent::Error {
                peer,
                error: Arc::new(error),
                session_id,
                details,
            }),
            Termination::TimedOut(after) => self.emit(BrokerEvent::Error {
                peer,
                error: Arc::new(BrokerError::TimedOut(after)),
                session_id,
                details,
            }),
        }
        true
    }

    /// Per-session event loop: turns peer hooks into state transitions.
    ///
    /// Runs until the session leaves the table or the link's events end.
    async fn drive(self, session_id: SessionId, mut events: PeerEvents) {
        let timeout = self.inner.negotiation_timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut connected = false;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(PeerEvent::Open) => {
                        match self.table().transition(
                            &session_id,
                            &[SessionState::Answering],
                            SessionState::Connected,
                        ) {
                            Ok(session) => {
                                connected = true;
                                info!(session_id = %session_id, "Peer connected");
                                self.emit(BrokerEvent::Opened {
                                    peer: session.peer,
                                    session_id: session_id.clone(),
                                    details: session.details,
                                });
                            }
                            Err(BrokerError::UnknownSession(_)) => break,
                            Err(e) => warn!(session_id = %session_id, "Ignoring open: {}", e),
                        }
                    }
                    Some(PeerEvent::Data(payload)) => {
                        if !connected {
                            warn!(
                                session_id = %session_id,
                                "Dropping {} bytes received before open",
                                payload.len()
                            );
                            continue;
                        }
                        match self.table().get(&session_id) {
                            Ok(session) => self.emit(BrokerEvent::Message {
                                peer: session.peer,
                                payload,
                                session_id: session_id.clone(),
                                details: session.details,
                            }),
                            Err(_) => break,
                        }
                    }
                    Some(PeerEvent::Error(e)) => {
                        self.fail(&session_id, BrokerError::Transport(e)).await;
                        break;
                    }
                    Some(PeerEvent::Closed) | None => {
                        self.close(&session_id).await;
                        break;
                    }
                },
                () = &mut deadline, if !connected => {
                    self.finish(&session_id, Termination::TimedOut(timeout)).await;
                    break;
                }
            }

            if !self.table().contains(&session_id) {
                break;
            }
        }
        debug!(session_id = %session_id, "Session driver stopped");
    }
}

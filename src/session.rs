use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::error::BrokerError;
use crate::peer::PeerHandle;
use crate::utils::random_id;

pub type SessionId = String;

/// Opaque caller metadata threaded through every lifecycle event
pub type Details = serde_json::Value;

/// Lifecycle stage of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Offering,
    Answering,
    Connected,
    Closed,
    Errored,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Closed | SessionState::Errored | SessionState::TimedOut
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Offering => write!(f, "offering"),
            SessionState::Answering => write!(f, "answering"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Errored => write!(f, "errored"),
            SessionState::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Handle to the local TCP connection of a connected session.
///
/// Dropping it ends the socket: the writer drains what is queued and shuts
/// down its half, the reader stops on the released guard.
pub struct LocalSocket {
    writer: mpsc::UnboundedSender<Bytes>,
    _guard: oneshot::Sender<()>,
}

impl LocalSocket {
    pub fn new(writer: mpsc::UnboundedSender<Bytes>, guard: oneshot::Sender<()>) -> Self {
        Self {
            writer,
            _guard: guard,
        }
    }
}

/// One tunnel, from offer creation to teardown
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub peer: PeerHandle,
    pub details: Details,
    pub socket: Option<LocalSocket>,
    pub created_at: Instant,
}

/// Cheap copy of a session's observable fields
#[derive(Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub peer: PeerHandle,
    pub details: Details,
    pub has_socket: bool,
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("details", &self.details)
            .field("has_socket", &self.has_socket)
            .finish()
    }
}

impl Session {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state,
            peer: self.peer.clone(),
            details: self.details.clone(),
            has_socket: self.socket.is_some(),
        }
    }
}

/// In-memory map of live sessions.
///
/// All methods lock briefly and never across an await.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionId, Session>>,
    issued: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Session>> {
        // a panicked holder leaves the map itself consistent
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a new session in `Offering`.
    ///
    /// Ids carry a process-wide sequence number, so they are never reused.
    pub fn create(&self, peer: PeerHandle, details: Details) -> SessionId {
        let seq = self.issued.fetch_add(1, Ordering::Relaxed);
        let id = format!("{:x}{}", seq, random_id());
        let session = Session {
            id: id.clone(),
            state: SessionState::Offering,
            peer,
            details,
            socket: None,
            created_at: Instant::now(),
        };
        self.lock().insert(id.clone(), session);
        id
    }

    pub fn get(&self, id: &str) -> Result<SessionSnapshot, BrokerError> {
        self.lock()
            .get(id)
            .map(Session::snapshot)
            .ok_or_else(|| BrokerError::UnknownSession(id.to_string()))
    }

    /// Remove a session; absent ids are a no-op returning `None`
    pub fn remove(&self, id: &str) -> Option<Session> {
        self.lock().remove(id)
    }

    /// Move a session to `to` if it is currently in one of `from`
    pub fn transition(
        &self,
        id: &str,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<SessionSnapshot, BrokerError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BrokerError::UnknownSession(id.to_string()))?;

        if !from.contains(&session.state) {
            return Err(BrokerError::InvalidState {
                session_id: id.to_string(),
                state: session.state,
            });
        }
        session.state = to;
        Ok(session.snapshot())
    }

    /// Give a connected session its local socket.
    ///
    /// Hands the socket back when the session is gone or not connected, so
    /// the caller can drop it and end the connection.
    pub fn attach_socket(&self, id: &str, socket: LocalSocket) -> Result<(), LocalSocket> {
        let mut sessions = self.lock();
        match sessions.get_mut(id) {
            Some(session)
                if session.state == SessionState::Connected && session.socket.is_none() =>
            {
                session.socket = Some(socket);
                Ok(())
            }
            _ => Err(socket),
        }
    }

    /// Queue a chunk for the session's local socket
    pub fn write_socket(&self, id: &str, data: Bytes) -> Result<(), BrokerError> {
        let sessions = self.lock();
        let session = sessions
            .get(id)
            .ok_or_else(|| BrokerError::UnknownSession(id.to_string()))?;
        let socket = session.socket.as_ref().ok_or_else(|| {
            BrokerError::Socket(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no local socket for session",
            ))
        })?;
        socket.writer.send(data).map_err(|_| {
            BrokerError::Socket(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "local socket writer has stopped",
            ))
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

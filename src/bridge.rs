use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerEvent};
use crate::error::BrokerError;
use crate::peer::PeerHandle;
use crate::session::{LocalSocket, SessionId};

/// Size of one read from the local socket
const READ_CHUNK: usize = 16 * 1024;

/// Where opened sessions are forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
}

impl RelayTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Check that something accepts connections at `target`
pub async fn probe_target(target: &RelayTarget, timeout: Duration) -> io::Result<()> {
    let connect = TcpStream::connect((target.host.as_str(), target.port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no answer from {target} within {timeout:?}"),
        )),
    }
}

/// Couples each opened session to its own TCP connection to the target.
///
/// Teardown runs both ways: a closed or failed socket closes the session
/// through the broker, and a session leaving the table drops its
/// [`LocalSocket`], which ends the connection.
pub struct RelayBridge {
    broker: Broker,
    target: RelayTarget,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
}

impl RelayBridge {
    /// Subscribes to `broker` right away, so no event after this call is missed
    pub fn new(broker: Broker, target: RelayTarget) -> Self {
        let events = broker.subscribe();
        Self {
            broker,
            target,
            events,
        }
    }

    /// Handle broker events until the broker goes away
    pub async fn run(mut self) {
        info!("Relaying sessions to {}", self.target);
        while let Some(event) = self.events.recv().await {
            match event {
                BrokerEvent::Opened {
                    peer, session_id, ..
                } => self.open(peer, session_id),
                BrokerEvent::Message {
                    payload, session_id, ..
                } => {
                    if let Err(e) = self.broker.table().write_socket(&session_id, payload) {
                        let broker = self.broker.clone();
                        tokio::spawn(async move {
                            broker.fail(&session_id, e).await;
                        });
                    }
                }
                BrokerEvent::Error {
                    session_id, error, ..
                } => warn!(session_id = %session_id, "Session failed: {}", error),
                BrokerEvent::Closed { session_id, .. } => {
                    debug!(session_id = %session_id, "Session closed")
                }
            }
        }
        debug!("Relay bridge stopped");
    }

    fn open(&self, peer: PeerHandle, session_id: SessionId) {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (guard_tx, guard_rx) = oneshot::channel();

        // attach before any message of this session is handled, so early
        // chunks queue up while the connect is still in flight
        if self
            .broker
            .table()
            .attach_socket(&session_id, LocalSocket::new(writer_tx, guard_tx))
            .is_err()
        {
            debug!(session_id = %session_id, "Session gone before its socket attached");
            return;
        }

        tokio::spawn(pump(
            self.broker.clone(),
            self.target.clone(),
            peer,
            session_id,
            writer_rx,
            guard_rx,
        ));
    }
}

/// Connect to the target, then run both copy directions
async fn pump(
    broker: Broker,
    target: RelayTarget,
    peer: PeerHandle,
    session_id: SessionId,
    writer_rx: mpsc::UnboundedReceiver<Bytes>,
    mut guard: oneshot::Receiver<()>,
) {
    let stream = tokio::select! {
        res = TcpStream::connect((target.host.as_str(), target.port)) => res,
        _ = &mut guard => {
            debug!(session_id = %session_id, "Session ended while connecting");
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            warn!(session_id = %session_id, "Connect to {} failed: {}", target, e);
            broker.fail(&session_id, BrokerError::Socket(e)).await;
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(session_id = %session_id, "set_nodelay failed: {}", e);
    }
    info!(session_id = %session_id, "Connected to {}", target);

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(
        broker.clone(),
        session_id.clone(),
        write_half,
        writer_rx,
    ));
    read_loop(broker, peer, session_id, read_half, guard).await;
}

/// Socket to peer
async fn read_loop(
    broker: Broker,
    peer: PeerHandle,
    session_id: SessionId,
    mut socket: OwnedReadHalf,
    mut guard: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            res = socket.read(&mut buf) => res,
            _ = &mut guard => return,
        };

        match n {
            Ok(0) => {
                debug!(session_id = %session_id, "Local socket closed");
                broker.close(&session_id).await;
                return;
            }
            Ok(n) => {
                if let Err(e) = peer.send(Bytes::copy_from_slice(&buf[..n])).await {
                    broker.fail(&session_id, BrokerError::Transport(e)).await;
                    return;
                }
            }
            Err(e) => {
                broker.fail(&session_id, BrokerError::Socket(e)).await;
                return;
            }
        }
    }
}

/// Peer to socket. Ends when the session drops its writer.
async fn write_loop(
    broker: Broker,
    session_id: SessionId,
    mut socket: OwnedWriteHalf,
    mut chunks: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(chunk) = chunks.recv().await {
        if let Err(e) = socket.write_all(&chunk).await {
            broker.fail(&session_id, BrokerError::Socket(e)).await;
            return;
        }
    }
    if let Err(e) = socket.shutdown().await {
        debug!(session_id = %session_id, "Socket shutdown failed: {}", e);
    }
}

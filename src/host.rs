use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bridge::{RelayBridge, RelayTarget};
use crate::broker::Broker;
use crate::session::Details;
use crate::signaling::{SignalMessage, SignalingTransport};

/// Wire signaling to the broker and the broker to the relay bridge.
///
/// Runs until `shutdown` resolves or the signaling transport closes, then
/// aborts in-flight dispatches and closes every session. Returns how many
/// sessions were closed.
pub async fn serve(
    broker: Broker,
    signaling: Arc<dyn SignalingTransport>,
    target: RelayTarget,
    keepalive: Duration,
    shutdown: impl Future<Output = ()>,
) -> usize {
    let bridge = tokio::spawn(RelayBridge::new(broker.clone(), target).run());
    let beacon = tokio::spawn(keepalive_loop(signaling.clone(), keepalive));
    let mut inflight = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            msg = signaling.recv() => match msg {
                Some(msg) => {
                    inflight.spawn(dispatch(broker.clone(), signaling.clone(), msg));
                }
                None => {
                    warn!("Signaling transport closed");
                    break;
                }
            },
            Some(_) = inflight.join_next() => {}
            () = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    // nothing may insert a session once close_all has run
    inflight.shutdown().await;
    beacon.abort();
    let closed = broker.close_all().await;
    bridge.abort();
    closed
}

/// Handle one signaling message as its own unit of work
async fn dispatch(broker: Broker, signaling: Arc<dyn SignalingTransport>, msg: SignalMessage) {
    match msg {
        SignalMessage::RequestOffer { req_id } => {
            let offer = match broker.create_offer(Details::Null).await {
                Ok(offer) => offer,
                Err(e) => {
                    warn!("Offer for request {} failed: {}", req_id, e);
                    return;
                }
            };
            let reply = SignalMessage::Offer {
                req_id,
                session_id: offer.session_id.clone(),
                offer: offer.offer,
            };
            if let Err(e) = signaling.publish(reply).await {
                // the viewer will never answer; free the session now
                warn!(session_id = %offer.session_id, "Publishing offer failed: {}", e);
                broker.close(&offer.session_id).await;
            }
        }
        SignalMessage::Answer { session_id, answer } => {
            if let Err(e) = broker.handle_answer(&session_id, answer).await {
                warn!(session_id = %session_id, "Answer not applied: {}", e);
            }
        }
        // our own kinds, echoed by other connectors on the topic
        SignalMessage::Offer { .. } | SignalMessage::Keepalive { .. } => {
            debug!("Ignoring {} message", msg.kind());
        }
    }
}

/// Periodic liveness publish; failures are logged and skipped
async fn keepalive_loop(signaling: Arc<dyn SignalingTransport>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = signaling.publish(SignalMessage::keepalive()).await {
            warn!("Keepalive publish failed: {}", e);
        }
    }
}

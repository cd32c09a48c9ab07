use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

use crate::error::PeerError;
use crate::logger::dump_selected_pair;
use crate::peer::data_channel::attach_dc;
use crate::peer::ice::{analyze_candidates, rtc_ice_servers, wait_for_gathering};
use crate::peer::types::{IceServer, PeerEvent, SessionDescription};
use crate::peer::{PeerConnector, PeerEvents, PeerHandle, PeerLink, DATA_CHANNEL_LABEL};

/// Creates offering WebRTC peers, one per session
pub struct WebRtcConnector {
    ice_servers: Vec<RTCIceServer>,
    gather_timeout: Duration,
}

impl WebRtcConnector {
    pub fn new(ice_servers: &[IceServer], gather_timeout: Duration) -> Self {
        Self {
            ice_servers: rtc_ice_servers(ice_servers),
            gather_timeout,
        }
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self) -> Result<(PeerHandle, PeerEvents), PeerError> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(api.new_peer_connection(self.rtc_config()).await?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // keep a weak ref so the handler does not keep the connection alive
        let pc_weak = Arc::downgrade(&pc);
        let state_events = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("Peer connection state changed to: {:?}", st);
            let pc = pc_weak.upgrade();
            let state_events = state_events.clone();
            Box::pin(async move {
                match st {
                    RTCPeerConnectionState::Connected => {
                        if let Some(pc) = pc {
                            dump_selected_pair(&pc, "CONNECTED").await;
                        }
                    }
                    RTCPeerConnectionState::Failed => {
                        let _ = state_events.send(PeerEvent::Error(PeerError::ConnectionFailed));
                    }
                    RTCPeerConnectionState::Closed => {
                        let _ = state_events.send(PeerEvent::Closed);
                    }
                    _ => {}
                }
            })
        }));

        // the offering side owns the channel; ordered delivery for a byte stream
        let dc = pc
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        attach_dc(&dc, events_tx);

        let link = WebRtcLink {
            pc,
            dc,
            gather_timeout: self.gather_timeout,
            destroyed: AtomicBool::new(false),
        };
        Ok((Arc::new(link), events_rx))
    }
}

/// A peer connection with its single tunnel data channel
pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    gather_timeout: Duration,
    destroyed: AtomicBool,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;

        wait_for_gathering(&mut gathering_complete, self.gather_timeout).await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or(PeerError::MissingDescription)?;
        analyze_candidates(&local.sdp);
        debug!("Offer created, SDP len: {}", local.sdp.len());

        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), PeerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PeerError::Destroyed);
        }
        let desc = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| PeerError::Rejected(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| PeerError::Rejected(e.to_string()))
    }

    async fn send(&self, data: Bytes) -> Result<(), PeerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PeerError::Destroyed);
        }
        self.dc.send(&data).await?;
        Ok(())
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Destroying peer connection");
        if let Err(e) = self.dc.close().await {
            warn!("Failed to close data channel: {}", e);
        }
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

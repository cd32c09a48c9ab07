use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::error::PeerError;
use crate::peer::types::PeerEvent;

/// Forward the data channel's hooks into the link's event queue.
///
/// Handlers only enqueue; ordering between `open` and the first `data` is
/// the order the channel raised them in.
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<PeerEvent>) {
    let label = dc.label().to_string();

    dc.on_open(Box::new({
        let events = events.clone();
        let label = label.clone();
        move || {
            info!("Data channel '{}' open", label);
            let _ = events.send(PeerEvent::Open);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        move |msg: DataChannelMessage| {
            debug!("Received {} bytes on data channel", msg.data.len());
            let _ = events.send(PeerEvent::Data(msg.data));
            Box::pin(async {})
        }
    }));

    dc.on_error(Box::new({
        let events = events.clone();
        move |err: webrtc::Error| {
            warn!("Data channel error: {}", err);
            let _ = events.send(PeerEvent::Error(PeerError::Channel(err.to_string())));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        info!("Data channel '{}' closed", label);
        let _ = events.send(PeerEvent::Closed);
        Box::pin(async {})
    }));
}

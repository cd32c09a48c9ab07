use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::peer::types::IceServer;
use crate::utils::add_ice_url_scheme;

/// Default public STUN servers
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::new("stun:stun.l.google.com:19302"),
        IceServer::new("stun:stun1.l.google.com:19302"),
    ]
}

/// Convert configured servers into the webrtc representation
pub fn rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: vec![add_ice_url_scheme(server)],
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Wait for the gathering-complete signal, bounded by `limit`.
///
/// Offers are sent without trickle, so every candidate must already be in
/// the SDP. On timeout the offer goes out with whatever was gathered.
pub async fn wait_for_gathering(gathering_complete: &mut mpsc::Receiver<()>, limit: Duration) {
    match timeout(limit, gathering_complete.recv()).await {
        Ok(_) => debug!("ICE gathering complete"),
        Err(_) => warn!(
            "ICE gathering still running after {}s, sending partial offer",
            limit.as_secs()
        ),
    }
}

/// Count of candidate types embedded in an SDP
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(sdp: &str) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            summary.host += 1;
        } else if line.contains("typ srflx") {
            summary.srflx += 1;
        } else if line.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.srflx == 0 && summary.relay == 0 {
        warn!("No server-reflexive or relay candidates; peers behind NAT may not connect");
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_candidate_kinds() {
        let sdp = "v=0\r\n\
            a=candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host\r\n\
            a=candidate:2 1 udp 1694498815 203.0.113.7 50001 typ srflx raddr 192.168.1.4 rport 50000\r\n\
            a=candidate:3 1 udp 16777215 198.51.100.2 3478 typ relay raddr 203.0.113.7 rport 50001\r\n\
            a=candidate:4 1 udp 2130706431 10.0.0.2 50002 typ host\r\n";

        let summary = analyze_candidates(sdp);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }

    #[test]
    fn bare_urls_get_a_scheme() {
        let servers = rtc_ice_servers(&[IceServer::new("stun.example.org:3478")]);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org:3478".to_string()]);
    }
}

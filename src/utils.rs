use crate::peer::types::IceServer;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefix shared by every connector id
pub const CONNECTOR_ID_PREFIX: &str = "starlight-";

/// Fresh connector id: the prefix followed by six random digits
pub fn generate_connector_id() -> String {
    let digits: u32 = rand::rng().random_range(100_000..1_000_000);
    format!("{CONNECTOR_ID_PREFIX}{digits}")
}

/// Human-friendly form of a connector id, digits grouped in threes (`123-456`)
pub fn display_id(connector_id: &str) -> String {
    let digits = connector_id
        .strip_prefix(CONNECTOR_ID_PREFIX)
        .unwrap_or(connector_id);

    let chars: Vec<char> = digits.chars().collect();
    chars
        .chunks(3)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Link a viewer opens to reach this connector through the relay
pub fn viewer_url(viewer: &str, relay_host: &str, connector_id: &str) -> String {
    format!("{viewer}?host={relay_host}&path={connector_id}&port=443&encrypt=1&autoconnect=true")
}

/// Add the ICE URL scheme when missing: `turn:` for servers with credentials, `stun:` otherwise
pub fn add_ice_url_scheme(server: &IceServer) -> String {
    let url = server.url.as_str();
    if url.starts_with("turn:")
        || url.starts_with("turns:")
        || url.starts_with("stun:")
        || url.starts_with("stuns:")
    {
        url.to_string()
    } else {
        let scheme = if server.username.is_some() {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_ids_have_six_digits() {
        let id = generate_connector_id();
        let digits = id.strip_prefix(CONNECTOR_ID_PREFIX).unwrap();
        assert_eq!(digits.len(), 6);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn display_id_groups_digits() {
        assert_eq!(display_id("starlight-123456"), "123-456");
        assert_eq!(display_id("starlight-0011234"), "001-123-4");
    }

    #[test]
    fn viewer_url_carries_connector_id() {
        let url = viewer_url(
            "https://starlight-client.surge.sh/vnc.html",
            "nostr.grooveix.com",
            "starlight-123456",
        );
        assert_eq!(
            url,
            "https://starlight-client.surge.sh/vnc.html?host=nostr.grooveix.com&path=starlight-123456&port=443&encrypt=1&autoconnect=true"
        );
    }

    #[test]
    fn ice_scheme_depends_on_credentials() {
        let mut turn = IceServer::new("relay.example.org:3478");
        turn.username = Some("u".into());
        assert_eq!(add_ice_url_scheme(&turn), "turn:relay.example.org:3478");
        assert_eq!(
            add_ice_url_scheme(&IceServer::new("stun:stun.example.org")),
            "stun:stun.example.org"
        );
    }
}

use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::bridge::RelayTarget;
use crate::peer::ice::default_ice_servers;
use crate::peer::IceServer;
use crate::utils::{generate_connector_id, CONNECTOR_ID_PREFIX};

// Logging defaults: verbose for our own crates in debug builds, quiet in release.
// `--log` or RUST_LOG override both.

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "starlight_lib=debug,starlight_connector=debug,info";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info";

const ID_FILE_NAME: &str = "connector-id";

/// Runtime configuration. Every flag also reads an environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "starlight-connector")]
#[command(about = "Expose a local TCP service to remote viewers over WebRTC", long_about = None)]
pub struct Config {
    /// Host of the local service sessions are forwarded to
    #[arg(long, env = "STARLIGHT_TARGET_HOST", default_value = "localhost")]
    pub target_host: String,

    #[arg(long, env = "STARLIGHT_TARGET_PORT", default_value_t = 5900)]
    pub target_port: u16,

    /// Nostr relay used for signaling
    #[arg(long, env = "NOSTR_URL", default_value = "wss://nostr.grooveix.com")]
    pub relay_url: String,

    /// Fixed connector id; overrides the persisted one
    #[arg(long, env = "STARLIGHT_CONNECTOR_ID")]
    pub connector_id: Option<String>,

    /// Where the connector id is persisted (default: platform config dir)
    #[arg(long, env = "STARLIGHT_ID_FILE")]
    pub id_file: Option<PathBuf>,

    /// Discard the persisted connector id and generate a new one
    #[arg(long)]
    pub reset_id: bool,

    #[arg(long, default_value = "https://starlight-client.surge.sh/vnc.html")]
    pub viewer_url: String,

    #[arg(long, default_value_t = 10)]
    pub keepalive_secs: u64,

    /// Drop sessions that have not opened within this many seconds
    #[arg(long, default_value_t = 60)]
    pub negotiation_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub gather_timeout_secs: u64,

    /// ICE server as `URL` or `URL,USERNAME,CREDENTIAL`; repeatable
    #[arg(long = "ice-server", value_parser = parse_ice_server)]
    pub ice_servers: Vec<IceServer>,

    /// Go online even when nothing listens on the target
    #[arg(long)]
    pub skip_target_check: bool,

    /// Log filter directives (tracing EnvFilter syntax)
    #[arg(long, env = "STARLIGHT_LOG")]
    pub log: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["starlight-connector"])
    }
}

fn parse_ice_server(s: &str) -> Result<IceServer, String> {
    let mut parts = s.split(',');
    let url = parts
        .next()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "empty ICE server url".to_string())?;
    let mut server = IceServer::new(url);
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => {}
        (Some(user), Some(cred), None) => {
            server.username = Some(user.to_string());
            server.credential = Some(cred.to_string());
        }
        _ => return Err(format!("expected URL or URL,USERNAME,CREDENTIAL, got `{s}`")),
    }
    Ok(server)
}

impl Config {
    pub fn target(&self) -> RelayTarget {
        RelayTarget::new(self.target_host.clone(), self.target_port)
    }

    pub fn ice_servers(&self) -> Vec<IceServer> {
        if self.ice_servers.is_empty() {
            default_ice_servers()
        } else {
            self.ice_servers.clone()
        }
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_secs(self.gather_timeout_secs)
    }

    /// Host part of the relay url, as viewers address it
    pub fn relay_host(&self) -> &str {
        let rest = self
            .relay_url
            .split_once("://")
            .map_or(self.relay_url.as_str(), |(_, rest)| rest);
        rest.split(['/', ':']).next().unwrap_or(rest)
    }

    pub fn id_file(&self) -> Option<PathBuf> {
        self.id_file.clone().or_else(|| {
            directories::ProjectDirs::from("com", "starlight", "starlight-connector")
                .map(|dirs| dirs.config_dir().join(ID_FILE_NAME))
        })
    }

    /// Connector id for this run: the explicit one, else the persisted one
    pub fn resolve_connector_id(&self) -> io::Result<String> {
        if let Some(id) = &self.connector_id {
            return Ok(id.clone());
        }
        match self.id_file() {
            Some(path) => load_or_create_connector_id(&path, self.reset_id),
            None => {
                warn!("No config directory; the connector id will not survive a restart");
                Ok(generate_connector_id())
            }
        }
    }
}

/// Read the id stored at `path`, or generate and store a fresh one
pub fn load_or_create_connector_id(path: &Path, reset: bool) -> io::Result<String> {
    if !reset {
        match std::fs::read_to_string(path) {
            Ok(stored) => {
                let stored = stored.trim();
                if stored.starts_with(CONNECTOR_ID_PREFIX) {
                    return Ok(stored.to_string());
                }
                warn!("Ignoring malformed connector id in {}", path.display());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    let id = generate_connector_id();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, &id)?;
    info!("New connector id stored in {}", path.display());
    Ok(id)
}

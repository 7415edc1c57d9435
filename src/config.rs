use std::fs;
use std::path::{Path, PathBuf};

use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};
use crate::network::LinkConfig;
use crate::network::link::DEFAULT_LISTEN_ADDR;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DEFAULT_SIMULATION_URL: &str = "ws://localhost:8080/messaging";

const HISTORY_FILE: &str = "history.db";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Link,
    Simulation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Display name used the first time this node creates its identity
    pub name: Option<String>,
    pub data_dir: String,
    pub transport: TransportKind,
    pub listen_addr: String,
    /// Multiaddrs dialed at startup, on top of mDNS discovery
    pub peers: Vec<String>,
    pub simulation_url: String,
    pub replay_on_connect: bool,
    pub persist_history: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: "data".to_string(),
            transport: TransportKind::Link,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            peers: Vec::new(),
            simulation_url: DEFAULT_SIMULATION_URL.to_string(),
            replay_on_connect: true,
            persist_history: true,
        }
    }
}

impl AppConfig {
    pub fn history_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(HISTORY_FILE)
    }

    pub fn link_config(&self) -> ChatResult<LinkConfig> {
        let listen_addr = self
            .listen_addr
            .parse::<Multiaddr>()
            .map_err(|err| ChatError::Config(format!("listen_addr `{}`: {err}", self.listen_addr)))?;

        Ok(LinkConfig {
            listen_addr,
            dial: parse_peer_addrs(&self.peers),
        })
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

fn parse_peer_addrs(entries: &[String]) -> Vec<Multiaddr> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(err) => {
                log::warn!("Invalid multiaddr `{entry}`: {err}");
                None
            }
        })
        .collect()
}

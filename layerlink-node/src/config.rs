//! Load daemon config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/layerlink/config.toml or
/// /etc/layerlink/config.toml.
/// Env overrides: LAYERLINK_GROUP, LAYERLINK_PORT, LAYERLINK_MAC,
/// LAYERLINK_STATE_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Multicast group carrying the wireless datagrams (default 239.255.77.77).
    #[serde(default = "default_group")]
    pub group: String,
    /// UDP port of the wireless link (default 45677).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Node MAC as AA:BB:CC:DD:EE:FF. A locally-administered random address
    /// is generated when unset.
    #[serde(default)]
    pub mac: Option<String>,
    /// Directory holding the persisted layer (default ~/.local/state/layerlink).
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Keep freewheeling instead of stopping when sync goes quiet.
    #[serde(default)]
    pub freewheel_on_link_lost: bool,
}

fn default_group() -> String {
    "239.255.77.77".to_string()
}
fn default_port() -> u16 {
    45677
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_port(),
            mac: None,
            state_dir: None,
            freewheel_on_link_lost: false,
        }
    }
}

impl Config {
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .map(|h| h.join(".local/state/layerlink"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/layerlink"))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LAYERLINK_GROUP") {
        c.group = s;
    }
    if let Ok(s) = std::env::var("LAYERLINK_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("LAYERLINK_MAC") {
        c.mac = Some(s);
    }
    if let Ok(s) = std::env::var("LAYERLINK_STATE_DIR") {
        c.state_dir = Some(PathBuf::from(s));
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/layerlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/layerlink/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => log::warn!("ignoring malformed {}: {e}", p.display()),
                }
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.group, "239.255.77.77");
        assert_eq!(c.port, 45677);
        assert!(c.mac.is_none());
        assert!(!c.freewheel_on_link_lost);
    }

    #[test]
    fn parse_partial_toml() {
        let c: Config = toml::from_str("port = 50000\n").unwrap();
        assert_eq!(c.port, 50000);
        assert_eq!(c.group, default_group());
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "warp-scout.yaml";

/// How the reachability stage asks an endpoint whether it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EchoMode {
    /// ICMP echo over an unprivileged datagram socket
    #[default]
    Icmp,
    /// TCP connect to `echo_port`; a refusal also counts as an answer
    Tcp,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Addresses or CIDR ranges; curated provider list if omitted.
    pub endpoints: Option<Vec<String>>,
    pub ports: Option<String>,
    pub probe_count: Option<u32>,
    pub echo: Option<EchoMode>,
    pub echo_timeout_ms: Option<u64>,
    pub echo_port: Option<u16>,
    pub echo_workers: Option<usize>,
    pub port_timeout_ms: Option<u64>,
    pub workers: Option<usize>,
    pub survivors: Option<usize>,
    pub ipv6: Option<bool>,
    pub ipv6_sample: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub path: Option<PathBuf>,
    pub registration_url: Option<String>,
    pub attempt_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub log_level: Option<String>,
    pub discovery: Option<DiscoveryConfig>,
    pub identity: Option<IdentityConfig>,
}

/// Load `path`, or `./warp-scout.yaml` if it exists. A file that exists but
/// does not parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(cfg))
}

//! Core utilities and shared types for the endpoint discovery engine.

pub mod pool;
pub mod score;
pub mod settings;
pub mod tuning;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

pub use score::{rank, shortlist, ScoreWeights, ScoredPort, SHORTLIST_LEN};
pub use settings::{ScanSettings, SettingsError};
pub use tuning::{NetworkQuality, Tuning};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A provider address believed to terminate tunnels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(pub IpAddr);

impl Endpoint {
    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }

    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.0, port)
    }
}

impl From<IpAddr> for Endpoint {
    fn from(ip: IpAddr) -> Self {
        Endpoint(ip)
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Endpoint)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An endpoint that answered at least one echo probe during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityRecord {
    pub endpoint: Endpoint,
    /// Mean over the probes that answered.
    pub rtt: Duration,
    pub replies: u32,
}

/// Where a jitter figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterSource {
    /// Measured across several packets.
    Measured,
    /// Placeholder drawn at random; a single-packet probe cannot observe jitter.
    Synthetic,
}

/// One responsive (endpoint, port) pair. Only bounded successes produce a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortProbeResult {
    pub endpoint: Endpoint,
    pub port: u16,
    pub latency_ms: f64,
    /// Percentage in [0, 100].
    pub loss_pct: f64,
    pub jitter_ms: f64,
    pub jitter: JitterSource,
}

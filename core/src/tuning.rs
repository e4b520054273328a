//! Per-run probe timeouts and scan width derived from a quick anchor probe.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Poor,
    /// Anchor did not answer; defaults apply.
    Unknown,
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkQuality::Excellent => "excellent",
            NetworkQuality::Good => "good",
            NetworkQuality::Poor => "poor",
            NetworkQuality::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tuning {
    pub quality: NetworkQuality,
    pub anchor_rtt_ms: Option<f64>,
    #[serde(serialize_with = "as_millis")]
    pub echo_timeout: Duration,
    #[serde(serialize_with = "as_millis")]
    pub port_timeout: Duration,
    pub workers: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            quality: NetworkQuality::Unknown,
            anchor_rtt_ms: None,
            echo_timeout: Duration::from_secs(2),
            port_timeout: Duration::from_secs(1),
            workers: 100,
        }
    }
}

impl Tuning {
    /// Below 100ms is excellent, below 250ms good, anything slower poor.
    pub fn from_anchor_rtt(rtt: Option<Duration>) -> Tuning {
        let Some(rtt) = rtt else { return Tuning::default() };
        let ms = rtt.as_secs_f64() * 1000.0;
        let (quality, echo_ms, port_ms, workers) = if ms < 100.0 {
            (NetworkQuality::Excellent, 2000, 1000, 150)
        } else if ms < 250.0 {
            (NetworkQuality::Good, 3000, 1500, 100)
        } else {
            (NetworkQuality::Poor, 4000, 2000, 50)
        };
        Tuning {
            quality,
            anchor_rtt_ms: Some(ms),
            echo_timeout: Duration::from_millis(echo_ms),
            port_timeout: Duration::from_millis(port_ms),
            workers,
        }
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

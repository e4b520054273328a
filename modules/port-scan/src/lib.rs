//! Capability scan: one-byte UDP handshakes across endpoints x ports with bounded concurrency.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use scout_core::pool::run_bounded;
use scout_core::{Endpoint, JitterSource, PortProbeResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Parse a comma-separated list of ports/ranges (e.g., "500,854", "1000-1010,2408").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse()?;
            let e: u16 = end.trim().parse()?;
            if s == 0 || e == 0 || s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse()?;
            if p == 0 {
                return Err(anyhow!("invalid port: {}", part));
            }
            ports.push(p);
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

/// Ports the provider is known to accept tunnel traffic on.
pub fn tunnel_ports() -> Vec<u16> {
    const CURATED: &[u16] = &[
        500, 854, 859, 864, 878, 880, 890, 891, 894, 903, 908, 934, 939, 943, 945, 946, 955, 968,
        987, 1002, 1007, 1010, 1014, 1018, 1027, 1032, 1048, 1054, 1074, 1180, 1387, 1701, 2371,
        2408, 2506, 3138, 3476, 3581, 4177, 4198, 4233, 4500, 5279, 5956, 7106, 7152, 7159, 7281,
        7559, 8319, 8784, 8854, 8886,
    ];
    CURATED.to_vec()
}

/// What one successful handshake observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub latency: Duration,
    pub loss_pct: f64,
    pub jitter_ms: f64,
    pub jitter: JitterSource,
}

/// A datagram handshake against one (endpoint, port) pair.
#[async_trait]
pub trait DatagramProbe: Send + Sync {
    /// `None` on timeout, refusal or any socket error.
    async fn probe(&self, target: SocketAddr, timeout: Duration) -> Option<Measurement>;
}

/// Send a single `0x01` byte and wait for any reply.
///
/// One packet cannot measure jitter, so the jitter figure is a random placeholder
/// in [0.1, 2.0] ms tagged [`JitterSource::Synthetic`]. Loss is always 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpHandshake;

impl UdpHandshake {
    pub const PAYLOAD: [u8; 1] = [0x01];

    fn local_for(target: &SocketAddr) -> SocketAddr {
        match target.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        }
    }

    async fn exchange(target: SocketAddr) -> std::io::Result<()> {
        let sock = UdpSocket::bind(Self::local_for(&target)).await?;
        sock.connect(target).await?;
        sock.send(&Self::PAYLOAD).await?;
        let mut buf = [0u8; 64];
        sock.recv(&mut buf).await?;
        Ok(())
    }
}

#[async_trait]
impl DatagramProbe for UdpHandshake {
    async fn probe(&self, target: SocketAddr, per_probe: Duration) -> Option<Measurement> {
        let start = Instant::now();
        match timeout(per_probe, Self::exchange(target)).await {
            Ok(Ok(())) => {
                let latency = start.elapsed();
                let jitter_ms = rand::thread_rng().gen_range(0.1..=2.0);
                Some(Measurement { latency, loss_pct: 0.0, jitter_ms, jitter: JitterSource::Synthetic })
            }
            Ok(Err(e)) => { trace!(%target, error = %e, "handshake failed"); None }
            Err(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct ScanReport {
    /// Probe tasks dispatched: always endpoints x ports.
    pub submitted: usize,
    /// Successes in completion order.
    pub results: Vec<PortProbeResult>,
}

/// Probe the full cross product of `endpoints` and `ports` with at most
/// `concurrency` handshakes in flight, each bounded by `per_probe`.
pub async fn scan_ports<P>(
    endpoints: &[Endpoint],
    ports: &[u16],
    concurrency: usize,
    per_probe: Duration,
    probe: Arc<P>,
) -> ScanReport
where
    P: DatagramProbe + ?Sized + 'static,
{
    let jobs: Vec<(Endpoint, u16)> = endpoints
        .iter()
        .flat_map(|&e| ports.iter().map(move |&p| (e, p)))
        .collect();
    debug!(tasks = jobs.len(), concurrency, "capability scan starting");

    let report = run_bounded(jobs, concurrency, move |(endpoint, port)| {
        let probe = probe.clone();
        async move {
            let m = probe.probe(endpoint.socket_addr(port), per_probe).await?;
            Some(PortProbeResult {
                endpoint,
                port,
                latency_ms: m.latency.as_secs_f64() * 1000.0,
                loss_pct: m.loss_pct.clamp(0.0, 100.0),
                jitter_ms: m.jitter_ms,
                jitter: m.jitter,
            })
        }
    })
    .await;

    debug!(submitted = report.submitted, viable = report.results.len(), "capability scan done");
    ScanReport { submitted: report.submitted, results: report.results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn parse_simple_list() {
        let v = parse_ports("500,4500,2408").unwrap();
        assert_eq!(v, vec![500, 2408, 4500]);
    }

    #[test]
    fn parse_ranges_and_list() {
        let v = parse_ports("1-3,5,3").unwrap();
        assert_eq!(v, vec![1, 2, 3, 5]);
    }

    #[test]
    fn reject_invalid() {
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("10-5").is_err());
        assert!(parse_ports("70000").is_err());
    }

    #[test]
    fn curated_ports() {
        let p = tunnel_ports();
        assert_eq!(p.len(), 53);
        assert!(p.contains(&2408) && p.contains(&500) && p.contains(&4500));
    }

    /// Answers only for listed pairs; records every pair it was asked about.
    struct Recording {
        open: HashSet<SocketAddr>,
        seen: Mutex<Vec<SocketAddr>>,
        calls: AtomicUsize,
    }

    impl Recording {
        fn new(open: &[&str]) -> Arc<Self> {
            Arc::new(Recording {
                open: open.iter().map(|s| s.parse().unwrap()).collect(),
                seen: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DatagramProbe for Recording {
        async fn probe(&self, target: SocketAddr, _timeout: Duration) -> Option<Measurement> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(target);
            tokio::task::yield_now().await;
            self.open.contains(&target).then_some(Measurement {
                latency: Duration::from_millis(50),
                loss_pct: 0.0,
                jitter_ms: 1.0,
                jitter: JitterSource::Synthetic,
            })
        }
    }

    fn eps(list: &[&str]) -> Vec<Endpoint> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn submits_full_cross_product_at_any_width() {
        let endpoints = eps(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let ports = vec![500, 854, 2408, 4500];
        for concurrency in [1, 3, 12, 150] {
            let probe = Recording::new(&["10.0.0.1:500", "10.0.0.3:4500"]);
            let report = scan_ports(&endpoints, &ports, concurrency, Duration::from_millis(10), probe.clone()).await;
            assert_eq!(report.submitted, 12);
            assert_eq!(probe.calls.load(Ordering::SeqCst), 12);
            let distinct: HashSet<_> = probe.seen.lock().unwrap().iter().copied().collect();
            assert_eq!(distinct.len(), 12);
            assert_eq!(report.results.len(), 2);
            assert!(report.results.len() <= report.submitted);
        }
    }

    #[tokio::test]
    async fn results_carry_pair_and_measurement() {
        let probe = Recording::new(&["10.0.0.1:500"]);
        let report = scan_ports(&eps(&["10.0.0.1", "10.0.0.2"]), &[500, 4500], 4, Duration::from_millis(10), probe).await;
        assert_eq!(report.results.len(), 1);
        let r = &report.results[0];
        assert_eq!(r.endpoint.to_string(), "10.0.0.1");
        assert_eq!(r.port, 500);
        assert_eq!(r.latency_ms, 50.0);
        assert_eq!(r.loss_pct, 0.0);
        assert_eq!(r.jitter, JitterSource::Synthetic);
    }

    #[tokio::test]
    async fn nothing_listening_is_empty() {
        let report = scan_ports(&eps(&["10.0.0.1"]), &[1, 2, 3], 2, Duration::from_millis(10), Recording::new(&[])).await;
        assert_eq!(report.submitted, 3);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn udp_handshake_against_loopback_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            if let Ok((n, from)) = responder.recv_from(&mut buf).await {
                let _ = responder.send_to(&buf[..n], from).await;
            }
        });
        let m = UdpHandshake.probe(target, Duration::from_secs(2)).await.expect("reply");
        assert!(m.latency < Duration::from_secs(2));
        assert!((0.1..=2.0).contains(&m.jitter_ms));
        assert_eq!(m.loss_pct, 0.0);
        assert_eq!(m.jitter, JitterSource::Synthetic);
    }

    #[tokio::test]
    async fn udp_handshake_over_ipv6_loopback() {
        let responder = match UdpSocket::bind("[::1]:0").await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("skipping: no IPv6 loopback ({})", e);
                return;
            }
        };
        let target = responder.local_addr().unwrap();
        assert!(target.is_ipv6());
        assert!(UdpHandshake::local_for(&target).is_ipv6());
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            if let Ok((n, from)) = responder.recv_from(&mut buf).await {
                assert_eq!(&buf[..n], &UdpHandshake::PAYLOAD);
                let _ = responder.send_to(&buf[..n], from).await;
            }
        });
        let m = UdpHandshake.probe(target, Duration::from_secs(2)).await.expect("reply over ::1");
        assert!(m.latency < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn udp_handshake_silent_port_yields_nothing() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();
        // bound but never answers: the probe must give up at its own timeout
        let m = UdpHandshake.probe(target, Duration::from_millis(100)).await;
        assert!(m.is_none());
        drop(silent);
    }
}

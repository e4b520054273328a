//! Two-stage discovery: reachability filter, then capability scan, then ranking.

use host_discovery::{filter_reachable, EchoProbe};
use port_scan::{scan_ports, DatagramProbe};
use scout_core::{rank, Endpoint, ReachabilityRecord, ScanSettings, ScoredPort};
use std::sync::Arc;
use tracing::info;

/// How a discovery run ended. The empty outcomes are normal, not errors.
#[derive(Debug)]
pub enum Discovery {
    NoReachableEndpoints,
    NoViablePorts {
        survivors: Vec<ReachabilityRecord>,
        submitted: usize,
    },
    Shortlist {
        survivors: Vec<ReachabilityRecord>,
        submitted: usize,
        shortlist: Vec<ScoredPort>,
    },
}

pub async fn discover<E, D>(settings: &ScanSettings, echo: Arc<E>, probe: Arc<D>) -> Discovery
where
    E: EchoProbe + ?Sized + 'static,
    D: DatagramProbe + ?Sized + 'static,
{
    info!(endpoints = settings.endpoints.len(), probes = settings.probe_count, "filtering reachable endpoints");
    let survivors = filter_reachable(&settings.endpoints, settings.echo_timeout, settings.probe_count, settings.echo_workers, echo).await;
    if survivors.is_empty() {
        info!("no endpoint answered");
        return Discovery::NoReachableEndpoints;
    }

    let top: Vec<Endpoint> = survivors.iter().take(settings.survivor_limit).map(|r| r.endpoint).collect();
    info!(alive = survivors.len(), scanning = top.len(), ports = settings.ports.len(), workers = settings.workers, "scanning ports");
    let report = scan_ports(&top, &settings.ports, settings.workers, settings.port_timeout, probe).await;
    if report.results.is_empty() {
        info!(submitted = report.submitted, "no port answered");
        return Discovery::NoViablePorts { survivors, submitted: report.submitted };
    }

    let shortlist = rank(report.results, settings.shortlist_len);
    Discovery::Shortlist { survivors, submitted: report.submitted, shortlist }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use port_scan::Measurement;
    use scout_core::{JitterSource, Tuning};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Echo(HashMap<Endpoint, Duration>);

    #[async_trait]
    impl EchoProbe for Echo {
        async fn echo(&self, endpoint: Endpoint, _timeout: Duration) -> Option<Duration> {
            self.0.get(&endpoint).copied()
        }
    }

    struct Ports {
        open: HashMap<SocketAddr, Measurement>,
        asked: Mutex<Vec<SocketAddr>>,
    }

    #[async_trait]
    impl DatagramProbe for Ports {
        async fn probe(&self, target: SocketAddr, _timeout: Duration) -> Option<Measurement> {
            self.asked.lock().unwrap().push(target);
            self.open.get(&target).copied()
        }
    }

    fn settings(endpoints: &[&str], ports: &[u16]) -> ScanSettings {
        ScanSettings::new(endpoints.iter().map(|s| s.parse().unwrap()).collect(), ports.to_vec(), &Tuning::default())
    }

    fn measurement(ms: u64, jitter_ms: f64) -> Measurement {
        Measurement { latency: Duration::from_millis(ms), loss_pct: 0.0, jitter_ms, jitter: JitterSource::Synthetic }
    }

    #[tokio::test]
    async fn single_live_pair_scores_600_9() {
        let alive: Endpoint = "10.0.0.1".parse().unwrap();
        let echo = Arc::new(Echo(HashMap::from([(alive, Duration::from_millis(50))])));
        let ports = Arc::new(Ports {
            open: HashMap::from([("10.0.0.1:500".parse().unwrap(), measurement(50, 1.0))]),
            asked: Mutex::new(Vec::new()),
        });
        let s = settings(&["10.0.0.1", "10.0.0.2"], &[500, 4500]);
        let Discovery::Shortlist { survivors, submitted, shortlist } = discover(&s, echo, ports.clone()).await else {
            panic!("expected a shortlist");
        };
        assert_eq!(survivors.len(), 1);
        // only the reachable endpoint is port-scanned
        assert_eq!(submitted, 2);
        assert!(ports.asked.lock().unwrap().iter().all(|a| a.ip() == alive.0));
        assert_eq!(shortlist.len(), 1);
        assert_eq!(shortlist[0].probe.endpoint, alive);
        assert_eq!(shortlist[0].probe.port, 500);
        assert!((shortlist[0].score - 600.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn nothing_reachable() {
        let echo = Arc::new(Echo(HashMap::new()));
        let ports = Arc::new(Ports { open: HashMap::new(), asked: Mutex::new(Vec::new()) });
        let out = discover(&settings(&["10.0.0.1", "10.0.0.2"], &[500]), echo, ports.clone()).await;
        assert!(matches!(out, Discovery::NoReachableEndpoints));
        assert!(ports.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reachable_but_no_ports() {
        let echo = Arc::new(Echo(HashMap::from([("10.0.0.1".parse().unwrap(), Duration::from_millis(5))])));
        let ports = Arc::new(Ports { open: HashMap::new(), asked: Mutex::new(Vec::new()) });
        let out = discover(&settings(&["10.0.0.1"], &[500, 854, 4500]), echo, ports).await;
        match out {
            Discovery::NoViablePorts { survivors, submitted } => {
                assert_eq!(survivors.len(), 1);
                assert_eq!(submitted, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn survivors_are_truncated_before_scanning() {
        let echo = Arc::new(Echo(
            (1..=5u8).map(|i| (format!("10.0.0.{}", i).parse().unwrap(), Duration::from_millis(i as u64 * 10))).collect(),
        ));
        let ports = Arc::new(Ports { open: HashMap::new(), asked: Mutex::new(Vec::new()) });
        let mut s = settings(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"], &[500]);
        s.survivor_limit = 2;
        discover(&s, echo, ports.clone()).await;
        let mut asked: Vec<String> = ports.asked.lock().unwrap().iter().map(|a| a.ip().to_string()).collect();
        asked.sort();
        assert_eq!(asked, vec!["10.0.0.1", "10.0.0.2"]);
    }
}

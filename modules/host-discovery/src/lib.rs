//! Reachability filtering: echo-probe a set of endpoints and rank the ones that answer.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ipnet::{IpNet, Ipv6Net};
use rand::Rng;
use scout_core::pool::run_bounded;
use scout_core::{Endpoint, ReachabilityRecord};
use socket2::Type;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Well-known anycast responder used to gauge the local network before a run.
pub const QUALITY_ANCHOR: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));

/// Prefixes the provider announces for its IPv6 tunnel endpoints.
pub const PROVIDER_V6_PREFIXES: &[&str] = &["2606:4700:d0::/48", "2606:4700:d1::/48"];

/// One echo-style liveness probe.
#[async_trait]
pub trait EchoProbe: Send + Sync {
    /// Round-trip time if the endpoint answered within `timeout`.
    async fn echo(&self, endpoint: Endpoint, timeout: Duration) -> Option<Duration>;
}

/// ICMP echo over unprivileged datagram sockets, one shared socket per family.
///
/// Replies are matched by sequence number, so concurrent probes to the same
/// host never steal each other's answers.
pub struct IcmpEcho {
    v4: Client,
    v6: Option<Client>,
    ident: u16,
    seq: AtomicU16,
}

impl IcmpEcho {
    pub const PAYLOAD: [u8; 56] = [0; 56];

    /// Open the sockets; must run inside a tokio runtime. Fails when the host
    /// does not allow datagram ICMP for this user (`net.ipv4.ping_group_range`).
    pub fn new() -> io::Result<Self> {
        let v4 = Client::new(&Config::builder().kind(ICMP::V4).sock_type_hint(Type::DGRAM).build())?;
        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).sock_type_hint(Type::DGRAM).build()) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "ICMPv6 echo unavailable; IPv6 endpoints will not answer");
                None
            }
        };
        Ok(IcmpEcho { v4, v6, ident: rand::random(), seq: AtomicU16::new(0) })
    }
}

#[async_trait]
impl EchoProbe for IcmpEcho {
    async fn echo(&self, endpoint: Endpoint, per_attempt: Duration) -> Option<Duration> {
        let client = match endpoint.0 {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => self.v6.as_ref()?,
        };
        let mut pinger = client.pinger(endpoint.0, PingIdentifier(self.ident)).await;
        pinger.timeout(per_attempt);
        let seq = PingSequence(self.seq.fetch_add(1, Ordering::Relaxed));
        match timeout(per_attempt, pinger.ping(seq, &Self::PAYLOAD)).await {
            Ok(Ok((_reply, rtt))) => Some(rtt),
            Ok(Err(e)) => { trace!(%endpoint, error = %e, "echo failed"); None }
            Err(_) => None,
        }
    }
}

/// Unprivileged echo: a TCP connect where either an accept or an active refusal
/// counts as the host answering.
#[derive(Debug, Clone, Copy)]
pub struct TcpEcho {
    pub port: u16,
}

impl Default for TcpEcho {
    fn default() -> Self { TcpEcho { port: 443 } }
}

#[async_trait]
impl EchoProbe for TcpEcho {
    async fn echo(&self, endpoint: Endpoint, per_attempt: Duration) -> Option<Duration> {
        let addr = endpoint.socket_addr(self.port);
        let start = Instant::now();
        match timeout(per_attempt, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Some(start.elapsed()),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => Some(start.elapsed()),
            Ok(Err(e)) => { trace!(%endpoint, error = %e, "echo failed"); None }
            Err(_) => None,
        }
    }
}

/// Curated provider endpoints.
pub fn curated_endpoints() -> Vec<Endpoint> {
    const V4: &[[u8; 4]] = &[
        [162, 159, 192, 1], [162, 159, 192, 2], [162, 159, 193, 1], [162, 159, 193, 2],
        [162, 159, 195, 1], [162, 159, 195, 2], [188, 114, 96, 1], [188, 114, 96, 2],
        [188, 114, 97, 1], [188, 114, 97, 2],
    ];
    const V6: &[[u16; 8]] = &[
        [0x2606, 0x4700, 0xd0, 0, 0, 0, 0xa29f, 0xc001],
        [0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111],
        [0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1001],
    ];
    let v4 = V4.iter().map(|o| Endpoint(IpAddr::V4(Ipv4Addr::from(*o))));
    let v6 = V6.iter().map(|s| Endpoint(IpAddr::V6(Ipv6Addr::from(*s))));
    v4.chain(v6).collect()
}

/// Random IPv6 addresses inside the provider prefixes, varying the low 32 bits.
pub fn sample_provider_v6<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Endpoint> {
    let nets: Vec<Ipv6Net> = PROVIDER_V6_PREFIXES.iter().filter_map(|p| p.parse().ok()).collect();
    if nets.is_empty() { return Vec::new(); }
    (0..count)
        .map(|_| {
            let net = nets[rng.gen_range(0..nets.len())];
            let base = u128::from(net.network());
            let host = u128::from(rng.gen::<u32>());
            Endpoint(IpAddr::V6(Ipv6Addr::from(base | host)))
        })
        .collect()
}

/// Expand a CIDR into at most `limit` endpoint addresses.
pub fn expand_cidr(cidr: &str, limit: usize) -> Result<Vec<Endpoint>> {
    let net: IpNet = cidr.trim().parse().map_err(|e| anyhow!("invalid CIDR {}: {}", cidr, e))?;
    let mut hosts = net.hosts();
    let out: Vec<Endpoint> = hosts.by_ref().take(limit).map(Endpoint).collect();
    if hosts.next().is_some() {
        warn!(range = %net, cap = limit, "CIDR range larger than the cap; extra addresses skipped");
    }
    Ok(out)
}

/// Parse an endpoint list: single addresses or CIDR ranges (capped at `cidr_limit` each).
pub fn parse_endpoints<S: AsRef<str>>(items: &[S], cidr_limit: usize) -> Result<Vec<Endpoint>> {
    let mut out = Vec::new();
    for item in items.iter().map(|s| s.as_ref().trim()).filter(|s| !s.is_empty()) {
        if item.contains('/') {
            out.extend(expand_cidr(item, cidr_limit)?);
        } else {
            out.push(item.parse().map_err(|e| anyhow!("invalid endpoint {}: {}", item, e))?);
        }
    }
    Ok(out)
}

/// Echo-probe every endpoint `probe_count` times with at most `width` probes in flight.
///
/// An endpoint survives if any probe answers; its rtt is the mean of the answers.
/// Silent endpoints are dropped. Survivors come back fastest first; an empty
/// result is a normal outcome.
pub async fn filter_reachable<P>(
    endpoints: &[Endpoint],
    per_probe: Duration,
    probe_count: u32,
    width: usize,
    prober: Arc<P>,
) -> Vec<ReachabilityRecord>
where
    P: EchoProbe + ?Sized + 'static,
{
    let unique: BTreeSet<Endpoint> = endpoints.iter().copied().collect();
    let jobs: Vec<Endpoint> = unique
        .iter()
        .flat_map(|&e| std::iter::repeat(e).take(probe_count as usize))
        .collect();
    if jobs.is_empty() { return Vec::new(); }
    debug!(probes = jobs.len(), width, "reachability filter starting");

    let report = run_bounded(jobs, width, move |endpoint| {
        let prober = prober.clone();
        async move { prober.echo(endpoint, per_probe).await.map(|rtt| (endpoint, rtt)) }
    })
    .await;

    let mut answered: BTreeMap<Endpoint, (Duration, u32)> = BTreeMap::new();
    for (endpoint, rtt) in report.results {
        let slot = answered.entry(endpoint).or_insert((Duration::ZERO, 0));
        slot.0 += rtt;
        slot.1 += 1;
    }

    let mut alive: Vec<ReachabilityRecord> = answered
        .into_iter()
        .map(|(endpoint, (sum, replies))| ReachabilityRecord { endpoint, rtt: sum / replies, replies })
        .collect();
    alive.sort_by(|a, b| a.rtt.cmp(&b.rtt).then_with(|| a.endpoint.cmp(&b.endpoint)));
    debug!(probed = unique.len(), alive = alive.len(), "reachability filter done");
    alive
}

/// Mean rtt to `anchor`, or `None` if it never answered.
pub async fn assess_network_quality<P>(
    prober: Arc<P>,
    anchor: IpAddr,
    probe_count: u32,
    per_probe: Duration,
) -> Option<Duration>
where
    P: EchoProbe + ?Sized + 'static,
{
    let rec = filter_reachable(&[Endpoint(anchor)], per_probe, probe_count, probe_count as usize, prober).await;
    let rtt = rec.first().map(|r| r.rtt);
    info!(%anchor, rtt_ms = rtt.map(|d| d.as_millis() as u64), "network quality probe");
    rtt
}

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use host_discovery::{
    assess_network_quality, curated_endpoints, filter_reachable, parse_endpoints, sample_provider_v6, EchoProbe, IcmpEcho,
    TcpEcho, QUALITY_ANCHOR,
};
use identity::store::DEFAULT_IDENTITY_PATH;
use identity::{
    BackoffPolicy, HttpTransport, Identity, IdentityStore, Registrar, RegistrationTransport, ATTEMPT_TIMEOUT,
    DEFAULT_REGISTRATION_URL,
};
use port_scan::{parse_ports, tunnel_ports, UdpHandshake};
use scout_core::settings::DEFAULT_PROBE_COUNT;
use scout_core::{JitterSource, ReachabilityRecord, ScanSettings, ScoredPort, Tuning};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod pipeline;

use config::EchoMode;
use pipeline::Discovery;

/// Endpoint lists given as CIDR are capped at this many addresses each.
const CIDR_EXPANSION_LIMIT: usize = 4096;
const DEFAULT_IPV6_SAMPLE: usize = 100;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

/// Needs a running tokio runtime for the ICMP sockets.
fn echo_probe(mode: EchoMode, tcp_port: Option<u16>) -> Result<Arc<dyn EchoProbe>> {
    Ok(match mode {
        EchoMode::Icmp => Arc::new(IcmpEcho::new().context("opening ICMP echo socket (use --echo tcp to avoid ICMP)")?),
        EchoMode::Tcp => Arc::new(tcp_port.map(|port| TcpEcho { port }).unwrap_or_default()),
    })
}

#[derive(Debug, Clone, Args)]
struct IdentityArgs {
    /// Identity file (JSON). Default: ./warp-identity.json
    #[arg(long, value_name = "FILE")]
    identity: Option<PathBuf>,
    /// Registration API endpoint
    #[arg(long)]
    registration_url: Option<String>,
    /// Per-attempt registration timeout in milliseconds
    #[arg(long)]
    attempt_timeout_ms: Option<u64>,
    /// Maximum registration attempts
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl IdentityArgs {
    fn merge(mut self, cfg: Option<&config::IdentityConfig>) -> Self {
        if let Some(c) = cfg {
            if self.identity.is_none() { self.identity = c.path.clone(); }
            if self.registration_url.is_none() { self.registration_url = c.registration_url.clone(); }
            if self.attempt_timeout_ms.is_none() { self.attempt_timeout_ms = c.attempt_timeout_ms; }
            if self.max_attempts.is_none() { self.max_attempts = c.max_attempts; }
        }
        self
    }

    fn store(&self) -> IdentityStore {
        IdentityStore::new(self.identity.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_PATH)))
    }

    fn registrar(&self) -> Result<Registrar<HttpTransport>> {
        let url = self.registration_url.clone().unwrap_or_else(|| DEFAULT_REGISTRATION_URL.to_string());
        let per_attempt = self.attempt_timeout_ms.map(Duration::from_millis).unwrap_or(ATTEMPT_TIMEOUT);
        let transport = HttpTransport::new(url, per_attempt)?;
        let mut policy = BackoffPolicy::default();
        if let Some(n) = self.max_attempts {
            if n == 0 { return Err(anyhow!("--max-attempts must be > 0")); }
            policy.max_attempts = n;
        }
        Ok(Registrar::new(transport).with_policy(policy))
    }
}

#[derive(Debug, Clone, Args)]
struct DiscoveryArgs {
    /// Endpoints: addresses or CIDR ranges, comma-separated. Default: curated provider list.
    #[arg(long, value_delimiter = ',', conflicts_with = "ipv6")]
    endpoints: Vec<String>,
    /// Probe a random sample of the provider's IPv6 ranges instead
    #[arg(long)]
    ipv6: bool,
    /// Sample size for --ipv6
    #[arg(long)]
    ipv6_sample: Option<usize>,
    /// Ports: comma/range list (e.g., 500,854,2408 or 850-900). Default: known tunnel ports.
    #[arg(long)]
    ports: Option<String>,
    /// Echo probes per endpoint
    #[arg(long)]
    probe_count: Option<u32>,
    /// Echo mechanism for the reachability stage (default: icmp)
    #[arg(long, value_enum)]
    echo: Option<EchoMode>,
    /// TCP port used by --echo tcp
    #[arg(long)]
    echo_port: Option<u16>,
    /// Echo timeout in milliseconds (default derived from network quality)
    #[arg(long)]
    echo_timeout_ms: Option<u64>,
    /// Echo probes in flight at once
    #[arg(long)]
    echo_workers: Option<usize>,
    /// Per-port handshake timeout in milliseconds (default derived from network quality)
    #[arg(long)]
    port_timeout_ms: Option<u64>,
    /// Concurrent port handshakes (default derived from network quality)
    #[arg(long)]
    workers: Option<usize>,
    /// Reachable endpoints carried into the port scan
    #[arg(long)]
    survivors: Option<usize>,
    /// Skip the network-quality probe and use default tuning
    #[arg(long, default_value_t = false)]
    skip_quality: bool,
}

impl DiscoveryArgs {
    fn merge(mut self, cfg: Option<&config::DiscoveryConfig>) -> Self {
        if let Some(c) = cfg {
            if self.endpoints.is_empty() { self.endpoints = c.endpoints.clone().unwrap_or_default(); }
            if !self.ipv6 { self.ipv6 = c.ipv6.unwrap_or(false) && self.endpoints.is_empty(); }
            if self.ipv6_sample.is_none() { self.ipv6_sample = c.ipv6_sample; }
            if self.ports.is_none() { self.ports = c.ports.clone(); }
            if self.probe_count.is_none() { self.probe_count = c.probe_count; }
            if self.echo.is_none() { self.echo = c.echo; }
            if self.echo_port.is_none() { self.echo_port = c.echo_port; }
            if self.echo_workers.is_none() { self.echo_workers = c.echo_workers; }
            if self.echo_timeout_ms.is_none() { self.echo_timeout_ms = c.echo_timeout_ms; }
            if self.port_timeout_ms.is_none() { self.port_timeout_ms = c.port_timeout_ms; }
            if self.workers.is_none() { self.workers = c.workers; }
            if self.survivors.is_none() { self.survivors = c.survivors; }
        }
        self
    }

    fn echo(&self) -> Result<Arc<dyn EchoProbe>> {
        echo_probe(self.echo.unwrap_or_default(), self.echo_port)
    }

    async fn tuning(&self, echo: Arc<dyn EchoProbe>) -> Tuning {
        if self.skip_quality {
            return Tuning::default();
        }
        let rtt = assess_network_quality(echo, QUALITY_ANCHOR, DEFAULT_PROBE_COUNT, Duration::from_secs(2)).await;
        let tuning = Tuning::from_anchor_rtt(rtt);
        info!(quality = %tuning.quality, workers = tuning.workers, port_timeout_ms = tuning.port_timeout.as_millis() as u64, "network tuning");
        tuning
    }

    /// Build and validate settings from the arguments alone, with default tuning.
    /// Touches no network.
    fn settings(&self) -> Result<ScanSettings> {
        let endpoints = if self.ipv6 {
            sample_provider_v6(self.ipv6_sample.unwrap_or(DEFAULT_IPV6_SAMPLE), &mut rand::thread_rng())
        } else if !self.endpoints.is_empty() {
            parse_endpoints(&self.endpoints, CIDR_EXPANSION_LIMIT)?
        } else {
            curated_endpoints()
        };
        let ports = match &self.ports {
            Some(spec) => parse_ports(spec)?,
            None => tunnel_ports(),
        };
        let mut s = ScanSettings::new(endpoints, ports, &Tuning::default());
        self.apply_overrides(&mut s);
        s.validate()?;
        Ok(s)
    }

    /// Take the measured tuning; explicit arguments still win.
    fn retune(&self, s: &mut ScanSettings, tuning: &Tuning) -> Result<()> {
        s.apply_tuning(tuning);
        self.apply_overrides(s);
        s.validate()?;
        Ok(())
    }

    fn apply_overrides(&self, s: &mut ScanSettings) {
        if let Some(n) = self.probe_count { s.probe_count = n; }
        if let Some(ms) = self.echo_timeout_ms { s.echo_timeout = Duration::from_millis(ms); }
        if let Some(n) = self.echo_workers { s.echo_workers = n; }
        if let Some(ms) = self.port_timeout_ms { s.port_timeout = Duration::from_millis(ms); }
        if let Some(n) = self.workers { s.workers = n; }
        if let Some(n) = self.survivors { s.survivor_limit = n; }
    }
}

/// Validate the arguments, then secure an identity, then measure the network.
/// Bad input never reaches the registration API, and no probe is sent without
/// an identity.
async fn prepare_scan<T: RegistrationTransport>(
    disc: &DiscoveryArgs,
    store: &IdentityStore,
    registrar: &Registrar<T>,
    echo: Arc<dyn EchoProbe>,
) -> Result<(Identity, Tuning, ScanSettings)> {
    let mut settings = disc.settings()?;
    let identity = store
        .load_or_create(registrar)
        .await
        .context("identity provisioning failed; scan not started")?;
    let tuning = disc.tuning(echo).await;
    disc.retune(&mut settings, &tuning)?;
    Ok((identity, tuning, settings))
}

#[derive(Debug, Parser)]
#[command(name = "warp-scout", version, about = "Find the fastest tunnel endpoints and provision a client identity")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./warp-scout.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Measure the local network and show the derived tuning
    Quality {
        /// Echo mechanism (default: icmp)
        #[arg(long, value_enum)]
        echo: Option<EchoMode>,
        /// TCP port used by --echo tcp
        #[arg(long)]
        echo_port: Option<u16>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Load the stored identity, or register a new one
    Identity {
        #[command(flatten)]
        id: IdentityArgs,
        /// Discard any stored identity and register a fresh one
        #[arg(long, default_value_t = false)]
        regenerate: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Reachability stage only: list endpoints that answer echo probes
    Discover {
        #[command(flatten)]
        disc: DiscoveryArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Full run: provision identity, filter endpoints, scan ports, rank
    Scan {
        #[command(flatten)]
        id: IdentityArgs,
        #[command(flatten)]
        disc: DiscoveryArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Write the shortlist as CSV (requires --out)
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn open_out(out: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match out {
        Some(p) => Box::new(BufWriter::new(File::create(p).with_context(|| format!("creating {}", p.display()))?)),
        None => Box::new(std::io::stdout().lock()),
    })
}

/// What the config generator consumes: one identity plus the ranked shortlist.
#[derive(Serialize)]
struct Handoff<'a> {
    generated_at: String,
    identity: &'a Identity,
    /// Decoded client id, carried as `reserved` by some client formats.
    reserved: Option<Vec<u8>>,
    tuning: &'a Tuning,
    shortlist: &'a [ScoredPort],
}

fn rtt_ms(r: &ReachabilityRecord) -> f64 {
    r.rtt.as_secs_f64() * 1000.0
}

fn write_identity(w: &mut dyn Write, id: &Identity, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(w, "client_id:   {}", id.client_id)?;
            writeln!(w, "public_key:  {}", id.public_key)?;
            writeln!(w, "peer_key:    {}", id.peer_public_key)?;
            writeln!(w, "address_v4:  {}", id.tunnel_address_v4)?;
            writeln!(w, "address_v6:  {}", id.tunnel_address_v6)?;
            writeln!(w, "issued_at:   {}", id.issued_at)?;
        }
        OutputFormat::Json => writeln!(w, "{}", serde_json::to_string_pretty(id)?)?,
        OutputFormat::Jsonl => writeln!(w, "{}", serde_json::to_string(id)?)?,
    }
    Ok(())
}

fn write_survivors(w: &mut dyn Write, probed: usize, survivors: &[ReachabilityRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if survivors.is_empty() {
                writeln!(w, "no reachable endpoints ({} probed)", probed)?;
            }
            for (i, r) in survivors.iter().enumerate() {
                writeln!(w, "#{:<3} {:<40} {:>8.2} ms  ({} replies)", i + 1, r.endpoint, rtt_ms(r), r.replies)?;
            }
        }
        OutputFormat::Json => {
            let rows: Vec<_> = survivors
                .iter()
                .map(|r| serde_json::json!({ "endpoint": r.endpoint, "rtt_ms": rtt_ms(r), "replies": r.replies }))
                .collect();
            let obj = serde_json::json!({ "probed": probed, "alive": rows });
            writeln!(w, "{}", serde_json::to_string_pretty(&obj)?)?;
        }
        OutputFormat::Jsonl => {
            for r in survivors {
                let obj = serde_json::json!({ "endpoint": r.endpoint, "rtt_ms": rtt_ms(r), "replies": r.replies });
                writeln!(w, "{}", serde_json::to_string(&obj)?)?;
            }
        }
    }
    Ok(())
}

fn write_shortlist_csv(path: &Path, shortlist: &[ScoredPort]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(File::create(path)?);
    wtr.write_record(["rank", "endpoint", "port", "latency_ms", "loss_pct", "jitter_ms", "jitter_source", "score"])?;
    for (i, s) in shortlist.iter().enumerate() {
        let source = match s.probe.jitter { JitterSource::Measured => "measured", JitterSource::Synthetic => "synthetic" };
        wtr.write_record([
            (i + 1).to_string(),
            s.probe.endpoint.to_string(),
            s.probe.port.to_string(),
            format!("{:.3}", s.probe.latency_ms),
            format!("{:.1}", s.probe.loss_pct),
            format!("{:.3}", s.probe.jitter_ms),
            source.to_string(),
            format!("{:.3}", s.score),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_scan(
    outcome: &Discovery,
    settings: &ScanSettings,
    identity: &Identity,
    tuning: &Tuning,
    format: OutputFormat,
    out: Option<&Path>,
    csv: bool,
) -> Result<()> {
    let shortlist = match outcome {
        Discovery::Shortlist { shortlist, .. } => shortlist.as_slice(),
        _ => &[],
    };
    if let (true, Some(path)) = (csv, out) {
        write_shortlist_csv(path, shortlist)?;
        match outcome {
            Discovery::NoReachableEndpoints => println!("no reachable endpoints; wrote empty shortlist"),
            Discovery::NoViablePorts { .. } => println!("no viable ports; wrote empty shortlist"),
            Discovery::Shortlist { .. } => {}
        }
        return Ok(());
    }
    let mut w = open_out(out)?;
    match format {
        OutputFormat::Text => match outcome {
            Discovery::NoReachableEndpoints => {
                writeln!(w, "no reachable endpoints ({} probed); nothing to scan", settings.endpoints.len())?;
            }
            Discovery::NoViablePorts { survivors, submitted } => {
                writeln!(w, "no viable ports ({} endpoints alive, {} pairs probed)", survivors.len(), submitted)?;
            }
            Discovery::Shortlist { survivors, submitted, shortlist } => {
                writeln!(
                    w,
                    "{} endpoints alive, {} pairs probed, network {} ({} workers)",
                    survivors.len(),
                    submitted,
                    tuning.quality,
                    settings.workers
                )?;
                let mut synthetic = false;
                for (i, s) in shortlist.iter().enumerate() {
                    let mark = if s.probe.jitter == JitterSource::Synthetic { synthetic = true; "*" } else { " " };
                    writeln!(
                        w,
                        "#{:<3} {:<46} latency {:>8.2} ms  jitter {:>5.2} ms{}  score {:>7.2}",
                        i + 1,
                        s.probe.endpoint.socket_addr(s.probe.port),
                        s.probe.latency_ms,
                        s.probe.jitter_ms,
                        mark,
                        s.score
                    )?;
                }
                if synthetic {
                    writeln!(w, "* jitter is a placeholder from a single-packet probe, not a measurement")?;
                }
                writeln!(w)?;
                write_identity(&mut w, identity, OutputFormat::Text)?;
            }
        },
        OutputFormat::Json => {
            let status = match outcome {
                Discovery::NoReachableEndpoints => "no_reachable_endpoints",
                Discovery::NoViablePorts { .. } => "no_viable_ports",
                Discovery::Shortlist { .. } => "ok",
            };
            let handoff = Handoff {
                generated_at: now_rfc3339(),
                identity,
                reserved: identity.client_id_bytes(),
                tuning,
                shortlist,
            };
            let mut obj = serde_json::to_value(&handoff)?;
            obj["status"] = serde_json::Value::from(status);
            writeln!(w, "{}", serde_json::to_string_pretty(&obj)?)?;
        }
        OutputFormat::Jsonl => {
            for s in shortlist {
                writeln!(w, "{}", serde_json::to_string(s)?)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded_cfg = config::load_config(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| loaded_cfg.as_ref().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_tracing(&level);
    let disc_cfg = loaded_cfg.as_ref().and_then(|c| c.discovery.as_ref());
    let id_cfg = loaded_cfg.as_ref().and_then(|c| c.identity.as_ref());

    match cli.command {
        Commands::Version => {
            println!("warp-scout {} (core {})", env!("CARGO_PKG_VERSION"), scout_core::version());
        }
        Commands::Quality { echo, echo_port, format } => {
            let mode = echo.or(disc_cfg.and_then(|c| c.echo)).unwrap_or_default();
            let port = echo_port.or(disc_cfg.and_then(|c| c.echo_port));
            let rt = tokio::runtime::Runtime::new()?;
            let rtt = rt.block_on(async {
                let echo = echo_probe(mode, port)?;
                Ok::<_, anyhow::Error>(
                    assess_network_quality(echo, QUALITY_ANCHOR, DEFAULT_PROBE_COUNT, Duration::from_secs(2)).await,
                )
            })?;
            let tuning = Tuning::from_anchor_rtt(rtt);
            match format {
                OutputFormat::Text => match tuning.anchor_rtt_ms {
                    Some(ms) => println!(
                        "{}: {:.0} ms to {} -> echo timeout {} ms, port timeout {} ms, {} workers",
                        tuning.quality,
                        ms,
                        QUALITY_ANCHOR,
                        tuning.echo_timeout.as_millis(),
                        tuning.port_timeout.as_millis(),
                        tuning.workers
                    ),
                    None => println!("{} did not answer; using default tuning ({} workers)", QUALITY_ANCHOR, tuning.workers),
                },
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tuning)?),
                OutputFormat::Jsonl => println!("{}", serde_json::to_string(&tuning)?),
            }
        }
        Commands::Identity { id, regenerate, format } => {
            let id = id.merge(id_cfg);
            let store = id.store();
            let registrar = id.registrar()?;
            let rt = tokio::runtime::Runtime::new()?;
            let identity = rt.block_on(async {
                if regenerate { store.regenerate(&registrar).await } else { store.load_or_create(&registrar).await }
            })?;
            write_identity(&mut std::io::stdout().lock(), &identity, format)?;
        }
        Commands::Discover { disc, format, out } => {
            let disc = disc.merge(disc_cfg);
            let rt = tokio::runtime::Runtime::new()?;
            let (probed, survivors) = rt.block_on(async {
                let mut settings = disc.settings()?;
                let echo = disc.echo()?;
                let tuning = disc.tuning(echo.clone()).await;
                disc.retune(&mut settings, &tuning)?;
                let survivors = filter_reachable(
                    &settings.endpoints,
                    settings.echo_timeout,
                    settings.probe_count,
                    settings.echo_workers,
                    echo,
                )
                .await;
                Ok::<_, anyhow::Error>((settings.endpoints.len(), survivors))
            })?;
            let mut w = open_out(out.as_deref())?;
            write_survivors(&mut w, probed, &survivors, format)?;
            w.flush()?;
        }
        Commands::Scan { id, disc, format, out, csv } => {
            if csv && out.is_none() {
                return Err(anyhow!("--csv requires --out <file>"));
            }
            let id = id.merge(id_cfg);
            let disc = disc.merge(disc_cfg);
            let store = id.store();
            let registrar = id.registrar()?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let echo = disc.echo()?;
                let (identity, tuning, settings) = prepare_scan(&disc, &store, &registrar, echo.clone()).await?;
                info!(bound_s = settings.scan_time_bound().as_secs(), "port scan time bound");
                let start = Instant::now();
                let outcome = pipeline::discover(&settings, echo, Arc::new(UdpHandshake)).await;
                info!(elapsed_ms = start.elapsed().as_millis() as u64, "discovery finished");
                write_scan(&outcome, &settings, &identity, &tuning, format, out.as_deref(), csv)
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use identity::{RegistrationRequest, TransportError};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegistrationTransport for CountingTransport {
        async fn post(&self, _request: &RegistrationRequest) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "id": "t.1",
                "config": {
                    "client_id": "AQID",
                    "peers": [{ "public_key": "bmXOC+F1FxEMF9dyiK2H5/1SUtzH0JuVo51h2wPfgyo=" }],
                    "interface": { "addresses": { "v4": "172.16.0.2", "v6": "2606:4700:110:8a36::2" } }
                }
            }))
        }
    }

    struct Silent;

    #[async_trait]
    impl EchoProbe for Silent {
        async fn echo(&self, _endpoint: scout_core::Endpoint, _timeout: Duration) -> Option<Duration> {
            None
        }
    }

    #[derive(Debug, Parser)]
    struct DiscoveryCli {
        #[command(flatten)]
        disc: DiscoveryArgs,
    }

    fn disc(args: &[&str]) -> DiscoveryArgs {
        DiscoveryCli::try_parse_from(std::iter::once("scan").chain(args.iter().copied())).unwrap().disc
    }

    #[tokio::test]
    async fn invalid_arguments_stop_before_registration() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id.json"));
        let registrar = Registrar::new(CountingTransport::default());
        for args in [&["--ports", "0"][..], &["--endpoints", "10.0.0.0/33"], &["--workers", "0"]] {
            let err = prepare_scan(&disc(args), &store, &registrar, Arc::new(Silent)).await;
            assert!(err.is_err(), "{:?}", args);
        }
        assert_eq!(registrar.transport().calls.load(Ordering::SeqCst), 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn explicit_arguments_survive_retuning() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id.json"));
        let registrar = Registrar::new(CountingTransport::default());
        let args = disc(&["--endpoints", "10.0.0.1", "--ports", "500", "--port-timeout-ms", "700", "--echo-workers", "8"]);
        let (identity, tuning, settings) = prepare_scan(&args, &store, &registrar, Arc::new(Silent)).await.unwrap();
        assert_eq!(registrar.transport().calls.load(Ordering::SeqCst), 1);
        assert_eq!(identity.client_id, "AQID");
        // the anchor never answered: default tuning for everything not given
        assert_eq!(tuning.anchor_rtt_ms, None);
        assert_eq!(settings.workers, Tuning::default().workers);
        assert_eq!(settings.port_timeout, Duration::from_millis(700));
        assert_eq!(settings.echo_workers, 8);
    }

    #[test]
    fn echo_defaults_to_icmp() {
        assert_eq!(disc(&[]).echo, None);
        assert_eq!(disc(&["--echo", "tcp"]).echo, Some(EchoMode::Tcp));
        assert_eq!(EchoMode::default(), EchoMode::Icmp);
    }
}

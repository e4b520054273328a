//! Strongly typed settings for one discovery run.

use crate::{Endpoint, Tuning, SHORTLIST_LEN};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PROBE_COUNT: u32 = 4;
pub const DEFAULT_SURVIVOR_LIMIT: usize = 30;
/// Echo probes in flight at once during the reachability stage.
pub const DEFAULT_ECHO_WORKERS: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("port list is empty")]
    NoPorts,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Built once per run and handed to each stage; nothing reads process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub endpoints: Vec<Endpoint>,
    pub ports: Vec<u16>,
    /// Echo probes per endpoint in the reachability stage.
    pub probe_count: u32,
    pub echo_timeout: Duration,
    pub echo_workers: usize,
    pub port_timeout: Duration,
    pub workers: usize,
    /// Reachable endpoints carried into the port scan.
    pub survivor_limit: usize,
    pub shortlist_len: usize,
}

impl ScanSettings {
    /// Endpoints are de-duplicated; ports keep their given order minus repeats.
    pub fn new(mut endpoints: Vec<Endpoint>, ports: Vec<u16>, tuning: &Tuning) -> Self {
        endpoints.sort_unstable();
        endpoints.dedup();
        let mut seen = std::collections::HashSet::new();
        let ports = ports.into_iter().filter(|p| seen.insert(*p)).collect();
        ScanSettings {
            endpoints,
            ports,
            probe_count: DEFAULT_PROBE_COUNT,
            echo_timeout: tuning.echo_timeout,
            echo_workers: DEFAULT_ECHO_WORKERS,
            port_timeout: tuning.port_timeout,
            workers: tuning.workers,
            survivor_limit: DEFAULT_SURVIVOR_LIMIT,
            shortlist_len: SHORTLIST_LEN,
        }
    }

    /// Re-derive timeouts and scan width, e.g. after a fresh network-quality probe.
    pub fn apply_tuning(&mut self, tuning: &Tuning) {
        self.echo_timeout = tuning.echo_timeout;
        self.port_timeout = tuning.port_timeout;
        self.workers = tuning.workers;
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.ports.is_empty() { return Err(SettingsError::NoPorts); }
        if self.probe_count == 0 { return Err(SettingsError::Zero("probe count")); }
        if self.echo_timeout.is_zero() { return Err(SettingsError::Zero("echo timeout")); }
        if self.echo_workers == 0 { return Err(SettingsError::Zero("echo width")); }
        if self.port_timeout.is_zero() { return Err(SettingsError::Zero("port timeout")); }
        if self.workers == 0 { return Err(SettingsError::Zero("worker count")); }
        if self.survivor_limit == 0 { return Err(SettingsError::Zero("survivor limit")); }
        if self.shortlist_len == 0 { return Err(SettingsError::Zero("shortlist length")); }
        Ok(())
    }

    /// Upper bound on the port-scan stage: waves of `workers` tasks, each capped by `port_timeout`.
    pub fn scan_time_bound(&self) -> Duration {
        let e = self.endpoints.len().min(self.survivor_limit);
        let tasks = e * self.ports.len();
        let waves = tasks.div_ceil(self.workers.max(1)) as u32;
        self.port_timeout * waves
    }
}

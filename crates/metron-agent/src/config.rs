use anyhow::{anyhow, Context};
use metron_common::retry::{Backoff, DEFAULT_BACKOFF_SECS};
use serde::Deserialize;
use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Grpc,
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "grpc" => Ok(TransportKind::Grpc),
            other => Err(anyhow!("unknown transport '{other}', expected http or grpc")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Collector HTTP address, `host:port` or a full URL.
    #[serde(default = "default_server_endpoint")]
    pub server_endpoint: String,
    /// Collector gRPC address.
    #[serde(default = "default_grpc_endpoint")]
    pub grpc_endpoint: String,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Defaults to four jobs per worker.
    pub queue_capacity: Option<usize>,
    /// Metrics per gRPC call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: Vec<u64>,
    /// Address announced to the collector for subnet checks. Detected from
    /// the outbound route when unset.
    pub real_ip: Option<String>,
}

fn default_server_endpoint() -> String {
    "localhost:8080".to_string()
}

fn default_grpc_endpoint() -> String {
    "localhost:3200".to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Http
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_num_workers() -> usize {
    3
}

fn default_batch_size() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    5
}

fn default_retry_backoff() -> Vec<u64> {
    DEFAULT_BACKOFF_SECS.to_vec()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_endpoint: default_server_endpoint(),
            grpc_endpoint: default_grpc_endpoint(),
            transport: default_transport(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            num_workers: default_num_workers(),
            queue_capacity: None,
            batch_size: default_batch_size(),
            request_timeout_secs: default_request_timeout(),
            retry_backoff_secs: default_retry_backoff(),
            real_ip: None,
        }
    }
}

impl AgentConfig {
    /// Reads `path`, falling back to defaults when the file does not exist,
    /// then applies `METRON_*` environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            toml::from_str(&content).with_context(|| format!("Failed to parse {path}"))?
        } else {
            tracing::warn!(path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from variables returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("METRON_SERVER_ENDPOINT") {
            self.server_endpoint = v;
        }
        if let Some(v) = lookup("METRON_GRPC_ENDPOINT") {
            self.grpc_endpoint = v;
        }
        if let Some(v) = lookup("METRON_TRANSPORT") {
            self.transport = v.parse()?;
        }
        override_parsed(&lookup, "METRON_POLL_INTERVAL", &mut self.poll_interval_secs)?;
        override_parsed(&lookup, "METRON_REPORT_INTERVAL", &mut self.report_interval_secs)?;
        override_parsed(&lookup, "METRON_NUM_WORKERS", &mut self.num_workers)?;
        override_parsed(&lookup, "METRON_BATCH_SIZE", &mut self.batch_size)?;
        if let Some(v) = lookup("METRON_REAL_IP") {
            self.real_ip = Some(v);
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 || self.report_interval_secs == 0 {
            return Err(anyhow!("poll and report intervals must be positive"));
        }
        if self.num_workers == 0 {
            return Err(anyhow!("num_workers must be positive"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.num_workers * 4).max(1)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from_secs(&self.retry_backoff_secs)
    }

    /// The endpoint the configured transport talks to.
    pub fn active_endpoint(&self) -> &str {
        match self.transport {
            TransportKind::Http => &self.server_endpoint,
            TransportKind::Grpc => &self.grpc_endpoint,
        }
    }

    /// The configured `real_ip`, or the local address of the route towards
    /// the collector.
    pub fn resolve_real_ip(&self) -> Option<String> {
        if let Some(ip) = &self.real_ip {
            return Some(ip.clone());
        }
        match outbound_ip(self.active_endpoint()) {
            Ok(ip) => Some(ip.to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot detect outbound address, sending without X-Real-IP");
                None
            }
        }
    }
}

fn override_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .parse()
            .map_err(|e| anyhow!("{key}={raw} is invalid: {e}"))?;
    }
    Ok(())
}

/// Connecting a UDP socket sends nothing but makes the kernel pick the
/// source address for that destination.
fn outbound_ip(endpoint: &str) -> anyhow::Result<IpAddr> {
    let host_port = endpoint
        .split("://")
        .last()
        .unwrap_or(endpoint)
        .trim_end_matches('/');
    let target = host_port
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {host_port}"))?
        .next()
        .ok_or_else(|| anyhow!("{host_port} resolved to nothing"))?;
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

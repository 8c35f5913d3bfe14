//! Service configuration from environment variables
//!
//! Every setting has a default. A variable that is set but cannot be parsed
//! is an error rather than a silent fallback.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use types::errors::IdError;
use types::ids::ProviderId;

use crate::pipeline::{PipelineConfig, DEFAULT_LOCK_TIMEOUT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var}: {source}")]
    Id {
        var: &'static str,
        #[source]
        source: IdError,
    },
}

/// Where the ingestion server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl FromStr for ListenAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err("empty socket path".to_string());
            }
            Ok(ListenAddr::Unix(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix("tcp:") {
            addr.parse()
                .map(ListenAddr::Tcp)
                .map_err(|e| format!("{}", e))
        } else {
            Err("expected unix:<path> or tcp:<host:port>".to_string())
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
            ListenAddr::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Ingestion server limits.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub max_in_flight: u32,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1024,
            max_frame_bytes: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub listen: ListenAddr,
    pub routing_table: PathBuf,
    pub provider_id: ProviderId,
    /// REST ledger base URL; `None` runs against an in-process ledger.
    pub ledger_url: Option<String>,
    pub ledger_timeout: Duration,
    pub lock_timeout: Duration,
    pub max_in_flight: u32,
    pub max_frame_bytes: usize,
    /// Zero disables the periodic metrics line.
    pub metrics_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            listen: ListenAddr::Unix(PathBuf::from("/tmp/usage-aggregator.sock")),
            routing_table: PathBuf::from("config/routing.json"),
            provider_id: default_provider(),
            ledger_url: None,
            ledger_timeout: Duration::from_millis(5_000),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_in_flight: server.max_in_flight,
            max_frame_bytes: server.max_frame_bytes,
            metrics_interval: Duration::from_secs(30),
        }
    }
}

fn default_provider() -> ProviderId {
    match ProviderId::new("1") {
        Ok(id) => id,
        Err(_) => unreachable!("literal provider id is valid"),
    }
}

impl AggregatorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `USAGE_LISTEN` (default: unix:/tmp/usage-aggregator.sock)
    /// - `USAGE_ROUTING_TABLE` (default: config/routing.json)
    /// - `USAGE_PROVIDER_ID` (default: 1)
    /// - `USAGE_LEDGER_URL` (default: unset, in-process ledger)
    /// - `USAGE_LEDGER_TIMEOUT_MS` (default: 5000)
    /// - `USAGE_LOCK_TIMEOUT_MS` (default: 30000)
    /// - `USAGE_MAX_IN_FLIGHT` (default: 1024)
    /// - `USAGE_MAX_FRAME_BYTES` (default: 4096)
    /// - `USAGE_METRICS_INTERVAL_SECS` (default: 30, 0 disables)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let provider_id = match lookup("USAGE_PROVIDER_ID") {
            Some(value) => ProviderId::new(value).map_err(|source| ConfigError::Id {
                var: "USAGE_PROVIDER_ID",
                source,
            })?,
            None => defaults.provider_id,
        };

        Ok(Self {
            listen: parsed(&lookup, "USAGE_LISTEN")?.unwrap_or(defaults.listen),
            routing_table: lookup("USAGE_ROUTING_TABLE")
                .map(PathBuf::from)
                .unwrap_or(defaults.routing_table),
            provider_id,
            ledger_url: lookup("USAGE_LEDGER_URL").filter(|url| !url.is_empty()),
            ledger_timeout: positive(&lookup, "USAGE_LEDGER_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.ledger_timeout),
            lock_timeout: positive(&lookup, "USAGE_LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            max_in_flight: positive(&lookup, "USAGE_MAX_IN_FLIGHT")?
                .unwrap_or(defaults.max_in_flight),
            max_frame_bytes: positive(&lookup, "USAGE_MAX_FRAME_BYTES")?
                .unwrap_or(defaults.max_frame_bytes),
            metrics_interval: parsed(&lookup, "USAGE_METRICS_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.metrics_interval),
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            provider_id: self.provider_id.clone(),
            lock_timeout: self.lock_timeout,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_in_flight: self.max_in_flight,
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

fn parsed<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

/// Like [`parsed`] but zero is rejected: a zero bound or timeout would
/// stall or fail every record.
fn positive<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match parsed::<T, F>(lookup, var)? {
        Some(value) if value == T::default() => Err(ConfigError::Invalid {
            var,
            value: lookup(var).unwrap_or_default(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

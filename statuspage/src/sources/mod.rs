//! Source adapters polled by the collector.
//!
//! Each upstream exposes a single "sample now" operation:
//! - `SystemSource` : OS counters (CPU, memory, disk, network, uptime)
//! - `BalancerSource` : HAProxy admin socket (`show stat`)
//! - `ContainerSource` : container runtime (Docker Engine API)
//! - `HostProbe` : ICMP reachability of a LAN host
//!
//! Adapters apply their own I/O timeout and fail independently; the collector
//! never lets one failing adapter abort a tick.

pub mod docker;
pub mod haproxy;
pub mod probe;
pub mod system;

use crate::models::BackendStats;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),
}

/// Raw OS reading. Sub-readings that could not be taken are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSample {
    pub cpu_percent: Option<f64>,
    pub memory: Option<Usage>,
    pub disk: Option<Usage>,
    pub network: Option<NetReading>,
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub used: u64,
    pub total: u64,
}

impl Usage {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

/// Cumulative byte counters since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Counters plus the instant they were read. Rates are computed between two
/// readings, never between two tick boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetReading {
    pub counters: NetCounters,
    pub at: Instant,
}

/// One `BACKEND` row of the HAProxy stats CSV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Backend {
    pub name: String,
    pub status: String,
    pub active: bool,
    /// Seconds since the last UP/DOWN transition.
    pub last_change: Option<u64>,
    pub stats: BackendStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub name: String,
    /// Run state as reported by the runtime (`running`, `exited`, ...).
    pub state: String,
    /// Health-check status when the image defines one (`healthy`, `starting`, ...).
    pub health: Option<String>,
    pub started_at: Option<OffsetDateTime>,
}

#[async_trait]
pub trait SystemSource: Send {
    async fn sample(&mut self) -> Result<SystemSample, SourceError>;
}

#[async_trait]
pub trait BalancerSource: Send + Sync {
    async fn sample(&self) -> Result<Vec<Backend>, SourceError>;
}

#[async_trait]
pub trait ContainerSource: Send + Sync {
    async fn sample(&self) -> Result<Vec<ContainerInfo>, SourceError>;
}

#[async_trait]
pub trait HostProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn probe(&self) -> Result<(), SourceError>;
}

/// Whether a container runtime client could be created at startup.
/// Resolved once; the collector checks this instead of carrying an optional
/// handle around.
pub enum ContainerCapability {
    Available(Box<dyn ContainerSource>),
    Disabled(String),
}

impl ContainerCapability {
    pub fn is_available(&self) -> bool {
        matches!(self, ContainerCapability::Available(_))
    }
}

/// The complete set of adapters owned by the collector.
pub struct Sources {
    pub system: Box<dyn SystemSource>,
    pub balancer: Box<dyn BalancerSource>,
    pub containers: ContainerCapability,
    pub probes: Vec<Box<dyn HostProbe>>,
}

/// Runs `fut` with a deadline, mapping expiry to [`SourceError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, SourceError>
where
    F: std::future::Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(SourceError::Timeout(limit)),
    }
}

//! OS counters through `sysinfo`.

use super::{NetCounters, NetReading, SourceError, SystemSample, SystemSource, Usage};
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// Keeps the `sysinfo` handles alive between ticks so that CPU usage is
/// measured over the interval since the previous sample.
pub struct HostSystem {
    sys: System,
    disks: Disks,
    networks: Networks,
    primed: bool,
}

impl HostSystem {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            primed: false,
        }
    }

    fn root_disk(&self) -> Option<Usage> {
        self.disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .map(|d| {
                let total = d.total_space();
                Usage {
                    used: total.saturating_sub(d.available_space()),
                    total,
                }
            })
    }

    fn network_totals(&self) -> Option<NetCounters> {
        let mut seen = false;
        let mut totals = NetCounters::default();
        for (name, data) in self.networks.iter() {
            if name == "lo" || name.starts_with("lo0") {
                continue;
            }
            seen = true;
            totals.rx_bytes += data.total_received();
            totals.tx_bytes += data.total_transmitted();
        }
        seen.then_some(totals)
    }
}

impl Default for HostSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemSource for HostSystem {
    async fn sample(&mut self) -> Result<SystemSample, SourceError> {
        if !self.primed {
            // Le premier relevé CPU a besoin de deux refresh espacés
            self.sys.refresh_cpu_usage();
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            self.primed = true;
        }
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh_list();
        self.networks.refresh_list();
        let network = self.network_totals().map(|counters| NetReading {
            counters,
            at: Instant::now(),
        });

        let total_memory = self.sys.total_memory();
        let memory = (total_memory > 0).then(|| Usage {
            used: self.sys.used_memory(),
            total: total_memory,
        });

        let sample = SystemSample {
            cpu_percent: Some(self.sys.global_cpu_info().cpu_usage() as f64),
            memory,
            disk: self.root_disk(),
            network,
            uptime_secs: Some(System::uptime()),
        };
        debug!(?sample, "system sample");
        Ok(sample)
    }
}

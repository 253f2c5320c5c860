use super::{with_timeout, HostProbe, SourceError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Reachability check through the system `ping` binary (one echo request).
pub struct PingProbe {
    name: String,
    address: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(name: impl Into<String>, address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            timeout,
        }
    }

    async fn ping(&self) -> Result<(), SourceError> {
        let wait = self.timeout.as_secs().max(1).to_string();
        let output = Command::new("ping")
            .args(["-c", "1", "-W", wait.as_str(), self.address.as_str()])
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            debug!("ping {} failed: {}", self.address, stdout.trim());
            Err(SourceError::Unavailable(format!(
                "{} unreachable ({})",
                self.address, output.status
            )))
        }
    }
}

#[async_trait]
impl HostProbe for PingProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<(), SourceError> {
        // marge au-dessus du -W de ping pour le lancement du process
        with_timeout(self.timeout + Duration::from_secs(1), self.ping()).await
    }
}

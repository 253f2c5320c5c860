//! Container status from the local Docker Engine.

use super::{with_timeout, ContainerCapability, ContainerInfo, ContainerSource, SourceError};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::HealthStatusEnum;
use bollard::Docker;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub struct DockerSource {
    docker: Docker,
    timeout: Duration,
}

impl DockerSource {
    /// Resolves the container capability once at startup. A client that cannot
    /// be created disables container monitoring for the lifetime of the process.
    pub fn connect(timeout: Duration) -> ContainerCapability {
        match Docker::connect_with_local_defaults() {
            Ok(docker) => ContainerCapability::Available(Box::new(Self { docker, timeout })),
            Err(e) => {
                warn!("Failed to create Docker client: {}. Docker monitoring disabled.", e);
                ContainerCapability::Disabled(e.to_string())
            }
        }
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, SourceError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            let name = summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| container_name(n))
                .unwrap_or_else(|| short_id(&id).to_string());
            let mut info = ContainerInfo {
                name,
                state: summary.state.unwrap_or_default(),
                health: None,
                started_at: None,
            };

            // Un échec d'inspect garde le statut de la liste
            match self.docker.inspect_container(&id, None::<InspectContainerOptions>).await {
                Ok(inspect) => {
                    if let Some(state) = inspect.state {
                        info.health = state
                            .health
                            .and_then(|h| h.status)
                            .and_then(health_label);
                        info.started_at = state.started_at.as_deref().and_then(parse_started_at);
                    }
                }
                Err(e) => debug!("inspect {} failed: {}", info.name, e),
            }
            containers.push(info);
        }
        Ok(containers)
    }
}

#[async_trait]
impl ContainerSource for DockerSource {
    async fn sample(&self) -> Result<Vec<ContainerInfo>, SourceError> {
        with_timeout(self.timeout, self.list()).await
    }
}

fn container_name(raw: &str) -> String {
    raw.strip_prefix('/').unwrap_or(raw).to_string()
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn health_label(status: HealthStatusEnum) -> Option<String> {
    let label = match status {
        HealthStatusEnum::HEALTHY => "healthy",
        HealthStatusEnum::UNHEALTHY => "unhealthy",
        HealthStatusEnum::STARTING => "starting",
        // "none" = pas de healthcheck défini dans l'image
        HealthStatusEnum::NONE | HealthStatusEnum::EMPTY => return None,
    };
    Some(label.to_string())
}

/// Docker reports never-started containers as `0001-01-01T00:00:00Z`.
fn parse_started_at(raw: &str) -> Option<OffsetDateTime> {
    let ts = OffsetDateTime::parse(raw, &Rfc3339).ok()?;
    (ts.year() > 1970).then_some(ts)
}

/**
 * STATUSPAGE - Point d'entrée du collecteur de télémétrie
 *
 * RÔLE : Orchestration des modules : config, sources, store, collecteur,
 * broadcaster SSE et API HTTP.
 *
 * ARCHITECTURE : une tâche de collecte (ticker), une tâche de broadcast
 * (ticker indépendant), une tâche de rétention, une tâche par client SSE.
 * Arrêt propre sur Ctrl-C ou SIGTERM via un canal watch partagé.
 */

mod broadcast;
mod collector;
mod config;
mod format;
mod http;
mod models;
mod payload;
mod snapshot;
mod sources;
mod state;
mod store;

use crate::broadcast::Broadcaster;
use crate::collector::Collector;
use crate::config::{load_config, StatusConfig};
use crate::http::AppState;
use crate::sources::docker::DockerSource;
use crate::sources::haproxy::HaproxyClient;
use crate::sources::probe::PingProbe;
use crate::sources::system::HostSystem;
use crate::sources::{ContainerCapability, HostProbe, Sources};
use crate::state::SnapshotCell;
use crate::store::{spawn_retention_sweep, JsonLinesStore, SharedStore};

use anyhow::Context;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn build_sources(cfg: &StatusConfig) -> Sources {
    let containers = if cfg.docker.enabled {
        DockerSource::connect(Duration::from_secs(cfg.docker.timeout_secs.max(1)))
    } else {
        ContainerCapability::Disabled("disabled in config".into())
    };

    let probes = cfg
        .probes
        .iter()
        .map(|p| Box::new(PingProbe::new(&p.name, &p.address, cfg.probe_timeout())) as Box<dyn HostProbe>)
        .collect();

    Sources {
        system: Box::new(HostSystem::new()),
        balancer: Box::new(HaproxyClient::new(
            &cfg.haproxy.socket,
            Duration::from_secs(cfg.haproxy.timeout_secs.max(1)),
        )),
        containers,
        probes,
    }
}

/// Installs the Ctrl-C and SIGTERM handlers right away; the returned future
/// flips `tx` when either fires.
fn shutdown_signal(tx: watch::Sender<bool>) -> std::io::Result<impl Future<Output = ()>> {
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("[statuspage] failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("[statuspage] ctrl-c received"),
            _ = terminate.recv() => info!("[statuspage] SIGTERM received"),
        }
        info!("[statuspage] shutting down");
        let _ = tx.send(true);
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("statuspage=info")),
        )
        .init();

    let cfg = load_config().await;

    // store persistant
    let store: SharedStore = Arc::new(
        JsonLinesStore::open(&cfg.store.path)
            .with_context(|| format!("opening metrics store {}", cfg.store.path))?,
    );

    let sources = build_sources(&cfg);
    info!(
        "[statuspage] store {:?}, haproxy {}, docker {}, {} probes",
        cfg.store.path,
        cfg.haproxy.socket,
        if sources.containers.is_available() { "on" } else { "off" },
        sources.probes.len()
    );
    let cell = SnapshotCell::new();
    let broadcaster = Broadcaster::new(cell.clone(), cfg.client_queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = shutdown_signal(shutdown_tx).context("installing signal handlers")?;

    let collector = Collector::new(sources, store.clone(), cell.clone(), cfg.collect_interval());
    let collector_task = tokio::spawn(collector.run(shutdown_rx.clone()));
    let broadcast_task = tokio::spawn(
        broadcaster
            .clone()
            .run(cfg.broadcast_interval(), shutdown_rx.clone()),
    );
    let retention_task = spawn_retention_sweep(
        store.clone(),
        cfg.retention(),
        cfg.sweep_interval(),
        shutdown_rx.clone(),
    );

    let app = http::build_router(AppState {
        cell,
        store,
        broadcaster,
    });

    let ip = cfg
        .listen
        .parse::<IpAddr>()
        .with_context(|| format!("invalid listen address {}", cfg.listen))?;
    let addr = SocketAddr::new(ip, cfg.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("[statuspage] listening on http://{addr}");

    // les flux SSE se terminent quand le broadcaster ferme les files
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server")?;

    for (name, task) in [
        ("collector", collector_task),
        ("broadcaster", broadcast_task),
        ("retention", retention_task),
    ] {
        if let Err(e) = task.await {
            error!("[statuspage] {} task failed: {}", name, e);
        }
    }
    info!("[statuspage] stopped");
    Ok(())
}

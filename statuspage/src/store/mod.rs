/**
 * METRICS STORE - Persistance time-series des relevés du collecteur
 *
 * RÔLE :
 * Historique durable des métriques système et des statuts de services.
 * Une batch par tick, visible en entier ou pas du tout.
 *
 * FONCTIONNEMENT :
 * - MetricsStore trait = interface commune (batch_write / requêtes / health)
 * - JsonLinesStore = implémentation fichier (cache mémoire + JSON lines)
 * - spawn_retention_sweep = purge périodique des lignes plus vieilles que N jours
 *
 * Les erreurs d'écriture sont loggées par l'appelant et ne stoppent jamais
 * la collecte ; les erreurs de lecture remontent jusqu'à l'API HTTP.
 */

pub mod jsonl;

pub use jsonl::JsonLinesStore;

use crate::models::StoreBatch;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt store: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub kind: String,
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub service: String,
    pub status: String,
    pub details: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

pub trait MetricsStore: Send + Sync {
    /// Persists one tick. Either every row of the batch is stored or none is.
    fn batch_write(&self, batch: &StoreBatch) -> Result<(), StoreError>;

    /// Most recent status row of every service that ever reported.
    fn latest_status_per_entity(&self) -> Result<HashMap<String, StatusRecord>, StoreError>;

    /// Metric rows of `kind` newer than `window`, oldest first.
    fn history_since(&self, kind: &str, window: Duration) -> Result<Vec<MetricRecord>, StoreError>;

    /// Status rows of `service` newer than `window`, newest first.
    fn status_history(&self, service: &str, window: Duration) -> Result<Vec<StatusRecord>, StoreError>;

    fn ping(&self) -> Result<(), StoreError>;

    fn size_bytes(&self) -> Result<u64, StoreError>;

    /// Deletes every row older than `cutoff`, returns the number removed.
    fn delete_before(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError>;
}

pub type SharedStore = Arc<dyn MetricsStore>;

/// `now - window`, saturating at the Unix epoch for absurdly large windows.
pub(crate) fn cutoff_for(window: Duration) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    time::Duration::try_from(window)
        .ok()
        .and_then(|w| now.checked_sub(w))
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Purge au démarrage puis quotidienne (par défaut) des données au-delà de
/// la rétention.
pub fn spawn_retention_sweep(
    store: SharedStore,
    retention: Duration,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // premier tick immédiat : un redémarrage quotidien ne repousse pas la purge
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let store = store.clone();
                    let cutoff = cutoff_for(retention);
                    match tokio::task::spawn_blocking(move || store.delete_before(cutoff)).await {
                        Ok(Ok(removed)) => info!("[retention] removed {} rows older than {}", removed, cutoff),
                        Ok(Err(e)) => error!("[retention] cleanup error: {}", e),
                        Err(e) => error!("[retention] cleanup task failed: {}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

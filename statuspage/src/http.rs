/**
 * API HTTP STATUSPAGE - Surface HTTP du collecteur
 *
 * RÔLE :
 * Expose le snapshot courant, l'historique persistant et le flux live SSE
 * consommé par le dashboard.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, état partagé = cellule snapshot + store + broadcaster
 * - Routes : /api/status, /api/metrics, /events, /health
 * - /events : un abonnement broadcaster par client, désinscrit quand le
 *   transport se ferme (drop du stream)
 * - Les lectures du store tournent sur le pool bloquant ; une erreur de
 *   lecture est la seule qui remonte au client (500)
 */

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::parse_period;
use crate::format::format_secs;
use crate::models::{Connectivity, ServiceStatus, StoreHealth, SystemMetrics};
use crate::payload::SIGNALS_EVENT;
use crate::state::SnapshotCell;
use crate::store::{MetricRecord, SharedStore, StatusRecord, StoreError};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use time::format_description::well_known::Rfc3339;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub cell: SnapshotCell,
    pub store: SharedStore,
    pub broadcaster: Broadcaster,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/metrics", get(api_metrics))
        .route("/events", get(events))
        .with_state(app_state)
}

#[derive(Debug, Serialize)]
struct StatusView {
    services: Vec<ServiceStatus>,
    system: SystemMetrics,
    uptime: String,
    store: StoreHealth,
    connectivity: Connectivity,
    last_updated: Option<String>, // RFC3339, null avant la première collecte
}

// GET /api/status
async fn api_status(State(app): State<AppState>) -> Json<StatusView> {
    let snap = app.cell.current();
    Json(StatusView {
        services: snap.services.clone(),
        system: snap.system.clone(),
        uptime: format_secs(snap.system.uptime_secs),
        store: snap.store.clone(),
        connectivity: snap.connectivity.clone(),
        last_updated: snap.collected_at.and_then(|t| t.format(&Rfc3339).ok()),
    })
}

#[derive(Debug, Deserialize)]
struct MetricsParams {
    period: Option<String>,
}

#[derive(Debug, Serialize)]
struct MetricsView {
    cpu: Vec<MetricRecord>,
    memory: Vec<MetricRecord>,
    services: BTreeMap<String, Vec<StatusRecord>>,
}

fn error_response(code: StatusCode, msg: String) -> Response {
    (code, Json(serde_json::json!({ "error": msg }))).into_response()
}

// GET /api/metrics?period=24h
async fn api_metrics(State(app): State<AppState>, Query(params): Query<MetricsParams>) -> Response {
    let period = params.period.unwrap_or_else(|| "24h".into());
    let window = match parse_period(&period) {
        Ok(w) => w,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid period".into()),
    };

    let store = app.store.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<MetricsView, StoreError> {
        let cpu = store.history_since("cpu", window)?;
        let memory = store.history_since("memory", window)?;
        let mut services = BTreeMap::new();
        for name in store.latest_status_per_entity()?.into_keys() {
            let history = store.status_history(&name, window)?;
            services.insert(name, history);
        }
        Ok(MetricsView { cpu, memory, services })
    })
    .await;

    match result {
        Ok(Ok(view)) => Json(view).into_response(),
        Ok(Err(e)) => {
            error!("[http] history query failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("[http] history task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "history query failed".into())
        }
    }
}

// GET /events (flux SSE)
async fn events(State(app): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = app.broadcaster.connect();
    Sse::new(signal_stream(subscription)).keep_alive(KeepAlive::default())
}

/// Turns a subscription into SSE events. The stream ends when the queue is
/// closed; dropping it (client gone) drops the subscription and deregisters.
fn signal_stream(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut sub| async move {
        let update = sub.recv().await?;
        let event = match update.to_sse_data() {
            Ok(data) => Event::default().event(SIGNALS_EVENT).data(data),
            Err(e) => {
                warn!("[sse] failed to encode update for {}: {}", sub.id(), e);
                Event::default().comment("encode error")
            }
        };
        Some((Ok(event), sub))
    })
}

#[derive(Debug, Serialize)]
struct HealthView {
    status: &'static str,
    details: HashMap<&'static str, &'static str>,
    clients: usize, // abonnés SSE
}

// GET /health
async fn health(State(app): State<AppState>) -> (StatusCode, Json<HealthView>) {
    let store = app.store.clone();
    let store_ok = matches!(tokio::task::spawn_blocking(move || store.ping()).await, Ok(Ok(())));
    let balancer_ok = app.cell.current().connectivity.balancer;

    let label = |ok: bool| if ok { "healthy" } else { "unhealthy" };
    let mut details = HashMap::new();
    details.insert("database", label(store_ok));
    details.insert("haproxy", label(balancer_ok));

    let healthy = store_ok && balancer_ok;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthView {
            status: label(healthy),
            details,
            clients: app.broadcaster.client_count(),
        }),
    )
}

use anyhow::Result;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::sources::SourceManager;
use vigil_core::alert::Alert;

/// Body cap for webhook payloads.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Synchronous alert hook: handle the alert before the response goes out.
pub type AlertHandler = Arc<dyn Fn(Alert) -> Result<()> + Send + Sync>;

type StartFuture = Pin<Box<dyn Future<Output = Result<Option<String>>> + Send>>;
type RunFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Async start phase: returns the investigation ID, or None when the
/// alert is intentionally filtered.
pub type AsyncAlertHandler = Arc<dyn Fn(Alert) -> StartFuture + Send + Sync>;
/// Async run phase: the long work, launched on a tracked background
/// worker after the HTTP response is sent.
pub type AlertRunner = Arc<dyn Fn(Alert, String) -> RunFuture + Send + Sync>;

/// HTTP webhook receiver: resolves inbound payloads to a registered
/// webhook source, parses them, and dispatches the resulting alerts.
pub struct WebhookReceiver {
    manager: Arc<SourceManager>,
    sync_handler: Option<AlertHandler>,
    async_handlers: Option<(AsyncAlertHandler, AlertRunner)>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
    started_at: Instant,
}

impl WebhookReceiver {
    pub fn new(manager: Arc<SourceManager>) -> Self {
        Self {
            manager,
            sync_handler: None,
            async_handlers: None,
            workers: tokio::sync::Mutex::new(JoinSet::new()),
            started_at: Instant::now(),
        }
    }

    pub fn with_alert_handler(mut self, handler: AlertHandler) -> Self {
        self.sync_handler = Some(handler);
        self
    }

    /// Install the async two-phase hooks. When set, they supersede the
    /// synchronous handler.
    pub fn with_async_handler(mut self, start: AsyncAlertHandler, run: AlertRunner) -> Self {
        self.async_handlers = Some((start, run));
        self
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/status", get(status_handler))
            .route("/alerts/{*source}", post(alerts_handler))
            .with_state(self)
    }

    /// Wait for every in-flight background worker, bounded by `timeout`.
    pub async fn wait_for_workers(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut workers = self.workers.lock().await;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, workers.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => {
                    warn!("shutdown timeout: {} worker(s) still running", workers.len());
                    return;
                }
            }
        }
    }

    async fn spawn_worker(&self, runner: AlertRunner, alert: Alert, id: String) {
        let mut workers = self.workers.lock().await;
        // Reap already-finished workers so the set stays small.
        while workers.try_join_next().is_some() {}
        workers.spawn(async move {
            if let Err(e) = runner(alert, id.clone()).await {
                warn!("investigation runner {} failed: {:#}", id, e);
            }
        });
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

async fn health_handler() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn ready_handler(State(receiver): State<Arc<WebhookReceiver>>) -> Response {
    let sources = receiver.manager.count();
    if sources >= 1 {
        (StatusCode::OK, Json(json!({"status": "ok", "sources": sources}))).into_response()
    } else {
        error_body(StatusCode::SERVICE_UNAVAILABLE, "no sources registered")
    }
}

async fn status_handler(State(receiver): State<Arc<WebhookReceiver>>) -> Response {
    let workers = receiver.workers.lock().await.len();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "uptime_secs": receiver.started_at.elapsed().as_secs(),
            "sources": receiver.manager.list(),
            "active_workers": workers,
        })),
    )
        .into_response()
}

async fn alerts_handler(
    State(receiver): State<Arc<WebhookReceiver>>,
    Path(source): Path<String>,
    request: Request,
) -> Response {
    let full_path = format!("/alerts/{}", source);

    let Some(alert_source) = receiver.manager.find_by_webhook_path(&full_path) else {
        return error_body(StatusCode::NOT_FOUND, "unknown webhook path");
    };
    // find_by_webhook_path only returns webhook-capable sources.
    let Some(webhook) = alert_source.as_webhook() else {
        return error_body(StatusCode::NOT_FOUND, "unknown webhook path");
    };

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => {
            return error_body(StatusCode::BAD_REQUEST, "request body exceeds 10 MiB");
        }
    };

    let alerts = match webhook.handle_webhook(&body) {
        Ok(alerts) => alerts,
        Err(e) => {
            warn!("webhook parse failed on {}: {:#}", full_path, e);
            return error_body(StatusCode::BAD_REQUEST, &format!("invalid payload: {}", e));
        }
    };
    info!("{} alert(s) parsed from {}", alerts.len(), full_path);

    if let Some((start, run)) = receiver.async_handlers.clone() {
        return dispatch_async(&receiver, start, run, alerts).await;
    }
    dispatch_sync(&receiver, alerts)
}

/// Async two-phase dispatch: start each alert, launch runners on tracked
/// workers, answer 202 with the last started investigation ID.
async fn dispatch_async(
    receiver: &Arc<WebhookReceiver>,
    start: AsyncAlertHandler,
    run: AlertRunner,
    alerts: Vec<Alert>,
) -> Response {
    let mut last_id: Option<String> = None;
    let mut errors = 0usize;
    let attempts = alerts.len();

    for alert in alerts {
        match start(alert.clone()).await {
            Ok(Some(id)) => {
                // The runner gets a fresh background context: client
                // disconnects do not cancel the investigation.
                receiver.spawn_worker(run.clone(), alert, id.clone()).await;
                last_id = Some(id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("alert handler failed: {:#}", e);
                errors += 1;
            }
        }
    }

    match last_id {
        Some(id) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "investigation_id": id})),
        )
            .into_response(),
        None if attempts > 0 && errors == attempts => {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "all alerts failed to start")
        }
        None => (StatusCode::OK, Json(json!({"status": "filtered"}))).into_response(),
    }
}

fn dispatch_sync(receiver: &Arc<WebhookReceiver>, alerts: Vec<Alert>) -> Response {
    let received = alerts.len();
    let mut errors = 0usize;

    if let Some(handler) = &receiver.sync_handler {
        for alert in alerts {
            if let Err(e) = handler(alert) {
                warn!("alert handler failed: {:#}", e);
                errors += 1;
            }
        }
    }

    (
        StatusCode::OK,
        Json(json!({"received": received, "errors": errors})),
    )
        .into_response()
}

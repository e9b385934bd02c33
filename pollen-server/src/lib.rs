// SPDX-License-Identifier: MIT
//
// Pollen: Network Entropy Exchange
// Copyright (c) 2025 Pollen Contributors

//! Pollen Server - HTTP front end for the entropy exchange
//!
//! Exposes a single exchange endpoint plus health and metrics:
//!
//! - `/` (any method) - run an exchange with the `challenge`, `tag`/`uuid`, `tip` form fields
//! - `GET /health` - 200 when the entropy source can deliver, 503 otherwise
//! - `GET /metrics` - Prometheus metrics (when enabled)
//!
//! The router is served over plain HTTP or, when `tls_enabled` is set, over HTTPS with rustls.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use pollen_core::{
    config::ServerConfig,
    handler::{Peer, ProtocolHandler},
    metrics::Metrics,
    protocol::{ErrorPayload, RequestContext},
    sink::SinkStats,
    Error,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

/// Time allowed for in-flight TLS connections to finish on shutdown
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    handler: ProtocolHandler,
    metrics: Metrics,
    feedback: Option<Arc<SinkStats>>,
    metrics_enabled: bool,
}

impl AppState {
    pub fn new(handler: ProtocolHandler, feedback: Option<Arc<SinkStats>>) -> Self {
        Self {
            handler,
            metrics: Metrics::new(),
            feedback,
            metrics_enabled: true,
        }
    }

    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Exchange failure rendered as an explicit error payload
pub struct ApiError(pub Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_degraded() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ErrorPayload::from(&self.0))).into_response()
    }
}

/// `/` - run one entropy exchange
async fn serve_entropy(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    // Only urlencoded bodies carry fields; anything else falls back to the query string
    let form_body = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));
    let form: &[u8] = if form_body { &body } else { &[] };
    let ctx = RequestContext::from_form(query.as_deref(), form);

    let remote_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let peer = Peer::new(remote_addr, user_agent);

    // Draws may block on a device read; keep them off the async workers
    let handler = state.handler.clone();
    let result = tokio::task::spawn_blocking(move || handler.handle(&ctx, &peer))
        .await
        .unwrap_or_else(|e| {
            error!("Exchange task failed: {}", e);
            Err(Error::Internal(format!("exchange task failed: {}", e)))
        });

    match result {
        Ok(encoded) => {
            let latency = start.elapsed().as_micros() as u64;
            state.metrics.record_request(encoded.body.len(), latency);
            (
                StatusCode::OK,
                [(hyper::header::CONTENT_TYPE, encoded.content_type)],
                encoded.body,
            )
                .into_response()
        }
        Err(e) => {
            state.metrics.record_request_failure(&e);
            error!("Exchange failed: {}", e);
            ApiError(e).into_response()
        }
    }
}

/// GET /health - Simple health check
async fn health_check(State(state): State<AppState>) -> StatusCode {
    let source = state.handler.source().clone();
    match tokio::task::spawn_blocking(move || source.draw(1)).await {
        Ok(Ok(_)) => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /metrics - Prometheus metrics
async fn get_metrics(State(state): State<AppState>) -> String {
    state.metrics.prometheus_format(state.feedback.as_deref())
}

/// Build the router
pub fn router(state: AppState, request_timeout: Option<Duration>) -> Router {
    let mut app = Router::new()
        .route("/", any(serve_entropy))
        .route("/health", get(health_check));

    if state.metrics_enabled {
        app = app.route("/metrics", get(get_metrics));
    }

    let app = app.layer(TraceLayer::new_for_http());
    let app = match request_timeout {
        Some(timeout) => app.layer(TimeoutLayer::new(timeout)),
        None => app,
    };

    app.with_state(state)
}

/// Serve the router until `shutdown` resolves
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Load the PEM certificate chain and key named by the configuration
pub async fn load_tls(config: &ServerConfig) -> pollen_core::Result<RustlsConfig> {
    info!(
        "Loading TLS certificate {} and key {}",
        config.tls_cert_path.display(),
        config.tls_key_path.display()
    );
    let tls = RustlsConfig::from_pem_file(&config.tls_cert_path, &config.tls_key_path).await?;
    Ok(tls)
}

/// Serve the router over HTTPS until `shutdown` resolves
pub async fn serve_tls(
    addr: SocketAddr,
    app: Router,
    tls: RustlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let handle = axum_server::Handle::new();

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
    });

    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

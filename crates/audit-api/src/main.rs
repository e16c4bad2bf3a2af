//! Entry point for the audit platform's one long-running process: the
//! `GET /healthz` HTTP surface (spec.md §1, §6 — business endpoints are
//! out of scope for this crate) and, alongside it, the ingestion worker
//! (spec.md §4.5) that claims jobs off the queue and persists them. The
//! two run as sibling tasks sharing one shutdown signal, since the
//! workspace has no separate worker binary. The HTTP middleware stack
//! (security headers, request ID, tracing, compression) is carried from
//! the starting workspace's API server even though the route table
//! shrank to one endpoint.

use audit_core::config::{Config, ConfigHandle};
use audit_core::jobs::RedisJobQueue;
use audit_core::logging;
use audit_core::repository::AuditRepository;
use audit_core::worker::{IngestionWorker, WorkerConfig};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use redis::aio::ConnectionManager;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

mod api_middleware;
mod error;
mod health;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let environment = config.environment.clone();
    config.validate(&environment)?;

    logging::init(&config.logging, None);
    info!("configuration loaded and validated for environment {environment}");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await?;
    let repository = Arc::new(AuditRepository::new(pool));
    repository.ensure_schema().await?;
    info!("database schema ensured");

    let redis = init_redis(&config.redis.url).await?;
    let queue: Arc<dyn audit_core::jobs::JobQueue> =
        Arc::new(RedisJobQueue::new(redis.clone(), config.worker.queue_name.clone(), config.dead_letter.max_retries));
    info!("redis connection established");

    let worker_config = WorkerConfig {
        concurrency: config.worker.concurrency,
        shutdown_timeout: Duration::from_millis(config.worker.shutdown_timeout),
        ..WorkerConfig::default()
    };
    let worker = IngestionWorker::new(queue.clone(), repository.clone(), worker_config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    let config_handle = Arc::new(ConfigHandle::new(config.clone()));
    let state = AppState { config: config_handle, repository, queue, redis };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.worker.port));
    info!("audit-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    worker_handle.await?;
    info!("audit-api shutdown complete");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(
                    api_middleware::security_headers::security_headers_middleware,
                ))
                .layer(axum::middleware::from_fn(api_middleware::request_id::request_id_middleware))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
        .fallback(handler_404)
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "resource not found" })))
}

async fn init_redis(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(url)?;
    ConnectionManager::new(client).await
}

async fn shutdown_signal(worker_shutdown: tokio::sync::watch::Sender<bool>) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c signal"),
        _ = terminate => info!("received terminate signal"),
    }

    let _ = worker_shutdown.send(true);
}

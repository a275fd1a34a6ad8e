use std::future::IntoFuture;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tower_http::cors::CorsLayer;

use leasehold_core::burglar::Burglar;
use leasehold_core::handler::LockHandler;
use leasehold_core::infrastructure::LeaseStore;
use leasehold_core::infrastructure_in_memory::InMemoryLeaseStore;
use leasehold_core::lock_pick::LockPick;
use leasehold_core::repository::{LockDb, LockRepository};
use leasehold_core::signal::shutdown_requested;
use leasehold_core::types::{Resource, TypeFilter};
use leasehold_core::StoreError;

use crate::handlers::*;

pub const API_KEY_ENV: &str = "LEASEHOLD_API_KEY";

pub type AppState<D> = Arc<LockHandler<D>>;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("unknown storage backend '{0}', use 'memory' or 'sqlite:<path>'")]
    UnknownStorage(String),
    #[cfg(not(feature = "sqlite"))]
    #[error("sqlite storage requested but the `sqlite` feature is not enabled")]
    SqliteDisabled,
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("lock store is unrecoverable")]
    Unrecoverable,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    Memory,
    Sqlite(String),
}

impl FromStr for Storage {
    type Err = ServeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "memory" {
            return Ok(Storage::Memory);
        }
        match s.strip_prefix("sqlite:") {
            Some(path) if !path.is_empty() => Ok(Storage::Sqlite(path.to_string())),
            _ => Err(ServeError::UnknownStorage(s.to_string())),
        }
    }
}

pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub storage: Storage,
    pub reconcile_interval: Duration,
    pub api_key: Option<String>,
}

pub async fn run(config: ServeConfig) -> Result<(), ServeError> {
    match config.storage.clone() {
        Storage::Memory => {
            tracing::info!("storage backend: in-memory (leases will not persist)");
            serve(InMemoryLeaseStore::new(), config).await
        }
        #[cfg(feature = "sqlite")]
        Storage::Sqlite(path) => {
            tracing::info!(path = %path, "storage backend: sqlite");
            let store = leasehold_core::infrastructure_sqlite::SqliteLeaseStore::open(&path)?;
            serve(store, config).await
        }
        #[cfg(not(feature = "sqlite"))]
        Storage::Sqlite(_) => Err(ServeError::SqliteDisabled),
    }
}

async fn serve<S: LeaseStore + 'static>(store: S, config: ServeConfig) -> Result<(), ServeError> {
    let db = Arc::new(LockRepository::new(store));
    let lock_pick = LockPick::new(db.clone());
    let (exit_tx, exit_rx) = mpsc::channel(1);
    let handler = Arc::new(LockHandler::new(db.clone(), lock_pick.clone()).with_exit_channel(exit_tx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let burglar = Burglar::new(db, lock_pick, config.reconcile_interval);
    let burglar_task = tokio::spawn(burglar.run(shutdown_rx.clone(), ready_tx));
    let _ = ready_rx.await;

    let addr = format!("{}:{}", config.host, config.port);
    if config.api_key.is_some() {
        tracing::info!("api key authentication enabled");
    } else {
        tracing::warn!("no {} set, server is open (dev mode)", API_KEY_ENV);
    }

    let app = router(handler, config.api_key);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServeError::Bind { addr: addr.clone(), source })?;
    tracing::info!(addr = %addr, "leasehold server started");

    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_requested(&mut server_shutdown).await })
        .into_future();

    let stop = async move {
        let reason = wait_for_stop(exit_rx).await;
        let _ = shutdown_tx.send(true);
        reason
    };

    let (served, reason) = tokio::join!(server, stop);
    if let Err(err) = burglar_task.await {
        tracing::error!(error = %err, "burglar task failed");
    }
    served?;
    tracing::info!("leasehold server stopped");
    reason
}

async fn wait_for_stop(mut exit_rx: mpsc::Receiver<()>) -> Result<(), ServeError> {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("received interrupt, shutting down");
            Ok(())
        }
        Some(()) = exit_rx.recv() => {
            tracing::error!("exiting on unrecoverable store error");
            Err(ServeError::Unrecoverable)
        }
    }
}

pub fn router<D: LockDb + 'static>(handler: AppState<D>, api_key: Option<String>) -> Router {
    let api_key: Option<Arc<str>> = api_key.filter(|key| !key.is_empty()).map(Into::into);

    Router::new()
        // Health is always open (no auth)
        .route("/health", get(health::<D>))
        .route("/locks", post(acquire::<D>).get(fetch_all::<D>))
        .route("/locks/release", post(release::<D>))
        .route("/locks/count", get(count::<D>))
        .route("/locks/{key}", get(fetch::<D>))
        .layer(middleware::from_fn_with_state(api_key, auth_middleware))
        .layer(CorsLayer::permissive())
        .with_state(handler)
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    State(expected_key): State<Option<Arc<str>>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected_key) = expected_key else {
        return Ok(next.run(request).await);
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token == &*expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "unauthorized request");
        Err(StatusCode::UNAUTHORIZED)
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health<D: LockDb + 'static>(
    State(handler): State<AppState<D>>,
) -> Result<Json<ApiResponse<HealthResponse>>, ApiError> {
    let held = handler.count(&TypeFilter::any())?;
    Ok(Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        held,
        watchers: handler.lock_pick().watcher_count(),
        expired: handler.lock_pick().expired_counts(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })))
}

async fn acquire<D: LockDb + 'static>(
    State(handler): State<AppState<D>>,
    Json(req): Json<AcquireRequest>,
) -> Result<(StatusCode, Json<ApiResponse<()>>), ApiError> {
    handler.acquire(&req.resource, req.ttl_in_seconds)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::done())))
}

async fn release<D: LockDb + 'static>(
    State(handler): State<AppState<D>>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    handler.release(&req.resource)?;
    Ok(Json(ApiResponse::done()))
}

async fn fetch<D: LockDb + 'static>(
    State(handler): State<AppState<D>>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<Resource>>, ApiError> {
    Ok(Json(ApiResponse::ok(handler.fetch(&key)?)))
}

async fn fetch_all<D: LockDb + 'static>(
    State(handler): State<AppState<D>>,
    Query(query): Query<TypeQuery>,
) -> Result<Json<ApiResponse<Vec<Resource>>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(ApiResponse::ok(handler.fetch_all(&filter)?)))
}

async fn count<D: LockDb + 'static>(
    State(handler): State<AppState<D>>,
    Query(query): Query<TypeQuery>,
) -> Result<Json<ApiResponse<usize>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(ApiResponse::ok(handler.count(&filter)?)))
}

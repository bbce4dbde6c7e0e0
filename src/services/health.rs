use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::database::connection::DatabaseManager;
use crate::database::registration::RegistrationStore;
use crate::services::reminder::{LoopStatus, SharedLoopStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub registration_store: StoreHealth,
    pub database: DatabaseHealth,
    pub reminder_loop: LoopStatus,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreHealth {
    pub status: String,
    pub registered_users: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub status: String,
    pub connection_pool_size: u32,
    pub response_time_ms: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub store: Arc<dyn RegistrationStore>,
    pub loop_status: SharedLoopStatus,
    pub start_time: DateTime<Utc>,
}

pub struct HealthService {
    pub router: Router,
}

impl HealthService {
    pub fn new(
        db: Arc<DatabaseManager>,
        store: Arc<dyn RegistrationStore>,
        loop_status: SharedLoopStatus,
    ) -> Self {
        let state = AppState {
            db,
            store,
            loop_status,
            start_time: Utc::now(),
        };

        let router = Router::new()
            .route("/ping", get(ping))
            .route("/health", get(health_check))
            .route("/health/ready", get(readiness_check))
            .route("/health/live", get(liveness_check))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state);

        Self { router }
    }
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "active".to_string(),
    })
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let db_healthy = state.db.ping().await.is_ok();
    let response_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let registered_users = state.store.load().await.ok().map(|users| users.len());
    let store_healthy = registered_users.is_some();

    let uptime = Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;

    let healthy = db_healthy && store_healthy;
    let response = HealthResponse {
        status: status_label(healthy).to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        registration_store: StoreHealth {
            status: status_label(store_healthy).to_string(),
            registered_users,
        },
        database: DatabaseHealth {
            status: status_label(db_healthy).to_string(),
            connection_pool_size: state.db.pool.size(),
            response_time_ms,
        },
        reminder_loop: state.loop_status.read().await.clone(),
        uptime_seconds: uptime,
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<&'static str>, StatusCode> {
    if state.db.ping().await.is_err() || state.store.load().await.is_err() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json("ready"))
}

async fn liveness_check() -> Json<&'static str> {
    Json("alive")
}

fn status_label(healthy: bool) -> &'static str {
    if healthy {
        "healthy"
    } else {
        "unhealthy"
    }
}

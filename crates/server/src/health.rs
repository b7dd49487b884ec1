use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use cafe_db::DatabaseHandle;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    database: DatabaseHandle,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(database: DatabaseHandle) -> Router {
    Router::new().route("/api/v1/health", get(health)).with_state(HealthState { database })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.database).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "healthy" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "cafe-server runtime initialized".to_string(),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(database: &DatabaseHandle) -> HealthCheck {
    let pool = match database.pool().await {
        Ok(pool) => pool,
        Err(error) => {
            return HealthCheck {
                status: "degraded",
                detail: format!("customer database could not be loaded: {error}"),
            }
        }
    };

    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

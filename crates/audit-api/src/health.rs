//! `GET /healthz` (spec.md §6): checks every external dependency the
//! worker and API rely on — Postgres, Redis, and the job queue — and
//! reports `200 {status:"OK",components:{…}}` only when all of them are
//! healthy, `503` with the same shape otherwise so operators can see
//! which component is down.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = match state.repository.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(component = "database", "health check failed: {e}");
            false
        }
    };

    let redis_ok = {
        let mut conn = state.redis.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!(component = "redis", "health check failed: {e}");
                false
            }
        }
    };

    let queue_ok = match state.queue.health_check().await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(component = "queue", "health check failed: {e}");
            false
        }
    };

    let all_ok = database_ok && redis_ok && queue_ok;
    let status_code = if all_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let status_label = if all_ok { "OK" } else { "DEGRADED" };

    (
        status_code,
        Json(json!({
            "status": status_label,
            "components": {
                "database": if database_ok { "OK" } else { "DOWN" },
                "redis": if redis_ok { "OK" } else { "DOWN" },
                "queue": if queue_ok { "OK" } else { "DOWN" },
            }
        })),
    )
}

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe. Pings the database synchronously so a
/// wedged connection pool shows up in the same place an orchestrator checks.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_ok = match state.db.lock() {
        Ok(conn) => conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok(),
        Err(_) => false,
    };

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "dbOk": db_ok,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

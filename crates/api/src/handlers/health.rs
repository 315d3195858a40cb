use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

/// 存活检查，不需要调用者身份
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "campaign-scheduler",
        "version": env!("CARGO_PKG_VERSION"),
        "running_jobs": state.manager.runner().running_count(),
        "live_channels": state.hub.channel_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

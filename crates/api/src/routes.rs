use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use campaign_dispatcher::{ResourceHealthTracker, SettingsService};
use campaign_infrastructure::NotificationHub;
use campaign_worker::JobManager;

use crate::auth::OwnerResolver;
use crate::handlers::{
    events::stream_events,
    health::health_check,
    jobs::{cancel_job, get_job, list_active_jobs, list_jobs, retry_job, submit_job},
    resources::{activate_resource, deactivate_resource, force_health_check, resource_health},
    settings::{export_settings, get_settings, import_settings, put_settings},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub tracker: Arc<ResourceHealthTracker>,
    pub settings: Arc<SettingsService>,
    pub hub: Arc<NotificationHub>,
    pub owners: Arc<OwnerResolver>,
    /// SSE 心跳间隔
    pub heartbeat: Duration,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // 任务
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/active", get(list_active_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/jobs/{id}/retry", post(retry_job))
        .route("/api/events", get(stream_events))
        // 资源健康
        .route("/api/resources/health", get(resource_health))
        .route("/api/resources/{id}/health-check", post(force_health_check))
        .route("/api/resources/{id}/activate", post(activate_resource))
        .route("/api/resources/{id}/deactivate", post(deactivate_resource))
        // 轮换设置
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/settings/export", get(export_settings))
        .route("/api/settings/import", post(import_settings))
        .with_state(state)
}

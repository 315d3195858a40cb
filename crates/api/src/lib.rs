//! # Campaign API
//!
//! 号码生成/校验与短信群发任务的 HTTP 接口。
//!
//! ## API 端点
//!
//! ### 任务
//! - `POST /api/jobs` - 提交任务（`phone_generation` / `phone_validation` / `sms_campaign`）
//! - `GET /api/jobs` - 分页查询，支持 `status`、`category` 过滤
//! - `GET /api/jobs/active` - 未结束的任务
//! - `GET /api/jobs/{id}` - 任务状态
//! - `POST /api/jobs/{id}/cancel` - 取消任务
//! - `POST /api/jobs/{id}/retry` - 重试可重试的失败任务
//! - `GET /api/events` - SSE 实时事件流
//!
//! ### 资源
//! - `GET /api/resources/health` - 代理/中继健康快照
//! - `POST /api/resources/{id}/health-check` - 立即探测
//! - `POST /api/resources/{id}/activate`、`/deactivate`
//!
//! ### 轮换设置
//! - `GET|PUT /api/settings`
//! - `GET /api/settings/export`、`POST /api/settings/import`
//!
//! 所有 `/api` 端点都需要调用者身份，见 [`auth`]。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::Router;
use campaign_core::config::models::ApiConfig;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use middleware::{cors_layer, request_logging, trace_layer};

pub use auth::{Owner, OwnerResolver};
pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let router = create_routes(state);
    let router = if config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    };

    // 超时只约束响应头之前的处理，事件流的响应体不受影响
    router.layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_seconds,
            )))
            .layer(axum::middleware::from_fn(request_logging)),
    )
}

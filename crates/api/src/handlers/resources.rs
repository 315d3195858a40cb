use std::str::FromStr;

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::IntoResponse,
};
use campaign_core::models::ResourceRole;
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::Owner,
    error::ApiResult,
    response::success,
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct HealthQueryParams {
    pub role: Option<String>,
}

/// 资源健康快照
pub async fn resource_health(
    State(state): State<AppState>,
    Owner(_owner): Owner,
    params: Result<Query<HealthQueryParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let role = params
        .role
        .as_deref()
        .map(ResourceRole::from_str)
        .transpose()?;
    Ok(success(state.tracker.snapshot(role).await?))
}

/// 立即探测一个资源
pub async fn force_health_check(
    State(state): State<AppState>,
    Owner(owner): Owner,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = id?;
    info!("所有者 {} 请求探测资源 {}", owner, id);
    let resource = state.tracker.health_check(id, None).await?;
    Ok(success(resource))
}

pub async fn activate_resource(
    State(state): State<AppState>,
    Owner(_owner): Owner,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = id?;
    Ok(success(state.tracker.activate(id).await?))
}

pub async fn deactivate_resource(
    State(state): State<AppState>,
    Owner(_owner): Owner,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = id?;
    Ok(success(state.tracker.deactivate(id).await?))
}

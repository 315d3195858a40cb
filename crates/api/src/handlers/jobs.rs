use std::str::FromStr;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use campaign_core::models::{JobDefinition, JobFilter, JobStatus, Pagination};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::Owner,
    error::{ApiError, ApiResult},
    response::{accepted, created, success, PaginatedResponse},
    routes::AppState,
};

/// 任务提交请求
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub category: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    pub status: Option<String>,
    pub category: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// 提交任务
pub async fn submit_job(
    State(state): State<AppState>,
    Owner(owner): Owner,
    request: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request?;
    let mut definition = JobDefinition::new(request.category, owner.clone(), request.payload);
    if let Some(name) = request.name {
        definition = definition.with_name(name);
    }
    if let Some(max_attempts) = request.max_attempts {
        if max_attempts == 0 {
            return Err(ApiError::BadRequest("max_attempts 必须大于0".into()));
        }
        definition = definition.with_max_attempts(max_attempts);
    }

    let job_id = state.manager.submit(definition).await?;
    info!("所有者 {} 提交任务 {}", owner, job_id);
    let view = state.manager.get_status(job_id, &owner).await?;
    Ok(created(view))
}

/// 获取任务列表
pub async fn list_jobs(
    State(state): State<AppState>,
    Owner(owner): Owner,
    params: Result<Query<JobQueryParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let status = params
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()?;
    let filter = JobFilter {
        owner: None,
        status,
        category: params.category,
    };
    let pagination = Pagination::new(params.page.unwrap_or(1), params.page_size.unwrap_or(20));

    let (items, total) = state.manager.list(&owner, filter, pagination).await?;
    Ok(success(PaginatedResponse::new(items, total, pagination)))
}

/// 所有未结束的任务
pub async fn list_active_jobs(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.manager.list_active(&owner).await?))
}

/// 获取单个任务状态
pub async fn get_job(
    State(state): State<AppState>,
    Owner(owner): Owner,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = id?;
    Ok(success(state.manager.get_status(id, &owner).await?))
}

/// 取消任务
///
/// 执行中的任务在下一个检查点结束，因此返回 202。
pub async fn cancel_job(
    State(state): State<AppState>,
    Owner(owner): Owner,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = id?;
    let view = state.manager.cancel(id, &owner).await?;
    Ok(accepted(view, "已请求取消"))
}

/// 重试失败的任务
pub async fn retry_job(
    State(state): State<AppState>,
    Owner(owner): Owner,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = id?;
    let view = state.manager.retry(id, &owner).await?;
    Ok(accepted(view, "已重新提交"))
}

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use campaign_core::models::{ConfigurationDocument, RotationSettings};
use tracing::info;

use crate::{
    auth::Owner,
    error::ApiResult,
    response::success,
    routes::AppState,
};

/// 当前所有者的轮换设置，未保存过时返回默认值
pub async fn get_settings(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.settings.get(&owner).await?))
}

pub async fn put_settings(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Result<Json<RotationSettings>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(settings) = body?;
    let saved = state.settings.put(&owner, settings).await?;
    info!("所有者 {} 更新了轮换设置", owner);
    Ok(success(saved))
}

/// 导出设置与资源池
pub async fn export_settings(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.settings.export(&owner).await?))
}

/// 导入配置文档，返回新增/更新/跳过的统计
pub async fn import_settings(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Result<Json<ConfigurationDocument>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(document) = body?;
    let report = state.settings.import(&owner, document).await?;
    info!(
        "所有者 {} 导入配置: 新增 {}，更新 {}，未变 {}，跳过 {}",
        owner,
        report.created,
        report.updated,
        report.unchanged,
        report.skipped.len()
    );
    Ok(success(report))
}

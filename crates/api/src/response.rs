use axum::{http::StatusCode, response::IntoResponse, Json};
use campaign_core::models::Pagination;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 成功响应的统一外层
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let total_pages = total.div_ceil(pagination.page_size.max(1));
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages,
            has_more: pagination.page < total_pages,
        }
    }
}

pub fn success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, ApiResponse::new(data))
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, ApiResponse::new(data))
}

/// 已受理但尚未完成，例如取消一个正在执行的任务
pub fn accepted<T: Serialize>(data: T, message: impl Into<String>) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        ApiResponse::new(data).with_message(message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginated_response_pages() {
        let page = PaginatedResponse::new(vec!["a", "b", "c"], 10, Pagination::new(2, 3));
        assert_eq!(page.total_pages, 4);
        assert!(page.has_more);

        let last = PaginatedResponse::new(vec!["j"], 10, Pagination::new(4, 3));
        assert!(!last.has_more);

        let empty: PaginatedResponse<&str> = PaginatedResponse::new(vec![], 0, Pagination::default());
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_more);
    }

    #[test]
    fn test_message_is_omitted_when_absent() {
        let plain = serde_json::to_value(ApiResponse::new("job")).unwrap();
        assert_eq!(plain["success"], true);
        assert_eq!(plain["data"], "job");
        assert!(plain.get("message").is_none());

        let noted = serde_json::to_value(ApiResponse::new(1).with_message("已请求取消")).unwrap();
        assert_eq!(noted["message"], "已请求取消");
    }
}

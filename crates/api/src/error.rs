use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use campaign_core::{CampaignError, ErrorKind};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Campaign(#[from] CampaignError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("认证失败: {0}")]
    Unauthorized(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// HTTP 状态码与稳定的错误类型代码
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Campaign(err) => match err {
                CampaignError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
                CampaignError::ResourceNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND")
                }
                CampaignError::UnknownCategory(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_CATEGORY"),
                CampaignError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                other => match other.kind() {
                    ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    ErrorKind::InvalidState => (StatusCode::CONFLICT, "INVALID_STATE"),
                    ErrorKind::ResourceUnavailable => {
                        (StatusCode::SERVICE_UNAVAILABLE, "RESOURCE_UNAVAILABLE")
                    }
                    ErrorKind::TransientDelivery => (StatusCode::BAD_GATEWAY, "TRANSIENT_ERROR"),
                    ErrorKind::Cancellation => (StatusCode::CONFLICT, "CANCELLED"),
                    ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    ErrorKind::Fatal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        });
        if let ApiError::Campaign(CampaignError::InvalidState { status: job_status, .. }) = &self {
            body["error"]["job_status"] = json!(job_status);
        }

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::models::{JobStatus, ResourceRole};
    use uuid::Uuid;

    async fn body_of(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_shapes() {
        let cases = vec![
            (
                ApiError::from(CampaignError::validation("生成数量必须大于0")),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ApiError::from(CampaignError::JobNotFound { id: Uuid::new_v4() }),
                StatusCode::NOT_FOUND,
                "JOB_NOT_FOUND",
            ),
            (
                ApiError::from(CampaignError::InvalidState {
                    id: Uuid::new_v4(),
                    status: JobStatus::Success,
                }),
                StatusCode::CONFLICT,
                "INVALID_STATE",
            ),
            (
                ApiError::from(CampaignError::NoResourceAvailable {
                    role: ResourceRole::Proxy,
                }),
                StatusCode::SERVICE_UNAVAILABLE,
                "RESOURCE_UNAVAILABLE",
            ),
            (
                ApiError::Unauthorized("缺少认证令牌".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
        ];

        for (error, status, error_type) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), status);
            let body = body_of(response).await;
            assert_eq!(body["error"]["type"], error_type);
            assert_eq!(body["error"]["code"], status.as_u16());
        }
    }

    #[tokio::test]
    async fn test_internal_errors_are_not_leaked() {
        let response = ApiError::from(CampaignError::internal("db password wrong")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body["error"]["message"], "系统内部错误");
    }

    #[tokio::test]
    async fn test_terminal_status_is_reported() {
        let response = ApiError::from(CampaignError::InvalidState {
            id: Uuid::new_v4(),
            status: JobStatus::Revoked,
        })
        .into_response();
        let body = body_of(response).await;
        assert_eq!(body["error"]["job_status"], "REVOKED");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ResourceRole;

/// 资源使用日志，只追加不修改，仅用于统计和性能评分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageLog {
    pub id: i64,
    pub job_id: Uuid,
    pub resource_id: i64,
    pub role: ResourceRole,
    pub success: bool,
    /// 毫秒
    pub response_time: Option<f64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UsageLog {
    pub fn success(job_id: Uuid, resource_id: i64, role: ResourceRole, response_time_ms: f64) -> Self {
        Self {
            id: 0,
            job_id,
            resource_id,
            role,
            success: true,
            response_time: Some(response_time_ms),
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(job_id: Uuid, resource_id: i64, role: ResourceRole, error: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_id,
            resource_id,
            role,
            success: false,
            response_time: None,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }
}

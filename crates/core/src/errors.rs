use thiserror::Error;
use uuid::Uuid;

use crate::models::{JobStatus, ResourceRole};

/// 错误分类
///
/// 对应外部可见的错误形态，决定错误如何在任务层面传播。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 参数校验失败，任务不会进入 PENDING
    Validation,
    /// 所需角色的资源池耗尽，任务暂停而不是失败
    ResourceUnavailable,
    /// 单次发送失败，可换资源重试
    TransientDelivery,
    /// 查询目标不存在或不属于调用者
    NotFound,
    /// 当前状态不允许该操作
    InvalidState,
    /// 协作式取消信号
    Cancellation,
    /// 非预期的内部错误，任务直接失败
    Fatal,
}

/// 调度系统错误类型定义
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: Uuid },

    #[error("任务 {id} 当前状态 {status} 不允许此操作")]
    InvalidState { id: Uuid, status: JobStatus },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("资源未找到: {id}")]
    ResourceNotFound { id: i64 },

    #[error("没有可用的{role}资源")]
    NoResourceAvailable { role: ResourceRole },

    #[error("投递失败: {0}")]
    TransientDelivery(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("任务已被取消")]
    Cancelled,

    #[error("未知的任务类别: {0}")]
    UnknownCategory(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("认证失败: {0}")]
    Unauthorized(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl CampaignError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CampaignError::Validation(_)
            | CampaignError::UnknownCategory(_)
            | CampaignError::Serialization(_) => ErrorKind::Validation,
            CampaignError::NoResourceAvailable { .. } => ErrorKind::ResourceUnavailable,
            CampaignError::TransientDelivery(_)
            | CampaignError::Timeout(_)
            | CampaignError::Network(_) => ErrorKind::TransientDelivery,
            CampaignError::JobNotFound { .. } | CampaignError::ResourceNotFound { .. } => {
                ErrorKind::NotFound
            }
            CampaignError::InvalidState { .. } | CampaignError::InvalidTransition { .. } => {
                ErrorKind::InvalidState
            }
            CampaignError::Cancelled => ErrorKind::Cancellation,
            CampaignError::Database(_)
            | CampaignError::DatabaseOperation(_)
            | CampaignError::Configuration(_)
            | CampaignError::Unauthorized(_)
            | CampaignError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// 瞬时错误（超时、连接重置）可重试；校验和程序错误立即终止
    pub fn is_retryable(&self) -> bool {
        match self {
            CampaignError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            other => other.kind() == ErrorKind::TransientDelivery,
        }
    }
}

impl From<serde_json::Error> for CampaignError {
    fn from(err: serde_json::Error) -> Self {
        CampaignError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type CampaignResult<T> = std::result::Result<T, CampaignError>;

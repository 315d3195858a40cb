use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{JobStatusView, ResourceRole};

/// 推送给在线订阅者的任务事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// 订阅时首先下发的活跃任务快照
    ActiveJobsSnapshot { jobs: Vec<JobStatusView> },
    /// 普通的状态/进度变化
    JobUpdate { job: JobStatusView },
    /// 任务进入终态，携带最终结果
    JobCompleted {
        job: JobStatusView,
        result: Option<Value>,
    },
    /// 所需角色的资源池耗尽，任务已暂停
    PoolExhausted {
        job_id: Uuid,
        role: ResourceRole,
        message: String,
    },
    /// 任务长时间无进展，需要人工关注
    JobStalled { job_id: Uuid, idle_seconds: u64 },
    Heartbeat,
}

impl JobEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::ActiveJobsSnapshot { .. } => "active_jobs_snapshot",
            JobEvent::JobUpdate { .. } => "job_update",
            JobEvent::JobCompleted { .. } => "job_completed",
            JobEvent::PoolExhausted { .. } => "pool_exhausted",
            JobEvent::JobStalled { .. } => "job_stalled",
            JobEvent::Heartbeat => "heartbeat",
        }
    }

    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            JobEvent::JobUpdate { job } | JobEvent::JobCompleted { job, .. } => Some(job.id),
            JobEvent::PoolExhausted { job_id, .. } | JobEvent::JobStalled { job_id, .. } => {
                Some(*job_id)
            }
            JobEvent::ActiveJobsSnapshot { .. } | JobEvent::Heartbeat => None,
        }
    }
}

/// 事件信封；`sequence` 在同一个任务内单调递增
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEventEnvelope {
    pub owner: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JobEvent,
}

impl JobEventEnvelope {
    pub fn new(owner: impl Into<String>, sequence: u64, event: JobEvent) -> Self {
        Self {
            owner: owner.into(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

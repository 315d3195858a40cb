use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{CampaignError, CampaignResult};

/// 内置任务类别
pub mod categories {
    pub const PHONE_GENERATION: &str = "phone_generation";
    pub const PHONE_VALIDATION: &str = "phone_validation";
    pub const SMS_CAMPAIGN: &str = "sms_campaign";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Started,
    Progress,
    /// 资源池耗尽时挂起，恢复后回到 PROGRESS
    Paused,
    Retry,
    Success,
    Failure,
    Revoked,
}

impl JobStatus {
    pub const TERMINAL: [JobStatus; 3] = [JobStatus::Success, JobStatus::Failure, JobStatus::Revoked];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Started => "STARTED",
            JobStatus::Progress => "PROGRESS",
            JobStatus::Paused => "PAUSED",
            JobStatus::Retry => "RETRY",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Revoked => "REVOKED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Revoked
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// 状态机允许的转换
    ///
    /// `PENDING → STARTED → PROGRESS* → {SUCCESS, FAILURE, REVOKED}`，
    /// `FAILURE → RETRY → STARTED`，任意非终态都可以转为 `REVOKED`。
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Started) | (Retry, Started) => true,
            (Started, Progress) | (Progress, Progress) | (Paused, Progress) => true,
            (Started, Paused) | (Progress, Paused) => true,
            (Started, Success) | (Progress, Success) => true,
            (Pending, Failure)
            | (Started, Failure)
            | (Progress, Failure)
            | (Paused, Failure)
            | (Retry, Failure) => true,
            (Failure, Retry) => true,
            (from, Revoked) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "STARTED" => Ok(JobStatus::Started),
            "PROGRESS" => Ok(JobStatus::Progress),
            "PAUSED" => Ok(JobStatus::Paused),
            "RETRY" => Ok(JobStatus::Retry),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            "REVOKED" => Ok(JobStatus::Revoked),
            _ => Err(CampaignError::validation(format!("无效的任务状态: {s}"))),
        }
    }
}

/// 任务提交定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub category: String,
    pub owner: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub external_execution_id: Option<String>,
}

impl JobDefinition {
    pub fn new(category: impl Into<String>, owner: impl Into<String>, payload: Value) -> Self {
        Self {
            category: category.into(),
            owner: owner.into(),
            name: None,
            payload,
            max_attempts: None,
            external_execution_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// 进度更新
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub step: Option<String>,
    pub processed: u64,
    pub total: u64,
}

impl ProgressUpdate {
    pub fn new(percent: f64, step: Option<String>, processed: u64, total: u64) -> Self {
        Self {
            percent,
            step,
            processed,
            total,
        }
    }

    /// 按已处理数量计算百分比
    pub fn from_counts(processed: u64, total: u64, step: impl Into<String>) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (processed as f64 / total as f64 * 100.0).min(100.0)
        };
        Self {
            percent,
            step: Some(step.into()),
            processed,
            total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub owner: String,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub processed_count: u64,
    pub total_count: u64,
    pub payload: Value,
    pub result_data: Option<Value>,
    pub error_message: Option<String>,
    pub error_retryable: bool,
    pub attempt: u32,
    pub max_attempts: u32,
    pub paused_reason: Option<String>,
    pub external_execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(definition: JobDefinition, default_max_attempts: u32) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let name = definition
            .name
            .unwrap_or_else(|| format!("{}-{}", definition.category, &id.simple().to_string()[..8]));
        Self {
            id,
            name,
            category: definition.category,
            owner: definition.owner,
            status: JobStatus::Pending,
            progress: 0.0,
            current_step: None,
            processed_count: 0,
            total_count: 0,
            payload: definition.payload,
            result_data: None,
            error_message: None,
            error_retryable: false,
            attempt: 1,
            max_attempts: definition.max_attempts.unwrap_or(default_max_attempts).max(1),
            paused_reason: None,
            external_execution_id: definition.external_execution_id,
            created_at: now,
            started_at: None,
            completed_at: None,
            estimated_completion: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 执行状态转换并维护时间戳
    pub fn transition(&mut self, next: JobStatus) -> CampaignResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CampaignError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            JobStatus::Started => {
                self.started_at = Some(now);
                self.completed_at = None;
            }
            JobStatus::Retry => {
                // 新的一次尝试从头执行原始参数
                self.attempt += 1;
                self.progress = 0.0;
                self.processed_count = 0;
                self.current_step = None;
                self.result_data = None;
                self.error_message = None;
                self.error_retryable = false;
                self.completed_at = None;
                self.estimated_completion = None;
            }
            JobStatus::Progress => {
                self.paused_reason = None;
            }
            status if status.is_terminal() => {
                self.completed_at = Some(now);
                self.paused_reason = None;
                if status == JobStatus::Success {
                    self.estimated_completion = Some(now);
                } else {
                    self.estimated_completion = None;
                }
            }
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// 应用进度更新；百分比不允许回退，processed 不允许超过 total
    pub fn apply_progress(&mut self, update: &ProgressUpdate) -> CampaignResult<()> {
        if !update.percent.is_finite() || !(0.0..=100.0).contains(&update.percent) {
            return Err(CampaignError::validation(format!(
                "进度必须在 0 到 100 之间: {}",
                update.percent
            )));
        }
        if update.percent < self.progress {
            return Err(CampaignError::validation(format!(
                "进度不能回退: {:.2} -> {:.2}",
                self.progress, update.percent
            )));
        }
        if update.processed > update.total {
            return Err(CampaignError::validation(format!(
                "已处理数量 {} 超过总数 {}",
                update.processed, update.total
            )));
        }
        if self.status != JobStatus::Progress {
            self.transition(JobStatus::Progress)?;
        }

        self.progress = update.percent;
        if update.step.is_some() {
            self.current_step = update.step.clone();
        }
        self.processed_count = update.processed;
        self.total_count = update.total;
        self.updated_at = Utc::now();
        self.estimated_completion = self.compute_eta(self.updated_at);
        Ok(())
    }

    fn compute_eta(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let started_at = self.started_at?;
        if self.total_count == 0 || self.processed_count == 0 {
            return None;
        }
        if self.processed_count >= self.total_count {
            return Some(now);
        }
        let elapsed_ms = (now - started_at).num_milliseconds().max(0) as f64;
        let per_unit_ms = elapsed_ms / self.processed_count as f64;
        let remaining = (self.total_count - self.processed_count) as f64;
        Some(now + chrono::Duration::milliseconds((per_unit_ms * remaining) as i64))
    }

    /// 可以重试：失败、错误可重试、且仍有剩余尝试次数
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failure && self.error_retryable && self.attempt < self.max_attempts
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            name: self.name.clone(),
            category: self.category.clone(),
            owner: self.owner.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            processed: self.processed_count,
            total: self.total_count,
            eta: self.estimated_completion,
            result: self.result_data.clone(),
            error: self.error_message.clone(),
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            paused_reason: self.paused_reason.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// 对外的任务状态视图
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusView {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub owner: String,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub processed: u64,
    pub total: u64,
    pub eta: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub paused_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 任务查询过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub owner: Option<String>,
    pub status: Option<JobStatus>,
    pub category: Option<String>,
}

impl JobFilter {
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        self.owner.as_ref().map_or(true, |o| &job.owner == o)
            && self.status.map_or(true, |s| job.status == s)
            && self.category.as_ref().map_or(true, |c| &job.category == c)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
}

impl Pagination {
    pub const MAX_PAGE_SIZE: u64 = 200;

    pub fn new(page: u64, page_size: u64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_job() -> JobRecord {
        JobRecord::new(
            JobDefinition::new(categories::PHONE_GENERATION, "alice", json!({"quantity": 10})),
            3,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = new_job();
        assert_eq!(job.status, JobStatus::Pending);
        job.transition(JobStatus::Started).unwrap();
        assert!(job.started_at.is_some());
        job.apply_progress(&ProgressUpdate::from_counts(5, 10, "generating"))
            .unwrap();
        assert_eq!(job.status, JobStatus::Progress);
        assert_eq!(job.progress, 50.0);
        job.transition(JobStatus::Success).unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        for terminal in [JobStatus::Success, JobStatus::Revoked] {
            for next in [
                JobStatus::Started,
                JobStatus::Progress,
                JobStatus::Revoked,
                JobStatus::Failure,
                JobStatus::Retry,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
        // FAILURE 只允许进入 RETRY
        assert!(JobStatus::Failure.can_transition_to(JobStatus::Retry));
        assert!(!JobStatus::Failure.can_transition_to(JobStatus::Revoked));
        assert!(!JobStatus::Failure.can_transition_to(JobStatus::Started));
    }

    #[test]
    fn test_revoked_reachable_from_any_active_state() {
        for status in [
            JobStatus::Pending,
            JobStatus::Started,
            JobStatus::Progress,
            JobStatus::Paused,
            JobStatus::Retry,
        ] {
            assert!(status.can_transition_to(JobStatus::Revoked));
        }
    }

    #[test]
    fn test_progress_cannot_decrease() {
        let mut job = new_job();
        job.transition(JobStatus::Started).unwrap();
        job.apply_progress(&ProgressUpdate::new(40.0, None, 4, 10)).unwrap();
        let err = job
            .apply_progress(&ProgressUpdate::new(30.0, None, 3, 10))
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
        assert_eq!(job.progress, 40.0);
        assert_eq!(job.processed_count, 4);
    }

    #[test]
    fn test_processed_cannot_exceed_total() {
        let mut job = new_job();
        job.transition(JobStatus::Started).unwrap();
        assert!(job
            .apply_progress(&ProgressUpdate::new(10.0, None, 11, 10))
            .is_err());
        assert!(job
            .apply_progress(&ProgressUpdate::new(101.0, None, 1, 10))
            .is_err());
    }

    #[test]
    fn test_retry_edge_resets_attempt_state() {
        let mut job = new_job();
        job.transition(JobStatus::Started).unwrap();
        job.apply_progress(&ProgressUpdate::from_counts(3, 10, "x"))
            .unwrap();
        job.transition(JobStatus::Failure).unwrap();
        job.error_message = Some("timeout".into());
        job.error_retryable = true;
        assert!(job.can_retry());

        job.transition(JobStatus::Retry).unwrap();
        assert_eq!(job.attempt, 2);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.processed_count, 0);
        assert!(job.error_message.is_none());
        job.transition(JobStatus::Started).unwrap();
    }

    #[test]
    fn test_can_retry_respects_attempt_cap_and_classification() {
        let mut job = new_job();
        job.max_attempts = 1;
        job.transition(JobStatus::Started).unwrap();
        job.transition(JobStatus::Failure).unwrap();
        job.error_retryable = true;
        assert!(!job.can_retry());

        job.max_attempts = 2;
        job.error_retryable = false;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_status_roundtrip_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Paused,
            JobStatus::Revoked,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let job = new_job();
        assert!(JobFilter::for_owner("alice").matches(&job));
        assert!(!JobFilter::for_owner("bob").matches(&job));
        let filter = JobFilter {
            status: Some(JobStatus::Success),
            ..JobFilter::default()
        };
        assert!(!filter.matches(&job));
    }
}

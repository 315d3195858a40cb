use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use campaign_core::{
    config::models::RunnerConfig,
    models::{JobEventEnvelope, JobRecord, JobStatus},
    traits::JobEventPublisher,
    CampaignError, CampaignResult,
};
use campaign_infrastructure::Repositories;

use crate::context::JobContext;
use crate::executor::{ExecutorRegistry, JobExecutor};
use crate::runner::JobRunner;

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<JobEventEnvelope>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<JobEventEnvelope> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event.kind()).collect()
    }
}

impl JobEventPublisher for RecordingPublisher {
    fn publish(&self, envelope: JobEventEnvelope) {
        self.events.lock().unwrap().push(envelope);
    }
}

/// 每个单元都要等测试放行一个许可
pub struct GatedExecutor {
    gate: Arc<Semaphore>,
    units: u64,
}

impl GatedExecutor {
    pub fn new(units: u64) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: gate.clone(),
                units,
            },
            gate,
        )
    }
}

#[async_trait]
impl JobExecutor for GatedExecutor {
    fn category(&self) -> &str {
        "gated"
    }

    fn validate(&self, _payload: &Value) -> CampaignResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &JobContext) -> CampaignResult<Value> {
        for processed in 1..=self.units {
            ctx.checkpoint()?;
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => return Err(CampaignError::Cancelled),
                permit = self.gate.acquire() => permit
                    .map_err(|_| CampaignError::internal("gate closed"))?
                    .forget(),
            }
            ctx.report_counts(processed, self.units, "gated").await?;
        }
        Ok(json!({"units": self.units}))
    }
}

/// 前 `failures` 次执行返回给定错误，之后成功
pub struct FlakyExecutor {
    remaining: AtomicU32,
    retryable: bool,
}

impl FlakyExecutor {
    pub fn new(failures: u32, retryable: bool) -> Self {
        Self {
            remaining: AtomicU32::new(failures),
            retryable,
        }
    }
}

#[async_trait]
impl JobExecutor for FlakyExecutor {
    fn category(&self) -> &str {
        "flaky"
    }

    fn validate(&self, _payload: &Value) -> CampaignResult<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &JobContext) -> CampaignResult<Value> {
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !failing {
            return Ok(json!({"ok": true}));
        }
        if self.retryable {
            Err(CampaignError::Network("connection reset".into()))
        } else {
            Err(CampaignError::internal("broken invariant"))
        }
    }
}

/// 一直睡眠，用来触发任务超时
pub struct SleepyExecutor;

#[async_trait]
impl JobExecutor for SleepyExecutor {
    fn category(&self) -> &str {
        "sleepy"
    }

    fn validate(&self, _payload: &Value) -> CampaignResult<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &JobContext) -> CampaignResult<Value> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok(Value::Null)
    }
}

pub fn runner_config() -> RunnerConfig {
    RunnerConfig {
        max_concurrent_jobs: 4,
        job_timeout_seconds: 60,
        default_max_attempts: 3,
        auto_retry: false,
        retry_base_delay_seconds: 5,
        retry_max_delay_seconds: 60,
        retry_backoff_multiplier: 2.0,
        retry_jitter_factor: 0.0,
    }
}

pub async fn runner_with(
    repos: &Repositories,
    publisher: Arc<RecordingPublisher>,
    config: RunnerConfig,
    executors: Vec<Arc<dyn JobExecutor>>,
) -> Arc<JobRunner> {
    let registry = Arc::new(ExecutorRegistry::new());
    for executor in executors {
        registry.register(executor).await;
    }
    Arc::new(JobRunner::new(repos.jobs.clone(), registry, publisher, config))
}

/// 轮询直到任务满足条件；配合暂停时钟使用时 sleep 会自动推进
pub async fn wait_for_job<F>(repos: &Repositories, job_id: uuid::Uuid, predicate: F) -> JobRecord
where
    F: Fn(&JobRecord) -> bool,
{
    for _ in 0..10_000 {
        if let Some(record) = repos.jobs.get(job_id).await.unwrap() {
            if predicate(&record) {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached the expected state");
}

pub async fn wait_for_status(repos: &Repositories, job_id: uuid::Uuid, status: JobStatus) -> JobRecord {
    wait_for_job(repos, job_id, |record| record.status == status).await
}

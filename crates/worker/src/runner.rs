use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use campaign_core::{
    config::models::RunnerConfig,
    models::{JobDefinition, JobEvent, JobEventEnvelope, JobRecord, JobStatus},
    traits::{JobEventPublisher, JobRepository},
    CampaignError, CampaignResult,
};

use crate::context::{EventSequence, JobContext};
use crate::executor::ExecutorRegistry;

/// 正在本进程中排队或执行的任务
struct RunningJob {
    attempt: u32,
    cancel: CancellationToken,
    sequence: Arc<EventSequence>,
}

/// 任务执行器
///
/// 负责提交校验、并发槽位、尝试超时以及失败后的自动重试。
/// 资源池耗尽暂停的任务不占槽位，暂停时间也不计入超时。
pub struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    registry: Arc<ExecutorRegistry>,
    publisher: Arc<dyn JobEventPublisher>,
    config: RunnerConfig,
    slots: Arc<Semaphore>,
    running: Mutex<HashMap<Uuid, RunningJob>>,
    /// 可重试失败任务的事件序号，下次尝试继续递增
    parked: Mutex<HashMap<Uuid, Arc<EventSequence>>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        registry: Arc<ExecutorRegistry>,
        publisher: Arc<dyn JobEventPublisher>,
        config: RunnerConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            jobs,
            registry,
            publisher,
            config,
            slots,
            running: Mutex::new(HashMap::new()),
            parked: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    pub fn publisher(&self) -> &Arc<dyn JobEventPublisher> {
        &self.publisher
    }

    /// 提交任务
    ///
    /// 参数先经执行器校验，校验失败直接返回 `Validation`，不会创建任务记录。
    pub async fn submit(self: &Arc<Self>, definition: JobDefinition) -> CampaignResult<Uuid> {
        if self.shutdown.is_cancelled() {
            return Err(CampaignError::internal("服务正在关闭，不再接受新任务"));
        }
        if definition.owner.trim().is_empty() {
            return Err(CampaignError::validation("任务所有者不能为空"));
        }
        let executor = self.registry.get(&definition.category).await?;
        executor.validate(&definition.payload)?;

        let record = JobRecord::new(definition, self.config.default_max_attempts);
        self.jobs.create(&record).await?;
        counter!("campaign_jobs_submitted_total", "category" => record.category.clone()).increment(1);
        info!("任务 {} ({}) 已提交，所有者: {}", record.id, record.category, record.owner);

        let job_id = record.id;
        self.launch(record, Arc::new(EventSequence::default()));
        Ok(job_id)
    }

    /// 对一个可重试的失败任务发起新的尝试（`FAILURE → RETRY → STARTED`）
    pub async fn retry(self: &Arc<Self>, job_id: Uuid) -> CampaignResult<JobRecord> {
        let mut record = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(CampaignError::JobNotFound { id: job_id })?;
        if !record.can_retry() {
            return Err(CampaignError::InvalidState {
                id: job_id,
                status: record.status,
            });
        }

        record.transition(JobStatus::Retry)?;
        self.jobs.update(&record).await?;
        counter!("campaign_jobs_retried_total").increment(1);
        info!("任务 {} 开始第 {} 次尝试", job_id, record.attempt);

        let sequence = self
            .parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id)
            .unwrap_or_default();
        self.publisher.publish(JobEventEnvelope::new(
            record.owner.clone(),
            sequence.next(),
            JobEvent::JobUpdate {
                job: record.status_view(),
            },
        ));
        self.launch(record.clone(), sequence);
        Ok(record)
    }

    /// 请求取消本进程中的任务；任务不在本进程中时返回 `false`
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(&job_id) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job_id)
    }

    /// 以任务自身的事件序号发布事件；任务不在本进程中时序号为 0
    pub fn publish_for(&self, owner: &str, job_id: Uuid, event: JobEvent) {
        let sequence = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .map_or(0, |job| job.sequence.next());
        self.publisher
            .publish(JobEventEnvelope::new(owner.to_string(), sequence, event));
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 取消所有任务并等待执行协程退出
    pub async fn shutdown(&self, grace: Duration) {
        info!("任务执行器关闭中，正在运行的任务: {}", self.running_count());
        self.shutdown.cancel();
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!("等待任务退出超时 ({:?})", grace);
        }
    }

    /// 退避间隔：指数增长、封顶并加入随机抖动，不小于基础间隔
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay_seconds as f64;
        let max = self.config.retry_max_delay_seconds as f64;
        let exponent = attempt.saturating_sub(1).min(32) as i32;

        let capped = (base * self.config.retry_backoff_multiplier.powi(exponent)).min(max);
        let jitter = capped * self.config.retry_jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_secs_f64((capped + jitter).max(base))
    }

    /// 丢弃已被清理的任务所保留的事件序号
    pub async fn prune_parked(&self) -> CampaignResult<usize> {
        let parked: Vec<Uuid> = self
            .parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        let mut pruned = 0;
        for job_id in parked {
            if self.jobs.get(job_id).await?.is_none() {
                self.parked
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&job_id);
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    fn launch(self: &Arc<Self>, record: JobRecord, sequence: Arc<EventSequence>) {
        let cancel = self.shutdown.child_token();
        let attempt = record.attempt;
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                record.id,
                RunningJob {
                    attempt,
                    cancel: cancel.clone(),
                    sequence: sequence.clone(),
                },
            );
        gauge!("campaign_jobs_running").set(self.running_count() as f64);

        let runner = Arc::clone(self);
        self.tasks.spawn(async move {
            let job_id = record.id;
            runner.run_attempt(record, sequence, cancel).await;
            {
                // 自动重试可能已经登记了下一次尝试
                let mut running = runner.running.lock().unwrap_or_else(|e| e.into_inner());
                if running.get(&job_id).is_some_and(|job| job.attempt == attempt) {
                    running.remove(&job_id);
                }
            }
            gauge!("campaign_jobs_running").set(runner.running_count() as f64);
        });
    }

    async fn run_attempt(
        self: &Arc<Self>,
        record: JobRecord,
        sequence: Arc<EventSequence>,
        cancel: CancellationToken,
    ) {
        let job_id = record.id;
        let category = record.category.clone();
        let ctx = JobContext::new(
            record,
            self.jobs.clone(),
            self.publisher.clone(),
            sequence.clone(),
            cancel.clone(),
        );

        // 等待并发槽位期间任务保持 PENDING/RETRY，可被取消
        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                Self::finish_revoked(&ctx).await;
                return;
            }
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    error!("并发槽位已关闭，任务 {} 无法执行", job_id);
                    return;
                }
            },
        };

        ctx.attach_slot(self.slots.clone(), permit);
        let outcome = self.execute(&ctx, &category).await;
        ctx.release_slot();

        match outcome {
            Ok(value) => {
                if let Err(e) = ctx.mark_success(value).await {
                    Self::handle_finalize_error(&ctx, e).await;
                } else {
                    counter!("campaign_jobs_finished_total", "status" => "success").increment(1);
                }
            }
            Err(CampaignError::Cancelled) => Self::finish_revoked(&ctx).await,
            Err(e) => {
                warn!("任务 {} 执行失败: {}", job_id, e);
                if let Err(persist_err) = ctx.mark_failure(&e).await {
                    Self::handle_finalize_error(&ctx, persist_err).await;
                    return;
                }
                counter!("campaign_jobs_finished_total", "status" => "failure").increment(1);
                let failed = ctx.snapshot().await;
                if failed.can_retry() {
                    self.parked
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(failed.id, sequence);
                    if self.config.auto_retry {
                        self.schedule_retry(failed.id, failed.attempt);
                    }
                }
            }
        }
    }

    async fn execute(&self, ctx: &JobContext, category: &str) -> CampaignResult<serde_json::Value> {
        let executor = self.registry.get(category).await?;
        ctx.start().await?;

        let mut deadline = ctx.arm_deadline(Duration::from_secs(self.config.job_timeout_seconds));
        let work = executor.execute(ctx);
        tokio::pin!(work);
        let result = loop {
            let at = *deadline.borrow_and_update();
            tokio::select! {
                result = &mut work => break result,
                _ = sleep_until_deadline(at) => {
                    return Err(CampaignError::Timeout(format!(
                        "任务执行超过 {} 秒",
                        self.config.job_timeout_seconds
                    )));
                }
                _ = deadline_changed(&mut deadline) => {}
            }
        };

        if ctx.is_cancelled() {
            // 取消优先于执行结果
            return Err(CampaignError::Cancelled);
        }
        result
    }

    fn schedule_retry(self: &Arc<Self>, job_id: Uuid, attempt: u32) {
        let delay = self.retry_delay(attempt);
        info!("任务 {} 将在 {:?} 后自动重试", job_id, delay);
        let runner = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = runner.shutdown.cancelled() => {
                    debug!("关闭期间放弃任务 {} 的自动重试", job_id);
                }
                _ = tokio::time::sleep(delay) => {
                    match runner.retry(job_id).await {
                        Ok(_) => {}
                        // 已经被人工重试或清理
                        Err(CampaignError::InvalidState { .. }) | Err(CampaignError::JobNotFound { .. }) => {}
                        Err(e) => error!("任务 {} 自动重试失败: {}", job_id, e),
                    }
                }
            }
        });
    }

    async fn finish_revoked(ctx: &JobContext) {
        match ctx.mark_revoked().await {
            Ok(()) | Err(CampaignError::Cancelled) => {
                counter!("campaign_jobs_finished_total", "status" => "revoked").increment(1);
            }
            Err(e) => error!("任务 {} 标记取消失败: {}", ctx.job_id(), e),
        }
    }

    async fn handle_finalize_error(ctx: &JobContext, error: CampaignError) {
        match error {
            // 记录已被外部置为终态
            CampaignError::Cancelled => {}
            CampaignError::InvalidTransition { .. } => Self::finish_revoked(ctx).await,
            other => error!("任务 {} 保存最终状态失败: {}", ctx.job_id(), other),
        }
    }
}

/// 暂停期间没有截止时间，永不到期
async fn sleep_until_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn deadline_changed(deadline: &mut watch::Receiver<Option<Instant>>) {
    if deadline.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

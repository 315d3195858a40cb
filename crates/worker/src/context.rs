//! 任务执行上下文
//!
//! 每次执行尝试持有一份任务记录的本地副本，所有状态转换都先在副本上校验，
//! 再通过仓储的条件更新持久化，最后向所有者的通知通道发布事件。
//! 事件的 `sequence` 在同一任务内单调递增。
//!
//! 资源池耗尽暂停期间，任务归还并发槽位，尝试时限也停止计时；
//! 恢复时重新申请槽位，时限顺延。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use campaign_core::{
    models::{JobEvent, JobEventEnvelope, JobRecord, JobStatus, ProgressUpdate, ResourceRole},
    traits::{JobEventPublisher, JobRepository},
    CampaignError, CampaignResult,
};

/// 单个任务的事件序号生成器，在多次尝试之间共享
#[derive(Debug, Default)]
pub struct EventSequence(AtomicU64);

impl EventSequence {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// 执行期间占用的并发槽位
#[derive(Default)]
struct SlotLease {
    slots: Option<Arc<Semaphore>>,
    permit: Option<OwnedSemaphorePermit>,
}

/// 本次尝试的截止时间；暂停期间为 `None`
struct AttemptClock {
    deadline: watch::Sender<Option<Instant>>,
    remaining: StdMutex<Option<Duration>>,
}

pub struct JobContext {
    job_id: Uuid,
    owner: String,
    category: String,
    payload: Value,
    record: Mutex<JobRecord>,
    jobs: Arc<dyn JobRepository>,
    publisher: Arc<dyn JobEventPublisher>,
    sequence: Arc<EventSequence>,
    cancel: CancellationToken,
    slot: StdMutex<SlotLease>,
    clock: AttemptClock,
}

impl JobContext {
    pub fn new(
        record: JobRecord,
        jobs: Arc<dyn JobRepository>,
        publisher: Arc<dyn JobEventPublisher>,
        sequence: Arc<EventSequence>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: record.id,
            owner: record.owner.clone(),
            category: record.category.clone(),
            payload: record.payload.clone(),
            record: Mutex::new(record),
            jobs,
            publisher,
            sequence,
            cancel,
            slot: StdMutex::new(SlotLease::default()),
            clock: AttemptClock {
                deadline: watch::channel(None).0,
                remaining: StdMutex::new(None),
            },
        }
    }

    /// 交给上下文管理的并发槽位，暂停时归还
    pub fn attach_slot(&self, slots: Arc<Semaphore>, permit: OwnedSemaphorePermit) {
        let mut lease = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        lease.slots = Some(slots);
        lease.permit = Some(permit);
    }

    pub fn release_slot(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).permit = None;
    }

    pub fn holds_slot(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .permit
            .is_some()
    }

    async fn reacquire_slot(&self) -> CampaignResult<()> {
        let slots = {
            let lease = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match (&lease.slots, &lease.permit) {
                (Some(slots), None) => Arc::clone(slots),
                _ => return Ok(()),
            }
        };
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(CampaignError::Cancelled),
            permit = slots.acquire_owned() => permit
                .map_err(|_| CampaignError::internal("并发槽位已关闭"))?,
        };
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).permit = Some(permit);
        Ok(())
    }

    /// 开始计时，返回截止时间的订阅端
    pub fn arm_deadline(&self, budget: Duration) -> watch::Receiver<Option<Instant>> {
        *self.clock.remaining.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.clock.deadline.send_replace(Some(Instant::now() + budget));
        self.clock.deadline.subscribe()
    }

    fn suspend_clock(&self) {
        let Some(at) = self.clock.deadline.send_replace(None) else {
            return;
        };
        *self.clock.remaining.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(at.saturating_duration_since(Instant::now()));
    }

    fn resume_clock(&self) {
        let remaining = self
            .clock
            .remaining
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(remaining) = remaining {
            self.clock.deadline.send_replace(Some(Instant::now() + remaining));
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 工作单元之间的取消检查点
    pub fn checkpoint(&self) -> CampaignResult<()> {
        if self.cancel.is_cancelled() {
            Err(CampaignError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn snapshot(&self) -> JobRecord {
        self.record.lock().await.clone()
    }

    pub async fn start(&self) -> CampaignResult<()> {
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        next.transition(JobStatus::Started)?;
        self.persist(&next).await?;
        *record = next;
        info!("任务 {} ({}) 开始执行，第 {} 次尝试", self.job_id, self.category, record.attempt);
        self.publish_update(&record);
        Ok(())
    }

    /// 百分比不允许回退，processed 不允许超过 total
    pub async fn update_progress(
        &self,
        percent: f64,
        step: impl Into<String>,
        processed: u64,
        total: u64,
    ) -> CampaignResult<()> {
        self.apply(ProgressUpdate::new(percent, Some(step.into()), processed, total))
            .await
    }

    /// 按计数推算百分比的进度更新
    pub async fn report_counts(
        &self,
        processed: u64,
        total: u64,
        step: impl Into<String>,
    ) -> CampaignResult<()> {
        self.apply(ProgressUpdate::from_counts(processed, total, step))
            .await
    }

    async fn apply(&self, update: ProgressUpdate) -> CampaignResult<()> {
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        next.apply_progress(&update)?;
        self.persist(&next).await?;
        *record = next;
        debug!(
            "任务 {} 进度 {:.1}% ({}/{})",
            self.job_id, record.progress, record.processed_count, record.total_count
        );
        self.publish_update(&record);
        Ok(())
    }

    /// 资源池耗尽时挂起任务，并发布资源池耗尽警告
    pub async fn pause(&self, role: ResourceRole, message: impl Into<String>) -> CampaignResult<()> {
        let message = message.into();
        let mut record = self.record.lock().await;
        if record.status == JobStatus::Paused {
            return Ok(());
        }
        let mut next = record.clone();
        next.transition(JobStatus::Paused)?;
        next.paused_reason = Some(message.clone());
        self.persist(&next).await?;
        *record = next;
        self.suspend_clock();
        self.release_slot();

        warn!("任务 {} 已暂停: {}", self.job_id, message);
        self.publish_update(&record);
        self.publish(JobEvent::PoolExhausted {
            job_id: self.job_id,
            role,
            message,
        });
        Ok(())
    }

    /// 资源池恢复后重新申请并发槽位再继续执行，进度保持不变
    pub async fn resume(&self) -> CampaignResult<()> {
        if self.record.lock().await.status != JobStatus::Paused {
            return Ok(());
        }
        self.reacquire_slot().await?;

        let mut record = self.record.lock().await;
        if record.status != JobStatus::Paused {
            return Ok(());
        }
        let mut next = record.clone();
        next.transition(JobStatus::Progress)?;
        self.persist(&next).await?;
        *record = next;
        self.resume_clock();
        info!("任务 {} 资源池已恢复，继续执行", self.job_id);
        self.publish_update(&record);
        Ok(())
    }

    pub async fn mark_success(&self, result: Value) -> CampaignResult<()> {
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        if next.status == JobStatus::Paused {
            next.transition(JobStatus::Progress)?;
        }
        next.result_data = Some(result);
        next.transition(JobStatus::Success)?;
        self.finish(&mut record, next).await
    }

    pub async fn mark_failure(&self, error: &CampaignError) -> CampaignResult<()> {
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        next.error_message = Some(error.to_string());
        next.error_retryable = error.is_retryable();
        next.transition(JobStatus::Failure)?;
        self.finish(&mut record, next).await
    }

    /// 响应取消请求；已处理的进度原样保留
    pub async fn mark_revoked(&self) -> CampaignResult<()> {
        let mut record = self.record.lock().await;
        if record.is_terminal() {
            return Ok(());
        }
        let mut next = record.clone();
        next.transition(JobStatus::Revoked)?;
        self.finish(&mut record, next).await
    }

    async fn finish(&self, record: &mut JobRecord, next: JobRecord) -> CampaignResult<()> {
        self.persist(&next).await?;
        *record = next;
        info!(
            "任务 {} 结束: {} (已处理 {}/{})",
            self.job_id, record.status, record.processed_count, record.total_count
        );
        self.publish(JobEvent::JobCompleted {
            job: record.status_view(),
            result: record.result_data.clone(),
        });
        Ok(())
    }

    /// 仓储拒绝写入（记录已被外部置为终态）时视为取消
    async fn persist(&self, record: &JobRecord) -> CampaignResult<()> {
        match self.jobs.update(record).await {
            Err(CampaignError::InvalidState { status, .. }) => {
                warn!("任务 {} 已处于终态 {}，停止写入", self.job_id, status);
                self.cancel.cancel();
                Err(CampaignError::Cancelled)
            }
            other => other,
        }
    }

    fn publish_update(&self, record: &JobRecord) {
        self.publish(JobEvent::JobUpdate {
            job: record.status_view(),
        });
    }

    fn publish(&self, event: JobEvent) {
        self.publisher.publish(JobEventEnvelope::new(
            self.owner.clone(),
            self.sequence.next(),
            event,
        ));
    }
}

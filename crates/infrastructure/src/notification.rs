//! 按所有者划分的任务事件广播
//!
//! 每个所有者一个 `tokio::sync::broadcast` 通道，任务是生产者，在线会话是消费者。
//! 投递是尽力而为的：没有订阅者时事件直接丢弃，也不做重放；迟到的消费者
//! 通过订阅时下发的活跃任务快照对齐状态。最后一个订阅者断开时释放通道。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use campaign_core::{
    models::{JobEvent, JobEventEnvelope, JobStatusView},
    traits::JobEventPublisher,
};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

pub struct NotificationHub {
    channels: Mutex<HashMap<String, broadcast::Sender<JobEventEnvelope>>>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<JobEventEnvelope>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 订阅某个所有者的事件；返回的订阅在 drop 时自动退订
    pub fn subscribe(self: &Arc<Self>, owner: &str) -> Subscription {
        let receiver = {
            let mut channels = self.channels();
            channels
                .entry(owner.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        debug!("新的事件订阅: {}", owner);
        Subscription {
            owner: owner.to_string(),
            receiver,
            snapshot: None,
            hub: Arc::clone(self),
        }
    }

    pub fn subscriber_count(&self, owner: &str) -> usize {
        self.channels()
            .get(owner)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// 当前持有通道的所有者数量
    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    fn release(&self, owner: &str) {
        let mut channels = self.channels();
        // drop 期间当前接收端仍然存活，计数为 1 表示这是最后一个
        if channels
            .get(owner)
            .is_some_and(|sender| sender.receiver_count() <= 1)
        {
            channels.remove(owner);
            debug!("释放事件通道: {}", owner);
        }
    }
}

impl JobEventPublisher for NotificationHub {
    fn publish(&self, envelope: JobEventEnvelope) {
        let sender = self.channels().get(&envelope.owner).cloned();
        if let Some(sender) = sender {
            // 发送失败只意味着此刻没有订阅者
            let _ = sender.send(envelope);
        }
    }
}

enum Next {
    Event(Option<JobEventEnvelope>),
    Heartbeat,
}

/// 单个在线会话的订阅
pub struct Subscription {
    owner: String,
    receiver: broadcast::Receiver<JobEventEnvelope>,
    snapshot: Option<JobEventEnvelope>,
    hub: Arc<NotificationHub>,
}

impl Subscription {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 设置首个下发的活跃任务快照
    ///
    /// 快照应在订阅之后再查询，这样两者之间产生的事件不会丢失。
    pub fn with_snapshot(mut self, jobs: Vec<JobStatusView>) -> Self {
        self.snapshot = Some(JobEventEnvelope::new(
            self.owner.clone(),
            0,
            JobEvent::ActiveJobsSnapshot { jobs },
        ));
        self
    }

    /// 接收下一个事件；处理过慢时跳过错过的事件继续接收
    pub async fn recv(&mut self) -> Option<JobEventEnvelope> {
        if let Some(snapshot) = self.snapshot.take() {
            return Some(snapshot);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(owner = %self.owner, skipped, "订阅者处理过慢，丢弃了部分事件");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// 转换为带心跳的事件流
    pub fn into_stream(self, heartbeat: Duration) -> impl Stream<Item = JobEventEnvelope> + Send {
        let ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        futures::stream::unfold((self, ticker), |(mut subscription, mut ticker)| async move {
            if let Some(snapshot) = subscription.snapshot.take() {
                return Some((snapshot, (subscription, ticker)));
            }
            let next = tokio::select! {
                event = subscription.recv() => Next::Event(event),
                _ = ticker.tick() => Next::Heartbeat,
            };
            match next {
                Next::Event(Some(envelope)) => Some((envelope, (subscription, ticker))),
                Next::Event(None) => None,
                Next::Heartbeat => {
                    let envelope =
                        JobEventEnvelope::new(subscription.owner.clone(), 0, JobEvent::Heartbeat);
                    Some((envelope, (subscription, ticker)))
                }
            }
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release(&self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use uuid::Uuid;

    fn stalled(owner: &str, sequence: u64) -> JobEventEnvelope {
        JobEventEnvelope::new(
            owner,
            sequence,
            JobEvent::JobStalled {
                job_id: Uuid::nil(),
                idle_seconds: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_events_are_scoped_per_owner() {
        let hub = Arc::new(NotificationHub::new(16));
        let mut alice = hub.subscribe("alice");
        let mut bob = hub.subscribe("bob");

        hub.publish(stalled("alice", 1));
        hub.publish(stalled("bob", 7));

        assert_eq!(alice.recv().await.unwrap().sequence, 1);
        assert_eq!(bob.recv().await.unwrap().sequence, 7);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let hub = Arc::new(NotificationHub::new(16));
        hub.publish(stalled("alice", 1));
        assert_eq!(hub.channel_count(), 0);

        let mut sub = hub.subscribe("alice");
        hub.publish(stalled("alice", 2));
        assert_eq!(sub.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_last_unsubscribe_releases_channel() {
        let hub = Arc::new(NotificationHub::new(16));
        let first = hub.subscribe("alice");
        let second = hub.subscribe("alice");
        assert_eq!(hub.subscriber_count("alice"), 2);

        drop(first);
        assert_eq!(hub.channel_count(), 1);
        drop(second);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_receiving() {
        let hub = Arc::new(NotificationHub::new(2));
        let mut sub = hub.subscribe("alice");
        for seq in 1..=5 {
            hub.publish(stalled("alice", seq));
        }
        // 容量为 2，只剩最后两条
        assert_eq!(sub.recv().await.unwrap().sequence, 4);
        assert_eq!(sub.recv().await.unwrap().sequence, 5);
    }

    #[tokio::test]
    async fn test_stream_starts_with_snapshot_then_events() {
        let hub = Arc::new(NotificationHub::new(16));
        let sub = hub.subscribe("alice").with_snapshot(Vec::new());
        let mut stream = Box::pin(sub.into_stream(Duration::from_secs(3600)));

        let first = stream.next().await.unwrap();
        assert_eq!(first.event.kind(), "active_jobs_snapshot");

        hub.publish(stalled("alice", 3));
        let second = stream.next().await.unwrap();
        assert_eq!(second.sequence, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_emits_heartbeats() {
        let hub = Arc::new(NotificationHub::new(16));
        let sub = hub.subscribe("alice");
        let mut stream = Box::pin(sub.into_stream(Duration::from_secs(15)));

        let event = stream.next().await.unwrap();
        assert_eq!(event.event, JobEvent::Heartbeat);
    }
}

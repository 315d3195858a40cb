use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);
const PRUNE_THRESHOLD: usize = 10_000;

/// 按目标号码的滑动窗口限速
///
/// 超出限额的投递只会被推迟到窗口内最早一次投递过期之后，从不丢弃。
/// 限速器在所有任务之间共享，同一号码的投递次数按全局计算。
#[derive(Default)]
pub struct DestinationRateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl DestinationRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 等待直到 `destination` 在最近一分钟内的投递次数低于 `per_minute`，并占用一个名额
    pub async fn acquire(&self, destination: &str, per_minute: u32) {
        let limit = per_minute.max(1) as usize;
        loop {
            let wait = match self.try_acquire(destination, limit, Instant::now()) {
                None => return,
                Some(wait) => wait,
            };
            debug!("目标 {} 已达限速 {}/分钟，等待 {:?}", destination, limit, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// 成功占用名额返回 `None`，否则返回需要等待的时长
    fn try_acquire(&self, destination: &str, limit: usize, now: Instant) -> Option<Duration> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, stamps| {
                stamps
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < WINDOW)
            });
        }

        let stamps = windows.entry(destination.to_string()).or_default();
        while stamps
            .front()
            .is_some_and(|first| now.duration_since(*first) >= WINDOW)
        {
            stamps.pop_front();
        }

        if stamps.len() < limit {
            stamps.push_back(now);
            return None;
        }
        stamps
            .front()
            .map(|first| (*first + WINDOW).saturating_duration_since(now))
    }

    pub fn tracked_destinations(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

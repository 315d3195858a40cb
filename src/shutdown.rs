use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 后台循环通过 `subscribe` 拿到接收器；关闭只触发一次，之后订阅的接收器立即就绪。
#[derive(Clone)]
pub struct ShutdownManager {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                tx,
                triggered: AtomicBool::new(false),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        // 先订阅再检查标记，与 shutdown 的先置位后发送配合不会漏掉信号
        let rx = self.inner.tx.subscribe();
        if !self.is_shutdown() {
            return rx;
        }
        let (tx, rx) = broadcast::channel(1);
        let _ = tx.send(());
        rx
    }

    pub fn shutdown(&self) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭信号已经发送过");
            return;
        }
        let receivers = self.inner.tx.send(()).unwrap_or(0);
        info!("关闭信号已发送给 {} 个订阅者", receivers);
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_reaches_every_subscriber() {
        let manager = ShutdownManager::new();
        let mut first = manager.subscribe();
        let mut second = manager.clone().subscribe();

        assert!(!manager.is_shutdown());
        manager.shutdown();

        assert!(timeout(Duration::from_secs(1), first.recv()).await.unwrap().is_ok());
        assert!(timeout(Duration::from_secs(1), second.recv()).await.unwrap().is_ok());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_fires_immediately() {
        let manager = ShutdownManager::new();
        manager.shutdown();
        manager.shutdown();

        let mut late = manager.subscribe();
        assert!(timeout(Duration::from_secs(1), late.recv()).await.unwrap().is_ok());
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use campaign_core::{traits::CursorStore, CampaignResult};
use tokio::sync::RwLock;

/// 进程内的轮询游标，每个资源池一个原子计数器
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cursor(&self, pool_key: &str) -> Arc<AtomicU64> {
        if let Some(cursor) = self.cursors.read().await.get(pool_key) {
            return cursor.clone();
        }
        self.cursors
            .write()
            .await
            .entry(pool_key.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn next_position(&self, pool_key: &str) -> CampaignResult<u64> {
        Ok(self.cursor(pool_key).await.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_concurrent_positions_are_unique() {
        let store = Arc::new(InMemoryCursorStore::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.next_position("proxy").await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            assert!(seen.insert(h.await.unwrap()));
        }
        assert_eq!(seen.len(), 64);
        assert_eq!(store.next_position("relay").await.unwrap(), 0);
    }
}

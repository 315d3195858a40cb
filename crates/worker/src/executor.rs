use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use campaign_core::{CampaignError, CampaignResult};

use crate::context::JobContext;

/// 任务执行器
///
/// `validate` 在提交时同步调用，失败的任务不会产生任何记录；
/// `execute` 返回的值写入 `result_data`。
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn category(&self) -> &str;

    fn validate(&self, payload: &Value) -> CampaignResult<()>;

    async fn execute(&self, ctx: &JobContext) -> CampaignResult<Value>;
}

/// 按任务类别索引的执行器注册表
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn JobExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, executor: Arc<dyn JobExecutor>) {
        let category = executor.category().to_string();
        info!("注册任务执行器: {}", category);
        self.executors.write().await.insert(category, executor);
    }

    pub async fn get(&self, category: &str) -> CampaignResult<Arc<dyn JobExecutor>> {
        self.executors
            .read()
            .await
            .get(category)
            .cloned()
            .ok_or_else(|| CampaignError::UnknownCategory(category.to_string()))
    }

    pub async fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.executors.read().await.keys().cloned().collect();
        categories.sort();
        categories
    }
}

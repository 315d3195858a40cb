use serde::{Deserialize, Serialize};

/// 任务执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub max_concurrent_jobs: usize,
    /// 单次尝试的整体超时
    pub job_timeout_seconds: u64,
    pub default_max_attempts: u32,
    /// 可重试的失败是否自动安排下一次尝试
    pub auto_retry: bool,
    pub retry_base_delay_seconds: u64,
    pub retry_max_delay_seconds: u64,
    pub retry_backoff_multiplier: f64,
    /// 0.0 - 1.0
    pub retry_jitter_factor: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 8,
            job_timeout_seconds: 3600,
            default_max_attempts: 3,
            auto_retry: false,
            retry_base_delay_seconds: 10,
            retry_max_delay_seconds: 600,
            retry_backoff_multiplier: 2.0,
            retry_jitter_factor: 0.1,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.job_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.default_max_attempts == 0 {
            return Err(anyhow::anyhow!("默认最大尝试次数必须大于0"));
        }

        if self.retry_base_delay_seconds > self.retry_max_delay_seconds {
            return Err(anyhow::anyhow!("重试基础延迟不能大于最大延迟"));
        }

        if self.retry_backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0.0到1.0之间"));
        }

        Ok(())
    }
}

/// 外发通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// 本地运行用的模拟通道
    Simulated,
    /// 经代理转发到 HTTP 中继
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 单条消息换资源重试的上限
    pub max_attempts_per_unit: u32,
    pub send_timeout_seconds: u64,
    /// 资源池耗尽暂停后，除恢复广播外的兜底重查间隔
    pub pool_recheck_interval_seconds: u64,
    pub transport: TransportKind,
    /// HTTP 中继的发送路径
    pub relay_path: String,
    pub simulated_latency_ms: u64,
    /// 0.0 - 1.0
    pub simulated_failure_rate: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_unit: 3,
            send_timeout_seconds: 30,
            pool_recheck_interval_seconds: 15,
            transport: TransportKind::Simulated,
            relay_path: "/api/messages".to_string(),
            simulated_latency_ms: 50,
            simulated_failure_rate: 0.0,
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts_per_unit == 0 {
            return Err(anyhow::anyhow!("单条消息最大尝试次数必须大于0"));
        }

        if self.send_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("发送超时时间必须大于0"));
        }

        if self.pool_recheck_interval_seconds == 0 {
            return Err(anyhow::anyhow!("资源池重查间隔必须大于0"));
        }

        if !self.relay_path.starts_with('/') {
            return Err(anyhow::anyhow!("中继路径必须以'/'开头"));
        }

        if !(0.0..=1.0).contains(&self.simulated_failure_rate) {
            return Err(anyhow::anyhow!("模拟失败率必须在0.0到1.0之间"));
        }

        Ok(())
    }
}

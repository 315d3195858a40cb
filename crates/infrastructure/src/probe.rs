use std::time::Duration;

use async_trait::async_trait;
use campaign_core::{models::ResourceRecord, traits::HealthProbe, CampaignError, CampaignResult};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// 以一次有超时的 TCP 连接作为健康探测
pub struct TcpHealthProbe {
    timeout: Duration,
}

impl TcpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for TcpHealthProbe {
    async fn probe(&self, resource: &ResourceRecord) -> CampaignResult<Duration> {
        let started = Instant::now();
        let target = (resource.address.as_str(), resource.port);
        match timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => {
                let elapsed = started.elapsed();
                debug!("探测成功: {} ({:?})", resource.endpoint(), elapsed);
                Ok(elapsed)
            }
            Ok(Err(e)) => Err(CampaignError::Network(format!(
                "连接 {} 失败: {e}",
                resource.endpoint()
            ))),
            Err(_) => Err(CampaignError::Timeout(format!(
                "连接 {} 超过 {:?}",
                resource.endpoint(),
                self.timeout
            ))),
        }
    }
}

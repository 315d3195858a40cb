#[cfg(test)]
pub mod mocks {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use campaign_core::{
        models::{
            DeliveryReceipt, DeliveryRoute, DeliveryUnit, ResourceProtocol, ResourceRecord,
            ResourceRole, SendFailure,
        },
        traits::{HealthProbe, OutboundTransport},
        CampaignError, CampaignResult,
    };
    use campaign_infrastructure::Repositories;
    use tokio::time::Instant;

    use crate::health::{HealthTrackerConfig, ResourceHealthTracker};

    /// 结果可切换的探测器
    #[derive(Clone)]
    pub struct StaticProbe {
        passing: Arc<AtomicBool>,
    }

    impl StaticProbe {
        pub fn passing() -> Self {
            Self {
                passing: Arc::new(AtomicBool::new(true)),
            }
        }

        pub fn failing() -> Self {
            Self {
                passing: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn set_passing(&self, passing: bool) {
            self.passing.store(passing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HealthProbe for StaticProbe {
        async fn probe(&self, resource: &ResourceRecord) -> CampaignResult<Duration> {
            if self.passing.load(Ordering::SeqCst) {
                Ok(Duration::from_millis(5))
            } else {
                Err(CampaignError::Network(format!("{} 拒绝连接", resource.endpoint())))
            }
        }
    }

    pub fn tracker_with(repos: &Repositories, probe: StaticProbe) -> Arc<ResourceHealthTracker> {
        Arc::new(ResourceHealthTracker::new(
            repos.resources.clone(),
            repos.usage_logs.clone(),
            Arc::new(probe),
            HealthTrackerConfig::default(),
        ))
    }

    pub async fn seed_pool(repos: &Repositories, role: ResourceRole, names: &[&str]) -> Vec<ResourceRecord> {
        let mut created = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let resource = ResourceRecord::new(
                role,
                *name,
                format!("10.0.{}.{}", role as u8, i + 1),
                8000 + i as u16,
                ResourceProtocol::Http,
            );
            created.push(repos.resources.create(&resource).await.unwrap());
        }
        created
    }

    #[derive(Debug, Clone)]
    pub struct Dispatch {
        pub at: Instant,
        pub sequence: u64,
        pub destination: String,
        pub proxy: Option<i64>,
        pub relay: Option<i64>,
    }

    /// 按预设脚本返回结果并记录每次发送的传输层
    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<DeliveryReceipt, SendFailure>>>,
        dispatches: Mutex<Vec<Dispatch>>,
        latency: Duration,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        pub fn push(&self, result: Result<DeliveryReceipt, SendFailure>) {
            self.script.lock().unwrap().push_back(result);
        }

        pub fn dispatches(&self) -> Vec<Dispatch> {
            self.dispatches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutboundTransport for ScriptedTransport {
        async fn send(
            &self,
            unit: &DeliveryUnit,
            route: &DeliveryRoute,
        ) -> Result<DeliveryReceipt, SendFailure> {
            self.dispatches.lock().unwrap().push(Dispatch {
                at: Instant::now(),
                sequence: unit.sequence,
                destination: unit.destination.clone(),
                proxy: route.proxy.as_ref().map(|r| r.id),
                relay: route.relay.as_ref().map(|r| r.id),
            });
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(DeliveryReceipt {
                provider_message_id: Some(format!("msg-{}", unit.sequence)),
                response_time: 25.0,
            }))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

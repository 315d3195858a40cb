use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use campaign_core::{config::models::HealthConfig, models::ResourceRole, CampaignResult};

use crate::{health::ResourceHealthTracker, settings_service::SettingsService};

/// 单个角色的探测计划
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSchedule {
    pub interval: Duration,
    pub max_failures: u32,
}

/// 定时健康探测
///
/// 循环按 `tick` 唤醒，每个角色到达自己的检查间隔后探测该角色下所有启用的资源
/// （包括已经不健康的资源，探测通过即恢复）。
///
/// 资源不区分所有者，所以每次唤醒都重新读取已保存的轮换设置：
/// 每个角色取所有者中最短的检查间隔和最小的失败阈值，没有任何设置时使用配置默认值。
pub struct HealthMonitor {
    tracker: Arc<ResourceHealthTracker>,
    tick: Duration,
    defaults: ProbeSchedule,
    settings: Option<Arc<SettingsService>>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProbeRoundStats {
    pub probed: usize,
    pub passed: usize,
    pub unhealthy: usize,
}

impl HealthMonitor {
    pub fn new(tracker: Arc<ResourceHealthTracker>, config: &HealthConfig) -> Self {
        Self {
            tracker,
            tick: Duration::from_secs(config.monitor_tick_seconds),
            defaults: ProbeSchedule {
                interval: Duration::from_secs(config.default_check_interval_seconds),
                max_failures: config.default_max_failures,
            },
            settings: None,
        }
    }

    /// 按所有者保存的轮换设置决定探测计划
    pub fn with_settings(mut self, settings: Arc<SettingsService>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub async fn schedules(&self) -> CampaignResult<HashMap<ResourceRole, ProbeSchedule>> {
        let saved = match &self.settings {
            Some(service) => service.list_saved().await?,
            None => Vec::new(),
        };
        Ok(ResourceRole::ALL
            .into_iter()
            .map(|role| {
                let schedule = saved
                    .iter()
                    .map(|s| ProbeSchedule {
                        interval: Duration::from_secs(s.health_check_interval_for(role)),
                        max_failures: s.max_failures_for(role),
                    })
                    .reduce(|a, b| ProbeSchedule {
                        interval: a.interval.min(b.interval),
                        max_failures: a.max_failures.min(b.max_failures),
                    })
                    .unwrap_or(self.defaults);
                (role, schedule)
            })
            .collect())
    }

    pub async fn schedule_for(&self, role: ResourceRole) -> CampaignResult<ProbeSchedule> {
        Ok(self.schedules().await?.get(&role).copied().unwrap_or(self.defaults))
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("健康监控已启动，唤醒间隔 {:?}", self.tick);
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_probed: HashMap<ResourceRole, Instant> = HashMap::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let schedules = self.schedules().await.unwrap_or_else(|e| {
                        warn!("读取轮换设置失败，使用默认探测计划: {}", e);
                        ResourceRole::ALL.into_iter().map(|r| (r, self.defaults)).collect()
                    });
                    let now = Instant::now();
                    for role in ResourceRole::ALL {
                        let schedule = schedules.get(&role).copied().unwrap_or(self.defaults);
                        let due = last_probed
                            .get(&role)
                            .map_or(true, |last| now.duration_since(*last) >= schedule.interval);
                        if !due {
                            continue;
                        }
                        last_probed.insert(role, now);
                        match self.probe_with(role, schedule.max_failures).await {
                            Ok(stats) => debug!("{} 探测完成: {:?}", role, stats),
                            Err(e) => error!("{} 资源探测失败: {}", role, e),
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("健康监控收到关闭信号");
                    break;
                }
            }
        }
        info!("健康监控已停止");
    }

    /// 探测某个角色下所有启用的资源
    pub async fn probe_role(&self, role: ResourceRole) -> CampaignResult<ProbeRoundStats> {
        let schedule = self.schedule_for(role).await?;
        self.probe_with(role, schedule.max_failures).await
    }

    async fn probe_with(&self, role: ResourceRole, max_failures: u32) -> CampaignResult<ProbeRoundStats> {
        let resources = self.tracker.resources().list(Some(role)).await?;

        let mut stats = ProbeRoundStats::default();
        for resource in resources.into_iter().filter(|r| r.is_active) {
            stats.probed += 1;
            match self.tracker.health_check(resource.id, Some(max_failures)).await {
                Ok(after) if after.consecutive_failure_count == 0 => stats.passed += 1,
                Ok(after) if !after.is_healthy => stats.unhealthy += 1,
                Ok(_) => {}
                Err(e) => warn!("探测资源 {} 时出错: {}", resource.id, e),
            }
        }
        Ok(stats)
    }
}

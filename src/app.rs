use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use campaign_api::{create_app, AppState, OwnerResolver};
use campaign_core::{
    config::{AppConfig, TransportKind},
    models::ConfigurationDocument,
    traits::OutboundTransport,
};
use campaign_dispatcher::{
    DeliveryCoordinator, HealthMonitor, HealthTrackerConfig, ImportReport, ResourceHealthTracker,
    RotationSelector, SettingsService,
};
use campaign_infrastructure::{
    HttpRelayTransport, NotificationHub, Repositories, RepositoryFactory, SimulatedTransport,
    TcpHealthProbe,
};
use campaign_worker::{
    ExecutorRegistry, JobManager, JobRunner, PhoneGenerationExecutor, PhoneValidationExecutor,
    RetentionCleaner, SmsCampaignExecutor, StallDetector,
};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info, warn};

/// 关闭时等待运行中任务退出的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(20);
/// 关闭后等待 API 连接（包括事件流）断开的时间
const SERVER_DRAIN: Duration = Duration::from_secs(5);

/// 主应用程序
pub struct Application {
    config: AppConfig,
    hub: Arc<NotificationHub>,
    tracker: Arc<ResourceHealthTracker>,
    settings: Arc<SettingsService>,
    runner: Arc<JobRunner>,
    manager: Arc<JobManager>,
}

impl Application {
    /// 创建存储、资源跟踪和任务执行组件
    pub async fn new(config: AppConfig) -> Result<Self> {
        let repos = RepositoryFactory::create(&config.database)
            .await
            .context("初始化存储失败")?;
        Self::with_repositories(config, repos).await
    }

    pub async fn with_repositories(config: AppConfig, repos: Repositories) -> Result<Self> {
        info!("初始化应用程序");

        let hub = Arc::new(NotificationHub::new(config.notifications.channel_capacity));
        let probe = Arc::new(TcpHealthProbe::new(Duration::from_secs(
            config.health.probe_timeout_seconds,
        )));
        let tracker = Arc::new(ResourceHealthTracker::new(
            repos.resources.clone(),
            repos.usage_logs.clone(),
            probe,
            HealthTrackerConfig::from(&config.health),
        ));
        let selector = Arc::new(RotationSelector::new(tracker.clone(), repos.cursors.clone()));
        let coordinator = Arc::new(DeliveryCoordinator::new(
            selector,
            tracker.clone(),
            repos.usage_logs.clone(),
            create_transport(&config),
            config.delivery.clone(),
        ));
        let settings = Arc::new(SettingsService::new(repos.settings.clone(), tracker.clone()));

        let registry = Arc::new(ExecutorRegistry::new());
        registry.register(Arc::new(PhoneGenerationExecutor::new())).await;
        registry.register(Arc::new(PhoneValidationExecutor::new())).await;
        registry
            .register(Arc::new(SmsCampaignExecutor::new(coordinator, settings.clone())))
            .await;
        info!("已注册任务类型: {:?}", registry.categories().await);

        let runner = Arc::new(JobRunner::new(
            repos.jobs.clone(),
            registry,
            hub.clone(),
            config.runner.clone(),
        ));
        let manager = Arc::new(JobManager::new(runner.clone()));

        Ok(Self {
            config,
            hub,
            tracker,
            settings,
            runner,
            manager,
        })
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    /// 健康监控，探测间隔和失败阈值跟随所有者保存的轮换设置
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.tracker.clone(), &self.config.health)
            .with_settings(self.settings.clone())
    }

    /// 从 JSON 文件导入一份配置文档到指定所有者
    pub async fn import_file(&self, path: impl AsRef<Path>, owner: &str) -> Result<ImportReport> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文档失败: {}", path.display()))?;
        let document: ConfigurationDocument =
            serde_json::from_str(&content).context("解析配置文档失败")?;
        let report = self.settings.import(owner, document).await?;
        info!(
            "已为所有者 {} 导入配置: 新增 {}，更新 {}，未变 {}，跳过 {}",
            owner,
            report.created,
            report.updated,
            report.unchanged,
            report.skipped.len()
        );
        Ok(report)
    }

    /// 运行所有后台组件，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut handles = Vec::new();

        if self.config.health.monitor_enabled {
            let monitor = Arc::new(self.health_monitor());
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { monitor.run(rx).await }));
        }

        let stall = Arc::new(StallDetector::new(
            self.runner.clone(),
            &self.config.maintenance,
        ));
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move { stall.run(rx).await }));

        let cleaner = Arc::new(RetentionCleaner::new(
            self.manager.clone(),
            &self.config.maintenance,
        ));
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move { cleaner.run(rx).await }));

        let server = if self.config.api.enabled {
            Some(self.start_api_server(shutdown_rx.resubscribe()).await?)
        } else {
            info!("API服务器已禁用");
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("开始关闭应用组件");

        self.runner.shutdown(SHUTDOWN_GRACE).await;

        if let Some(server) = server {
            let abort = server.abort_handle();
            if tokio::time::timeout(SERVER_DRAIN, server).await.is_err() {
                warn!("API连接未在 {:?} 内断开，强制关闭", SERVER_DRAIN);
                abort.abort();
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        info!("所有组件已停止");
        Ok(())
    }

    async fn start_api_server(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let state = AppState {
            manager: self.manager.clone(),
            tracker: self.tracker.clone(),
            settings: self.settings.clone(),
            hub: self.hub.clone(),
            owners: Arc::new(OwnerResolver::new(&self.config.api.auth)),
            heartbeat: Duration::from_secs(self.config.notifications.heartbeat_seconds),
        };
        let app = create_app(state, &self.config.api);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定API地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器监听: {}", self.config.api.bind_address);

        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("API服务器运行失败: {}", e);
            }
        }))
    }
}

fn create_transport(config: &AppConfig) -> Arc<dyn OutboundTransport> {
    let delivery = &config.delivery;
    match delivery.transport {
        TransportKind::Simulated => {
            info!(
                "使用模拟投递通道，延迟 {}ms，失败率 {}",
                delivery.simulated_latency_ms, delivery.simulated_failure_rate
            );
            Arc::new(SimulatedTransport::new(
                Duration::from_millis(delivery.simulated_latency_ms),
                delivery.simulated_failure_rate,
            ))
        }
        TransportKind::Http => {
            info!("使用HTTP中继投递，路径 {}", delivery.relay_path);
            Arc::new(HttpRelayTransport::new(
                delivery.relay_path.clone(),
                Duration::from_secs(delivery.send_timeout_seconds),
            ))
        }
    }
}

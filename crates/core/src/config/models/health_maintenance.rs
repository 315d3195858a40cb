use serde::{Deserialize, Serialize};

/// 资源健康检查配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// 没有所有者设置可用时（例如定时探测）使用的失败阈值
    pub default_max_failures: u32,
    pub probe_timeout_seconds: u64,
    pub monitor_enabled: bool,
    /// 监控循环的唤醒间隔；每个角色仍按自己的检查间隔探测
    pub monitor_tick_seconds: u64,
    pub default_check_interval_seconds: u64,
    /// 计算近期成功率时使用的最近日志条数
    pub usage_window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_max_failures: 3,
            probe_timeout_seconds: 5,
            monitor_enabled: true,
            monitor_tick_seconds: 10,
            default_check_interval_seconds: 300,
            usage_window: 20,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_max_failures == 0 {
            return Err(anyhow::anyhow!("失败阈值必须大于0"));
        }

        if self.probe_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("探测超时时间必须大于0"));
        }

        if self.monitor_tick_seconds == 0 || self.default_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }

        if self.usage_window == 0 {
            return Err(anyhow::anyhow!("使用日志窗口必须大于0"));
        }

        Ok(())
    }
}

/// 停滞检测与过期清理
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub stall_window_seconds: u64,
    pub stall_scan_interval_seconds: u64,
    pub retention_days: u32,
    pub cleanup_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            stall_window_seconds: 600,
            stall_scan_interval_seconds: 60,
            retention_days: 30,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stall_window_seconds == 0 || self.stall_scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("停滞检测窗口和扫描间隔必须大于0"));
        }

        if self.retention_days == 0 {
            return Err(anyhow::anyhow!("保留天数必须大于0"));
        }

        if self.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("清理间隔必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// 每个所有者广播通道的缓冲容量
    pub channel_capacity: usize,
    pub heartbeat_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            heartbeat_seconds: 15,
        }
    }
}

impl NotificationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channel_capacity == 0 {
            return Err(anyhow::anyhow!("通道容量必须大于0"));
        }

        if self.heartbeat_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        Ok(())
    }
}

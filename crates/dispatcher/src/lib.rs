//! 资源轮换与投递协调
//!
//! 自底向上依次为：
//! - `health`: 资源健康跟踪（计数器、健康标记、性能分、恢复通知）
//! - `selector`: 按策略从资源池中选出一个资源
//! - `delay` / `rate_limit`: 投递间隔与目标号码限速
//! - `coordinator`: 单个投递单元的完整流程
//! - `monitor`: 定时健康探测循环
//! - `settings_service`: 轮换设置读写与配置导入导出

pub mod coordinator;
pub mod delay;
pub mod health;
pub mod monitor;
pub mod rate_limit;
pub mod selector;
pub mod settings_service;

#[cfg(test)]
pub(crate) mod test_utils;

pub use coordinator::{DeliveryCoordinator, DeliveryOutcome, DeliverySession};
pub use delay::DeliveryDelay;
pub use health::{HealthTrackerConfig, ResourceHealthTracker};
pub use monitor::{HealthMonitor, ProbeSchedule};
pub use rate_limit::DestinationRateLimiter;
pub use selector::RotationSelector;
pub use settings_service::{ImportReport, SettingsService};

//! 应用配置
//!
//! 配置按以下优先级合并（后者覆盖前者）：
//!
//! 1. 各配置段的 `Default` 实现
//! 2. TOML 配置文件（`--config` 指定，或 `config/campaign.toml`）
//! 3. `CAMPAIGN_` 前缀的环境变量，嵌套字段用 `__` 分隔
//!
//! 加载完成后整体执行 `validate()`，任何一段无效都会导致启动失败。

pub mod models;


pub use models::*;

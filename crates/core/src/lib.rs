//! 外呼任务执行与资源轮换的核心类型
//!
//! 包含错误分类、领域模型、仓储与外部端口的抽象接口，以及应用配置。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;

//! 任务执行
//!
//! 任务基座（`JobContext`）、执行器注册表、任务执行器与任务管理，
//! 以及停滞检测、过期清理两个后台循环和内置的号码/短信执行器。

pub mod cleanup;
pub mod context;
pub mod executor;
pub mod executors;
pub mod manager;
pub mod runner;
pub mod stall;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cleanup::RetentionCleaner;
pub use context::{EventSequence, JobContext};
pub use executor::{ExecutorRegistry, JobExecutor};
pub use executors::{PhoneGenerationExecutor, PhoneValidationExecutor, SmsCampaignExecutor};
pub use manager::JobManager;
pub use runner::JobRunner;
pub use stall::StallDetector;

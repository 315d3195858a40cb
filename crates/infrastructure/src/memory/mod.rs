//! 内存存储实现
//!
//! 用于 `database.url = "memory"` 的单进程运行以及各层的测试。
//! 每个仓储内部用一把锁保护整张表，计数器在同一个临界区内原地修改。

pub mod cursor_store;
pub mod job_repository;
pub mod resource_repository;
pub mod settings_repository;
pub mod usage_log_repository;

pub use cursor_store::InMemoryCursorStore;
pub use job_repository::InMemoryJobRepository;
pub use resource_repository::InMemoryResourceRepository;
pub use settings_repository::InMemorySettingsRepository;
pub use usage_log_repository::InMemoryUsageLogRepository;

//! 数据仓储层接口定义
//!
//! 此模块定义了持久化层的核心抽象接口：
//! - 任务记录仓储 (`JobRepository`)
//! - 资源仓储 (`ResourceRepository`)
//! - 资源使用日志 (`UsageLogRepository`)
//! - 轮换设置 (`SettingsRepository`)
//! - 轮询游标 (`CursorStore`)
//!
//! ## 并发约定
//!
//! 资源计数器的修改必须由实现方以原子方式完成（内存实现在同一把写锁内
//! 原地修改，SQLite 实现使用单条 `UPDATE ... SET x = x + 1` 语句），
//! 调用方永远不会先读出缓存副本再整体写回。
//!
//! 任务记录的终态不可变性同样由仓储层保证：对已处于终态的记录执行
//! `update` 会返回 `InvalidState`，唯一的例外是 `FAILURE → RETRY`；
//! RETRY 也只能写在 FAILURE 之上，两个并发的重试只有一个能成功。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    models::{
        JobFilter, JobRecord, Pagination, ResourceRecord, ResourceRole, RotationSettings, UsageLog,
    },
    CampaignResult,
};

/// 任务记录仓储
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 保存新提交的任务记录
    async fn create(&self, job: &JobRecord) -> CampaignResult<()>;

    async fn get(&self, id: Uuid) -> CampaignResult<Option<JobRecord>>;

    /// 条件更新
    ///
    /// 存储中的记录若已是终态则拒绝写入（返回 `InvalidState`），
    /// 只有 `FAILURE → RETRY` 可以覆盖一条 FAILURE 记录，
    /// 而 RETRY 也只接受存储中为 FAILURE 的记录。
    async fn update(&self, job: &JobRecord) -> CampaignResult<()>;

    /// 分页查询，按创建时间倒序；返回当前页和过滤后的总数
    async fn list(
        &self,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> CampaignResult<(Vec<JobRecord>, u64)>;

    /// 所有非终态任务，按创建时间倒序
    async fn list_active(&self, owner: Option<&str>) -> CampaignResult<Vec<JobRecord>>;

    /// 删除 `completed_at` 早于 `cutoff` 的终态任务，返回删除条数
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> CampaignResult<u64>;
}

/// 代理/中继资源仓储
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// 新增资源，返回带有存储层生成 id 的记录
    async fn create(&self, resource: &ResourceRecord) -> CampaignResult<ResourceRecord>;

    async fn get(&self, id: i64) -> CampaignResult<Option<ResourceRecord>>;

    /// 按 id 升序列出资源；`role` 为空时返回全部
    async fn list(&self, role: Option<ResourceRole>) -> CampaignResult<Vec<ResourceRecord>>;

    /// 启用且健康的资源，按 id 升序
    async fn list_eligible(&self, role: ResourceRole) -> CampaignResult<Vec<ResourceRecord>>;

    /// 查找同一角色下地址和端口相同的资源（导入去重用）
    async fn find_by_endpoint(&self, resource: &ResourceRecord)
        -> CampaignResult<Option<ResourceRecord>>;

    /// 记录一次成功使用：计数器原子递增，清零连续失败，标记为健康，
    /// 并更新滚动平均响应时间
    async fn record_success(
        &self,
        id: i64,
        response_time_ms: f64,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord>;

    /// 记录一次失败使用：连续失败数达到 `max_failures` 时标记为不健康，
    /// 不修改 `is_active`
    async fn record_failure(
        &self,
        id: i64,
        max_failures: u32,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord>;

    /// 记录一次健康探测结果，不计入请求计数
    async fn record_health_check(
        &self,
        id: i64,
        passed: bool,
        max_failures: u32,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord>;

    /// 管理员启用/停用资源
    async fn set_active(&self, id: i64, active: bool) -> CampaignResult<ResourceRecord>;
}

/// 资源使用日志仓储（只追加）
#[async_trait]
pub trait UsageLogRepository: Send + Sync {
    async fn append(&self, log: &UsageLog) -> CampaignResult<()>;

    /// 某资源最近的 `limit` 条日志，最新的在前
    async fn recent_for_resource(&self, resource_id: i64, limit: usize)
        -> CampaignResult<Vec<UsageLog>>;

    async fn list_for_job(&self, job_id: Uuid) -> CampaignResult<Vec<UsageLog>>;
}

/// 每个所有者的轮换设置
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, owner: &str) -> CampaignResult<Option<RotationSettings>>;

    async fn save(&self, settings: &RotationSettings) -> CampaignResult<()>;

    /// 所有保存过的设置，按所有者排序
    async fn list(&self) -> CampaignResult<Vec<RotationSettings>>;
}

/// 轮询游标存储
///
/// `next_position` 原子地返回当前位置并加一，保证并发调用者拿到的值互不相同。
/// 游标跨进程重启保留（SQLite 实现），从而在重启后仍然均匀分布。
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn next_position(&self, pool_key: &str) -> CampaignResult<u64>;
}

use async_trait::async_trait;
use campaign_core::{models::RotationSettings, traits::SettingsRepository, CampaignResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::parse_column;

pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_settings(row: &sqlx::sqlite::SqliteRow) -> CampaignResult<RotationSettings> {
        let proxy_strategy: String = row.try_get("proxy_strategy")?;
        let relay_strategy: String = row.try_get("relay_strategy")?;
        Ok(RotationSettings {
            owner: row.try_get("owner")?,
            proxy_enabled: row.try_get("proxy_enabled")?,
            proxy_strategy: parse_column(&proxy_strategy)?,
            proxy_health_check_interval: row.try_get::<i64, _>("proxy_health_check_interval")? as u64,
            proxy_max_failures: row.try_get::<i64, _>("proxy_max_failures")? as u32,
            relay_enabled: row.try_get("relay_enabled")?,
            relay_strategy: parse_column(&relay_strategy)?,
            relay_health_check_interval: row.try_get::<i64, _>("relay_health_check_interval")? as u64,
            relay_max_failures: row.try_get::<i64, _>("relay_max_failures")? as u32,
            delay_enabled: row.try_get("delay_enabled")?,
            delay_min: row.try_get("delay_min")?,
            delay_max: row.try_get("delay_max")?,
            random_seed: row.try_get::<Option<i64>, _>("random_seed")?.map(|s| s as u64),
            destination_rate_limit: row
                .try_get::<Option<i64>, _>("destination_rate_limit")?
                .map(|l| l as u32),
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn get(&self, owner: &str) -> CampaignResult<Option<RotationSettings>> {
        let row = sqlx::query("SELECT * FROM rotation_settings WHERE owner = $1")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_settings).transpose()
    }

    #[instrument(skip(self, settings), fields(owner = %settings.owner))]
    async fn save(&self, settings: &RotationSettings) -> CampaignResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rotation_settings (owner, proxy_enabled, proxy_strategy,
                proxy_health_check_interval, proxy_max_failures, relay_enabled, relay_strategy,
                relay_health_check_interval, relay_max_failures, delay_enabled, delay_min,
                delay_max, random_seed, destination_rate_limit, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT(owner) DO UPDATE SET
                proxy_enabled = excluded.proxy_enabled,
                proxy_strategy = excluded.proxy_strategy,
                proxy_health_check_interval = excluded.proxy_health_check_interval,
                proxy_max_failures = excluded.proxy_max_failures,
                relay_enabled = excluded.relay_enabled,
                relay_strategy = excluded.relay_strategy,
                relay_health_check_interval = excluded.relay_health_check_interval,
                relay_max_failures = excluded.relay_max_failures,
                delay_enabled = excluded.delay_enabled,
                delay_min = excluded.delay_min,
                delay_max = excluded.delay_max,
                random_seed = excluded.random_seed,
                destination_rate_limit = excluded.destination_rate_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&settings.owner)
        .bind(settings.proxy_enabled)
        .bind(settings.proxy_strategy.as_str())
        .bind(settings.proxy_health_check_interval as i64)
        .bind(settings.proxy_max_failures as i64)
        .bind(settings.relay_enabled)
        .bind(settings.relay_strategy.as_str())
        .bind(settings.relay_health_check_interval as i64)
        .bind(settings.relay_max_failures as i64)
        .bind(settings.delay_enabled)
        .bind(settings.delay_min)
        .bind(settings.delay_max)
        .bind(settings.random_seed.map(|s| s as i64))
        .bind(settings.destination_rate_limit.map(|l| l as i64))
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("保存轮换设置成功: {}", settings.owner);
        Ok(())
    }

    async fn list(&self) -> CampaignResult<Vec<RotationSettings>> {
        let rows = sqlx::query("SELECT * FROM rotation_settings ORDER BY owner")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_settings).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_pool;
    use campaign_core::models::RotationStrategy;

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let repo = SqliteSettingsRepository::new(test_pool().await);
        assert!(repo.get("alice").await.unwrap().is_none());

        let mut settings = RotationSettings::defaults_for("alice");
        repo.save(&settings).await.unwrap();

        settings.relay_strategy = RotationStrategy::BestPerformance;
        settings.random_seed = Some(42);
        settings.destination_rate_limit = Some(10);
        repo.save(&settings).await.unwrap();

        let stored = repo.get("alice").await.unwrap().unwrap();
        assert_eq!(stored.relay_strategy, RotationStrategy::BestPerformance);
        assert_eq!(stored.random_seed, Some(42));
        assert_eq!(stored.destination_rate_limit, Some(10));
        assert_eq!(stored.proxy_max_failures, 3);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_owner() {
        let repo = SqliteSettingsRepository::new(test_pool().await);
        for owner in ["carol", "alice", "bob"] {
            repo.save(&RotationSettings::defaults_for(owner)).await.unwrap();
        }
        let owners: Vec<String> = repo.list().await.unwrap().into_iter().map(|s| s.owner).collect();
        assert_eq!(owners, vec!["alice", "bob", "carol"]);
    }
}

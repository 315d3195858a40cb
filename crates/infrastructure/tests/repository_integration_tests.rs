//! 两种存储后端必须表现一致

use campaign_core::{
    config::models::DatabaseConfig,
    models::{
        categories, JobDefinition, JobRecord, JobStatus, ProgressUpdate, ResourceProtocol,
        ResourceRecord, ResourceRole, UsageLog,
    },
    CampaignError,
};
use campaign_infrastructure::{Repositories, RepositoryFactory};
use chrono::Utc;
use serde_json::json;

async fn backends() -> Vec<(&'static str, Repositories)> {
    let sqlite = RepositoryFactory::create(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    })
    .await
    .unwrap();
    vec![("memory", Repositories::in_memory()), ("sqlite", sqlite)]
}

#[tokio::test]
async fn test_job_lifecycle_contract() {
    for (name, repos) in backends().await {
        let mut job = JobRecord::new(
            JobDefinition::new(categories::PHONE_GENERATION, "alice", json!({"quantity": 3})),
            2,
        );
        repos.jobs.create(&job).await.unwrap();

        job.transition(JobStatus::Started).unwrap();
        repos.jobs.update(&job).await.unwrap();
        job.apply_progress(&ProgressUpdate::from_counts(1, 3, "generating"))
            .unwrap();
        repos.jobs.update(&job).await.unwrap();
        job.transition(JobStatus::Revoked).unwrap();
        repos.jobs.update(&job).await.unwrap();

        let mut late = job.clone();
        late.status = JobStatus::Success;
        let err = repos.jobs.update(&late).await.unwrap_err();
        assert!(
            matches!(err, CampaignError::InvalidState { .. }),
            "{name}: terminal record was overwritten"
        );

        let stored = repos.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Revoked, "{name}");
        assert_eq!(stored.processed_count, 1, "{name}");
        assert!(repos.jobs.list_active(Some("alice")).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_retry_write_only_wins_once() {
    for (name, repos) in backends().await {
        let mut job = JobRecord::new(
            JobDefinition::new(categories::SMS_CAMPAIGN, "alice", json!({})),
            3,
        );
        repos.jobs.create(&job).await.unwrap();
        job.transition(JobStatus::Started).unwrap();
        repos.jobs.update(&job).await.unwrap();
        job.error_retryable = true;
        job.transition(JobStatus::Failure).unwrap();
        repos.jobs.update(&job).await.unwrap();

        // 两个调用方都读到了 FAILURE
        let mut first = repos.jobs.get(job.id).await.unwrap().unwrap();
        let mut second = first.clone();
        first.transition(JobStatus::Retry).unwrap();
        second.transition(JobStatus::Retry).unwrap();

        repos.jobs.update(&first).await.unwrap();
        let err = repos.jobs.update(&second).await.unwrap_err();
        assert!(
            matches!(
                err,
                CampaignError::InvalidState {
                    status: JobStatus::Retry,
                    ..
                }
            ),
            "{name}: second retry was accepted"
        );

        // 新的尝试照常推进
        first.transition(JobStatus::Started).unwrap();
        repos.jobs.update(&first).await.unwrap();
        let stored = repos.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Started, "{name}");
        assert_eq!(stored.attempt, 2, "{name}");
    }
}

#[tokio::test]
async fn test_resource_health_contract() {
    for (name, repos) in backends().await {
        let r = repos
            .resources
            .create(&ResourceRecord::new(
                ResourceRole::Proxy,
                "a",
                "10.0.0.1",
                8080,
                ResourceProtocol::Socks5,
            ))
            .await
            .unwrap();

        for _ in 0..3 {
            repos.resources.record_failure(r.id, 3, Utc::now()).await.unwrap();
        }
        let stored = repos.resources.get(r.id).await.unwrap().unwrap();
        assert!(!stored.is_healthy, "{name}");
        assert_eq!(stored.consecutive_failure_count, 3, "{name}");

        let recovered = repos.resources.record_success(r.id, 80.0, Utc::now()).await.unwrap();
        assert!(recovered.is_healthy, "{name}");
        assert_eq!(recovered.total_requests, 4, "{name}");

        repos
            .usage_logs
            .append(&UsageLog::success(uuid::Uuid::new_v4(), r.id, ResourceRole::Proxy, 80.0))
            .await
            .unwrap();
        assert_eq!(
            repos.usage_logs.recent_for_resource(r.id, 5).await.unwrap().len(),
            1,
            "{name}"
        );
    }
}

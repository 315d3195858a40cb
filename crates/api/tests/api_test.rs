use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use campaign_api::{create_app, AppState, OwnerResolver};
use campaign_core::{
    config::models::{ApiConfig, AuthConfig, RunnerConfig},
    models::{ResourceProtocol, ResourceRecord, ResourceRole},
};
use campaign_dispatcher::{HealthTrackerConfig, ResourceHealthTracker, SettingsService};
use campaign_infrastructure::{NotificationHub, Repositories, TcpHealthProbe};
use campaign_worker::{
    ExecutorRegistry, JobManager, JobRunner, PhoneGenerationExecutor, PhoneValidationExecutor,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    repos: Repositories,
}

async fn test_app(auth: AuthConfig) -> TestApp {
    let repos = Repositories::in_memory();
    let hub = Arc::new(NotificationHub::new(64));
    let tracker = Arc::new(ResourceHealthTracker::new(
        repos.resources.clone(),
        repos.usage_logs.clone(),
        Arc::new(TcpHealthProbe::new(Duration::from_millis(200))),
        HealthTrackerConfig::default(),
    ));
    let settings = Arc::new(SettingsService::new(repos.settings.clone(), tracker.clone()));

    let registry = Arc::new(ExecutorRegistry::new());
    registry.register(Arc::new(PhoneGenerationExecutor::new())).await;
    registry.register(Arc::new(PhoneValidationExecutor::new())).await;
    let runner = Arc::new(JobRunner::new(
        repos.jobs.clone(),
        registry,
        hub.clone(),
        RunnerConfig::default(),
    ));

    let config = ApiConfig {
        auth: auth.clone(),
        ..ApiConfig::default()
    };
    let state = AppState {
        manager: Arc::new(JobManager::new(runner)),
        tracker,
        settings,
        hub,
        owners: Arc::new(OwnerResolver::new(&auth)),
        heartbeat: Duration::from_secs(30),
    };

    TestApp {
        router: create_app(state, &config),
        repos,
    }
}

async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    owner: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("X-Owner", owner);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn wait_for_status(app: &TestApp, owner: &str, id: &str, status: &str) -> Value {
    for _ in 0..500 {
        let (code, body) = send(app, "GET", &format!("/api/jobs/{id}"), Some(owner), None).await;
        assert_eq!(code, StatusCode::OK);
        if body["data"]["status"] == status {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {status}");
}

#[tokio::test]
async fn test_health_endpoint_needs_no_owner() {
    let app = test_app(AuthConfig::default()).await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_owner_is_unauthorized() {
    let app = test_app(AuthConfig::default()).await;
    let (status, body) = send(&app, "GET", "/api/jobs", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["type"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_submit_generation_job_and_poll_to_success() {
    let app = test_app(AuthConfig::default()).await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some("alice"),
        Some(json!({
            "category": "phone_generation",
            "name": "batch-1",
            "payload": {"quantity": 25, "seed": 7}
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "batch-1");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let job = wait_for_status(&app, "alice", &id, "SUCCESS").await;
    assert_eq!(job["processed"], 25);
    assert_eq!(job["result"]["generated"], 25);

    // 其他所有者看不到该任务
    let (status, body) = send(&app, "GET", &format!("/api/jobs/{id}"), Some("bob"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "JOB_NOT_FOUND");
}

#[tokio::test]
async fn test_submit_rejects_bad_requests() {
    let app = test_app(AuthConfig::default()).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some("alice"),
        Some(json!({"category": "fax_blast", "payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "UNKNOWN_CATEGORY");

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some("alice"),
        Some(json!({"category": "phone_generation", "payload": {"quantity": 0}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some("alice"),
        Some(json!({"payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");

    let (_, body) = send(&app, "GET", "/api/jobs", Some("alice"), None).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_list_jobs_filters_and_paginates() {
    let app = test_app(AuthConfig::default()).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let (_, body) = send(
            &app,
            "POST",
            "/api/jobs",
            Some("alice"),
            Some(json!({
                "category": "phone_validation",
                "payload": {"numbers": ["+14155550100", "12"]}
            })),
        )
        .await;
        ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }
    send(
        &app,
        "POST",
        "/api/jobs",
        Some("bob"),
        Some(json!({"category": "phone_generation", "payload": {"quantity": 5}})),
    )
    .await;
    for id in &ids {
        wait_for_status(&app, "alice", id, "SUCCESS").await;
    }

    let (status, body) = send(
        &app,
        "GET",
        "/api/jobs?status=success&category=phone_validation&page=1&page_size=2",
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["total_pages"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert!(body["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .all(|job| job["owner"] == "alice"));

    let (status, body) = send(&app, "GET", "/api/jobs?status=sleeping", Some("alice"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_cancel_finished_job_conflicts() {
    let app = test_app(AuthConfig::default()).await;
    let (_, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some("alice"),
        Some(json!({"category": "phone_generation", "payload": {"quantity": 3}})),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    wait_for_status(&app, "alice", &id, "SUCCESS").await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/jobs/{id}/cancel"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "INVALID_STATE");
    assert_eq!(body["error"]["job_status"], "SUCCESS");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/jobs/{id}/retry"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "GET", "/api/jobs/not-a-uuid", Some("alice"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_settings_round_trip_per_owner() {
    let app = test_app(AuthConfig::default()).await;

    let (status, body) = send(&app, "GET", "/api/settings", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["owner"], "alice");

    let mut settings = body["data"].clone();
    settings["delay_enabled"] = json!(true);
    settings["delay_min"] = json!(0.5);
    settings["delay_max"] = json!(1.5);
    let (status, body) = send(&app, "PUT", "/api/settings", Some("alice"), Some(settings.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delay_enabled"], true);

    let (_, body) = send(&app, "GET", "/api/settings", Some("bob"), None).await;
    assert_eq!(body["data"]["owner"], "bob");
    assert_eq!(body["data"]["delay_enabled"], false);

    settings["delay_min"] = json!(3.0);
    let (status, body) = send(&app, "PUT", "/api/settings", Some("alice"), Some(settings)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "VALIDATION_ERROR");

    let (status, body) = send(&app, "GET", "/api/settings/export", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["settings"]["delay_max"], 1.5);
}

#[tokio::test]
async fn test_resource_endpoints() {
    let app = test_app(AuthConfig::default()).await;
    // 端口 1 上没有监听者，探测必然失败
    let relay = app
        .repos
        .resources
        .create(&ResourceRecord::new(
            ResourceRole::Relay,
            "relay-a",
            "127.0.0.1",
            1,
            ResourceProtocol::Http,
        ))
        .await
        .unwrap();

    let (status, body) = send(&app, "GET", "/api/resources/health?role=relay", Some("ops"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["name"], "relay-a");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/resources/{}/health-check", relay.id),
        Some("ops"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["consecutive_failure_count"], 1);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/resources/{}/deactivate", relay.id),
        Some("ops"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_active"], false);

    let (status, body) = send(&app, "POST", "/api/resources/999/activate", Some("ops"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn test_bearer_tokens_map_to_owner() {
    let auth = AuthConfig {
        enabled: true,
        owner_tokens: HashMap::from([("secret-a".to_string(), "alice".to_string())]),
    };
    let app = test_app(auth).await;

    // 启用认证后 X-Owner 不再生效
    let (status, _) = send(&app, "GET", "/api/settings", Some("alice"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/settings")
        .header("Authorization", "Bearer secret-a")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["owner"], "alice");
}

#[tokio::test]
async fn test_event_stream_starts_with_active_snapshot() {
    let app = test_app(AuthConfig::default()).await;
    let request = Request::builder()
        .uri("/api/events")
        .header("X-Owner", "alice")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut stream = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(first.to_vec()).unwrap();
    assert!(frame.contains("event: active_jobs_snapshot"));
    assert!(frame.contains("\"owner\":\"alice\""));
}

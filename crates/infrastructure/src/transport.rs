//! 外发通道实现
//!
//! - `HttpRelayTransport`: 经选中的代理把消息 POST 到选中的 HTTP 中继
//! - `SimulatedTransport`: 本地运行用，按配置的延迟和失败率模拟发送

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use campaign_core::{
    models::{
        DeliveryReceipt, DeliveryRoute, DeliveryUnit, FailureBlame, ResourceProtocol,
        ResourceRecord, SendFailure,
    },
    traits::OutboundTransport,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Serialize)]
struct RelayRequest<'a> {
    job_id: String,
    sequence: u64,
    destination: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_id: Option<&'a str>,
}

#[derive(Deserialize, Default)]
struct RelayResponse {
    #[serde(default)]
    message_id: Option<String>,
}

pub struct HttpRelayTransport {
    relay_path: String,
    timeout: Duration,
    /// 每个代理一个客户端；key 为代理 id，直连使用 0
    clients: Mutex<HashMap<i64, reqwest::Client>>,
}

impl HttpRelayTransport {
    pub fn new(relay_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            relay_path: relay_path.into(),
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&ResourceRecord>) -> Result<reqwest::Client, SendFailure> {
        let key = proxy.map_or(0, |p| p.id);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(proxy) = proxy {
            let mut reqwest_proxy = reqwest::Proxy::all(proxy.endpoint()).map_err(|e| {
                SendFailure::transient(FailureBlame::Proxy, format!("代理地址无效: {e}"))
            })?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                reqwest_proxy = reqwest_proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(reqwest_proxy);
        }
        let client = builder.build().map_err(|e| {
            SendFailure::transient(FailureBlame::Proxy, format!("创建HTTP客户端失败: {e}"))
        })?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn relay_url(&self, relay: &ResourceRecord) -> String {
        let scheme = match relay.protocol {
            ResourceProtocol::Https => "https",
            _ => "http",
        };
        format!("{scheme}://{}:{}{}", relay.address, relay.port, self.relay_path)
    }

    fn classify_error(err: &reqwest::Error, via_proxy: bool) -> SendFailure {
        if err.is_timeout() {
            SendFailure::transient(FailureBlame::Route, format!("发送超时: {err}"))
        } else if err.is_connect() {
            let blame = if via_proxy {
                FailureBlame::Proxy
            } else {
                FailureBlame::Relay
            };
            SendFailure::transient(blame, format!("连接失败: {err}"))
        } else {
            SendFailure::transient(FailureBlame::Route, err.to_string())
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> SendFailure {
        let message = format!("中继返回 {status}: {body}");
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                SendFailure::permanent(FailureBlame::Destination, message)
            }
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                SendFailure::transient(FailureBlame::Proxy, message)
            }
            s if s == StatusCode::UNAUTHORIZED
                || s == StatusCode::FORBIDDEN
                || s == StatusCode::TOO_MANY_REQUESTS
                || s.is_server_error() =>
            {
                SendFailure::transient(FailureBlame::Relay, message)
            }
            _ => SendFailure::transient(FailureBlame::Route, message),
        }
    }
}

#[async_trait]
impl OutboundTransport for HttpRelayTransport {
    async fn send(
        &self,
        unit: &DeliveryUnit,
        route: &DeliveryRoute,
    ) -> Result<DeliveryReceipt, SendFailure> {
        let Some(relay) = route.relay.as_ref() else {
            // 不涉及任何资源，直接结束该条消息
            return Err(SendFailure::permanent(
                FailureBlame::Destination,
                "HTTP 中继通道需要启用中继资源",
            ));
        };
        let client = self.client_for(route.proxy.as_ref())?;

        let body = RelayRequest {
            job_id: unit.job_id.to_string(),
            sequence: unit.sequence,
            destination: &unit.destination,
            message: &unit.message,
            sender_id: unit.sender_id.as_deref(),
        };
        let mut request = client.post(self.relay_url(relay)).json(&body);
        if let (Some(user), Some(pass)) = (&relay.username, &relay.password) {
            request = request.basic_auth(user, Some(pass));
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| Self::classify_error(&e, route.proxy.is_some()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("中继 {} 拒绝发送: {}", relay.endpoint(), status);
            return Err(Self::classify_status(status, &body));
        }

        let parsed: RelayResponse = response.json().await.unwrap_or_default();
        let elapsed = started.elapsed();
        debug!("消息 {}#{} 已发送 ({:?})", unit.job_id, unit.sequence, elapsed);
        Ok(DeliveryReceipt {
            provider_message_id: parsed.message_id,
            response_time: elapsed.as_secs_f64() * 1000.0,
        })
    }

    fn name(&self) -> &str {
        "http_relay"
    }
}

/// 本地模拟通道
pub struct SimulatedTransport {
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedTransport {
    pub fn new(latency: Duration, failure_rate: f64) -> Self {
        Self::with_seed(latency, failure_rate, rand::random())
    }

    pub fn with_seed(latency: Duration, failure_rate: f64, seed: u64) -> Self {
        Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn roll_failure(&self) -> bool {
        if self.failure_rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random::<f64>() < self.failure_rate
    }
}

#[async_trait]
impl OutboundTransport for SimulatedTransport {
    async fn send(
        &self,
        unit: &DeliveryUnit,
        route: &DeliveryRoute,
    ) -> Result<DeliveryReceipt, SendFailure> {
        let valid_destination = unit.destination.starts_with('+')
            && unit.destination.len() > 1
            && unit.destination[1..].chars().all(|c| c.is_ascii_digit());
        if !valid_destination {
            return Err(SendFailure::permanent(
                FailureBlame::Destination,
                format!("无效的目标号码: {}", unit.destination),
            ));
        }

        tokio::time::sleep(self.latency).await;
        if self.roll_failure() {
            let blame = if route.relay.is_some() {
                FailureBlame::Relay
            } else if route.proxy.is_some() {
                FailureBlame::Proxy
            } else {
                FailureBlame::Route
            };
            return Err(SendFailure::transient(blame, "模拟发送失败"));
        }

        Ok(DeliveryReceipt {
            provider_message_id: Some(format!("sim-{}-{}", unit.job_id.simple(), unit.sequence)),
            response_time: self.latency.as_secs_f64() * 1000.0,
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

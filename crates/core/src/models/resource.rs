use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CampaignError;

/// 资源在轮换池中承担的角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRole {
    Proxy,
    Relay,
}

impl ResourceRole {
    pub const ALL: [ResourceRole; 2] = [ResourceRole::Proxy, ResourceRole::Relay];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceRole::Proxy => "proxy",
            ResourceRole::Relay => "relay",
        }
    }
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceRole {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proxy" => Ok(ResourceRole::Proxy),
            "relay" => Ok(ResourceRole::Relay),
            _ => Err(CampaignError::validation(format!("无效的资源角色: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceProtocol {
    Http,
    Https,
    Socks5,
    Smtp,
    Smpp,
}

impl ResourceProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceProtocol::Http => "http",
            ResourceProtocol::Https => "https",
            ResourceProtocol::Socks5 => "socks5",
            ResourceProtocol::Smtp => "smtp",
            ResourceProtocol::Smpp => "smpp",
        }
    }
}

impl fmt::Display for ResourceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceProtocol {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ResourceProtocol::Http),
            "https" => Ok(ResourceProtocol::Https),
            "socks5" => Ok(ResourceProtocol::Socks5),
            "smtp" => Ok(ResourceProtocol::Smtp),
            "smpp" => Ok(ResourceProtocol::Smpp),
            _ => Err(CampaignError::validation(format!("不支持的协议: {s}"))),
        }
    }
}

/// 代理或中继端点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: i64,
    pub role: ResourceRole,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: ResourceProtocol,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub is_active: bool,
    pub is_healthy: bool,
    pub consecutive_failure_count: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// 毫秒
    pub average_response_time: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(
        role: ResourceRole,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        protocol: ResourceProtocol,
    ) -> Self {
        Self {
            id: 0, // 将由存储层生成
            role,
            name: name.into(),
            address: address.into(),
            port,
            protocol,
            username: None,
            password: None,
            is_active: true,
            is_healthy: true,
            consecutive_failure_count: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_used_at: None,
            last_health_check_at: None,
            average_response_time: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// 参与选择的资源必须同时处于启用和健康状态
    pub fn is_eligible(&self) -> bool {
        self.is_active && self.is_healthy
    }

    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.address, self.port)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// 同一角色下地址和端口相同即视为同一资源
    pub fn same_endpoint(&self, other: &ResourceRecord) -> bool {
        self.role == other.role && self.address == other.address && self.port == other.port
    }
}

/// 资源健康快照，附带计算出的性能分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHealthSnapshot {
    #[serde(flatten)]
    pub resource: ResourceRecord,
    pub performance_score: f64,
}

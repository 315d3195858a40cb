use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ResourceRecord, ResourceRole};

/// 一个待投递的外呼单元（一条短信）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryUnit {
    pub job_id: Uuid,
    pub sequence: u64,
    pub destination: String,
    pub message: String,
    pub sender_id: Option<String>,
}

/// 一次发送所使用的资源组合
#[derive(Debug, Clone, Default)]
pub struct DeliveryRoute {
    pub proxy: Option<ResourceRecord>,
    pub relay: Option<ResourceRecord>,
}

impl DeliveryRoute {
    pub fn resource(&self, role: ResourceRole) -> Option<&ResourceRecord> {
        match role {
            ResourceRole::Proxy => self.proxy.as_ref(),
            ResourceRole::Relay => self.relay.as_ref(),
        }
    }

    pub fn used(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.proxy.iter().chain(self.relay.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
    /// 毫秒
    pub response_time: f64,
}

/// 发送失败归因于哪一方
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureBlame {
    Proxy,
    Relay,
    /// 整条链路（无法区分代理和中继）
    Route,
    /// 目标号码本身的问题，与资源无关
    Destination,
}

impl FailureBlame {
    /// 该角色的资源是否需要记一次失败
    pub fn blames(&self, role: ResourceRole) -> bool {
        match self {
            FailureBlame::Proxy => role == ResourceRole::Proxy,
            FailureBlame::Relay => role == ResourceRole::Relay,
            FailureBlame::Route => true,
            FailureBlame::Destination => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendFailure {
    pub blame: FailureBlame,
    pub retryable: bool,
    pub message: String,
}

impl SendFailure {
    pub fn transient(blame: FailureBlame, message: impl Into<String>) -> Self {
        Self {
            blame,
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(blame: FailureBlame, message: impl Into<String>) -> Self {
        Self {
            blame,
            retryable: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.blame, self.message)
    }
}

impl std::error::Error for SendFailure {}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A game server published through an SRV record.
/// This is the canonical data model used by the manager daemon and its API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Generated once at creation, never changes
    pub id: Uuid,

    /// Display name, e.g. "Survival"
    pub name: String,

    /// Public DNS name players connect to, e.g. "mc1.example.com"
    pub dns_record: String,

    /// Backend host the SRV record points at
    pub target_host: String,

    /// Backend port
    pub target_port: u16,

    /// Address the status poller connects to when it differs from the
    /// published host, e.g. a LAN IP behind a public hostname
    pub poll_host: Option<String>,

    /// DNS provider record id, used to correlate imports
    pub external_key: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    /// Host to poll for status: the poll host if set, otherwise the SRV target
    pub fn poll_address(&self) -> &str {
        self.poll_host.as_deref().unwrap_or(&self.target_host)
    }
}

/// Target fields as submitted by a client, before validation.
///
/// The port is wider than `u16` so out-of-range values reach validation
/// instead of failing deserialization with an opaque message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInput {
    pub name: String,
    pub dns_record: String,
    pub target_host: String,
    pub target_port: i64,
    #[serde(default)]
    pub poll_host: Option<String>,
}

/// Validated target fields, ready for the store and the DNS provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFields {
    pub name: String,
    pub dns_record: String,
    pub target_host: String,
    pub target_port: u16,
    pub poll_host: Option<String>,
}

/// One immutable status observation of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub id: i64,
    pub target_id: Uuid,
    pub online: bool,
    pub player_count: u32,
    pub max_players: u32,
    pub motd: Option<String>,
    pub version: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Outcome of a single liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ProbeOutcome {
    #[serde(rename_all = "camelCase")]
    Online {
        player_count: u32,
        max_players: u32,
        motd: Option<String>,
        version: Option<String>,
    },
    Offline,
}

impl ProbeOutcome {
    pub fn is_online(&self) -> bool {
        matches!(self, ProbeOutcome::Online { .. })
    }
}

/// An SRV record as listed by the DNS provider. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrvRecord {
    /// Provider-assigned record id
    pub external_key: String,

    /// Public domain, without the "_minecraft._tcp." prefix
    pub domain: String,

    pub target_host: String,
    pub target_port: u16,
}

/// Latest known status of a target, as read by metrics consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub target: Target,
    pub latest: Option<StatusSnapshot>,
}

/// Generic JSON envelope returned by every API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()) }
    }
}

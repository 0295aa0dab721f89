use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Platform chat identifier. 64-bit signed because Telegram-style chat IDs
/// for supergroups exceed the 53-bit float-safe range — never widen to f64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Platform user identifier, same width rationale as [`ChatId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TelegramUserId(pub i64);

impl fmt::Display for TelegramUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TelegramUserId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// UUIDv7 request identity — time-sortable for log correlation and LIFO scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UUIDv7 alert identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque accountant-user identity, assigned out-of-band by admin tooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountantUserId(pub Uuid);

impl fmt::Display for AccountantUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    #[default]
    Group,
    Supergroup,
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatKind::Private => write!(f, "private"),
            ChatKind::Group => write!(f, "group"),
            ChatKind::Supergroup => write!(f, "supergroup"),
        }
    }
}

impl std::str::FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatKind::Private),
            "group" => Ok(ChatKind::Group),
            "supergroup" => Ok(ChatKind::Supergroup),
            other => Err(format!("unknown chat kind: {}", other)),
        }
    }
}

/// Client tier drives the SLA threshold default and the escalation sort key.
/// Ordering (`premium < vip < standard < basic`) is deliberate: `Ord` derives
/// top-to-bottom declaration order, so sorting ascending puts the highest
/// tiers first, matching §4.6's "higher-tier requests first" secondary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientTier {
    Premium,
    Vip,
    Standard,
    Basic,
}

impl ClientTier {
    /// Fixed tier-default SLA threshold in minutes, per the configuration
    /// resolver's second merge layer.
    pub fn default_threshold_minutes(self) -> u32 {
        match self {
            ClientTier::Basic => 120,
            ClientTier::Standard => 60,
            ClientTier::Vip => 30,
            ClientTier::Premium => 15,
        }
    }
}

impl fmt::Display for ClientTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientTier::Basic => write!(f, "basic"),
            ClientTier::Standard => write!(f, "standard"),
            ClientTier::Vip => write!(f, "vip"),
            ClientTier::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for ClientTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "basic" => Ok(ClientTier::Basic),
            "standard" => Ok(ClientTier::Standard),
            "vip" => Ok(ClientTier::Vip),
            "premium" => Ok(ClientTier::Premium),
            other => Err(format!("unknown client tier: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Request,
    Clarification,
    Spam,
    Gratitude,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Request => write!(f, "request"),
            Classification::Clarification => write!(f, "clarification"),
            Classification::Spam => write!(f, "spam"),
            Classification::Gratitude => write!(f, "gratitude"),
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request" => Ok(Classification::Request),
            "clarification" => Ok(Classification::Clarification),
            "spam" => Ok(Classification::Spam),
            "gratitude" => Ok(Classification::Gratitude),
            other => Err(format!("unknown classification: {}", other)),
        }
    }
}

/// Request lifecycle status. The transition matrix that enforces legal moves
/// between these variants lives in `buhbot-requests`, next to the code that
/// enforces it; the variant set itself is core because the store needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    WaitingClient,
    Transferred,
    Answered,
    Escalated,
    Closed,
}

impl RequestStatus {
    /// Statuses from which an atomic claim (`update_if_status_in`) may
    /// transition straight to `Answered`.
    pub const CLAIMABLE: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::InProgress,
        RequestStatus::WaitingClient,
        RequestStatus::Transferred,
        RequestStatus::Escalated,
    ];

    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Closed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::WaitingClient => "waiting_client",
            RequestStatus::Transferred => "transferred",
            RequestStatus::Answered => "answered",
            RequestStatus::Escalated => "escalated",
            RequestStatus::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "in_progress" => Ok(RequestStatus::InProgress),
            "waiting_client" => Ok(RequestStatus::WaitingClient),
            "transferred" => Ok(RequestStatus::Transferred),
            "answered" => Ok(RequestStatus::Answered),
            "escalated" => Ok(RequestStatus::Escalated),
            "closed" => Ok(RequestStatus::Closed),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Warning,
    Breach,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::Warning => write!(f, "warning"),
            AlertType::Breach => write!(f, "breach"),
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "warning" => Ok(AlertType::Warning),
            "breach" => Ok(AlertType::Breach),
            other => Err(format!("unknown alert type: {}", other)),
        }
    }
}

/// `accountant | manager | both | fallback` per §4.3's recipient resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientSource {
    Accountant,
    Manager,
    Both,
    Fallback,
}

impl fmt::Display for RecipientSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientSource::Accountant => write!(f, "accountant"),
            RecipientSource::Manager => write!(f, "manager"),
            RecipientSource::Both => write!(f, "both"),
            RecipientSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// A group/supergroup under SLA monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: Option<String>,
    pub kind: ChatKind,
    pub monitoring_enabled: bool,
    pub sla_enabled: bool,
    pub notify_in_chat_on_breach: bool,
    pub is_24x7_mode: bool,
    pub sla_threshold_minutes: Option<u32>,
    pub client_tier: Option<ClientTier>,
    pub accountant_telegram_ids: Vec<TelegramUserId>,
    pub accountant_usernames: Vec<String>,
    pub accountant_username: Option<String>,
    pub assigned_accountant_id: Option<AccountantUserId>,
    pub assigned_accountant_telegram_id: Option<TelegramUserId>,
    pub assigned_accountant_username: Option<String>,
    pub manager_telegram_ids: Vec<TelegramUserId>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Chat {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A tracked client question awaiting a responder reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub chat_id: ChatId,
    pub message_id: i64,
    pub message_text: String,
    pub client_username: Option<String>,
    pub classification: Classification,
    pub classification_score: f64,
    pub status: RequestStatus,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub response_at: Option<chrono::DateTime<chrono::Utc>>,
    pub response_message_id: Option<i64>,
    pub responded_by: Option<AccountantUserId>,
    pub response_time_minutes: Option<i64>,
    pub sla_breached: bool,
    pub assigned_to: Option<AccountantUserId>,
    pub thread_id: Option<String>,
}

/// Append-only SLA notification record for a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub request_id: RequestId,
    pub alert_type: AlertType,
    pub level: u32,
    pub minutes_elapsed: i64,
    pub alert_sent_at: chrono::DateTime<chrono::Utc>,
    pub recipients: Vec<String>,
    pub resolved_action: Option<String>,
    pub resolution_notes: Option<String>,
    pub acknowledged_at: Option<chrono::DateTime<chrono::Utc>>,
    pub acknowledged_by: Option<String>,
}

/// Singleton defaults row consulted when a chat leaves a setting unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub timezone: String,
    pub working_days: Vec<u8>,
    pub start_time: String,
    pub end_time: String,
    pub default_sla_threshold_minutes: u32,
    pub max_escalations: u32,
    pub escalation_interval_minutes: u32,
    pub sla_warning_percent: u8,
    pub global_manager_telegram_ids: Vec<TelegramUserId>,
    pub ai_confidence_threshold: f64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            working_days: vec![1, 2, 3, 4, 5],
            start_time: "09:00".to_string(),
            end_time: "18:00".to_string(),
            default_sla_threshold_minutes: 60,
            max_escalations: 3,
            escalation_interval_minutes: 30,
            sla_warning_percent: 80,
            global_manager_telegram_ids: Vec::new(),
            ai_confidence_threshold: 0.6,
        }
    }
}

/// Per-chat override of the working-hours window; a chat may have several
/// (one per active day), or none (falls through to [`GlobalSettings`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingScheduleRow {
    pub chat_id: ChatId,
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
    pub is_active: bool,
}

/// A calendar date, in the schedule's timezone, excluded from working time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

/// One changed-field diff entry written by the audit hook around Request updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHistoryEntry {
    pub request_id: RequestId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: String,
    pub reason: Option<String>,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// `{changedBy, reason}` propagated explicitly into every audited store write.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub changed_by: String,
    pub reason: Option<String>,
}

impl AuditContext {
    pub fn system(reason: impl Into<String>) -> Self {
        Self {
            changed_by: "system".to_string(),
            reason: Some(reason.into()),
        }
    }

    pub fn actor(changed_by: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            changed_by: changed_by.into(),
            reason: Some(reason.into()),
        }
    }
}

/// Raw inbound message log row, kept for observability per the ingress
/// pipeline's step 2 — not part of the distilled data model but required by
/// C10 (see SPEC_FULL.md §3 "Ambient: ChatMessage").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: ChatId,
    pub message_id: i64,
    pub from_user_id: TelegramUserId,
    pub from_username: Option<String>,
    pub text: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub resolved_request_id: Option<RequestId>,
}

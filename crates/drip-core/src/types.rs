use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created, waiting for the subscriber to confirm their address.
    PendingConfirm,
    /// Confirmed; the only state the scheduler dispatches.
    Active,
    /// Temporarily halted by the subscriber.
    Paused,
    /// Unsubscribed. Terminal for the scheduler.
    Stopped,
    /// Every step has been delivered. Terminal for the scheduler.
    Completed,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionStatus::PendingConfirm => "pending_confirm",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Stopped => "stopped",
            SubscriptionStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending_confirm" => Ok(SubscriptionStatus::PendingConfirm),
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "stopped" => Ok(SubscriptionStatus::Stopped),
            "completed" => Ok(SubscriptionStatus::Completed),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// A subscriber's enrolment in one content pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub email: String,
    /// Identifies the content sequence in the pack registry.
    pub pack_key: String,
    /// IANA timezone name, e.g. `Europe/Berlin`.
    pub timezone: String,
    /// Standard 5-field cron expression evaluated in `timezone`.
    pub cron_expression: String,
    pub status: SubscriptionStatus,
    /// Index of the *next* step to send. Never decreases.
    pub current_step_index: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome recorded in the send log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Success,
    Failed,
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendStatus::Success => write!(f, "success"),
            SendStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SendStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(SendStatus::Success),
            "failed" => Ok(SendStatus::Failed),
            other => Err(format!("unknown send status: {other}")),
        }
    }
}

/// One append-only row of the send log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendLogEntry {
    pub id: i64,
    pub subscription_id: String,
    /// Stable step identifier, independent of the step's numeric position.
    pub step_slug: String,
    pub status: SendStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// The step the resolver hands back for a `(pack_key, index)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub pack_key: String,
    pub index: u32,
    pub slug: String,
    pub subject: String,
    /// Source text of the step; turned into HTML by the pack's renderer.
    pub body: String,
}

/// Provider acknowledgement for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
}

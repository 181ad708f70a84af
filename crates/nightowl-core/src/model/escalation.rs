use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMethod {
    MessagingDm,
    MessagingChannel,
    Phone,
    Sms,
}

/// A target selector token, e.g. `oncall_primary`, `team_lead`, or
/// `user:<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    OncallPrimary,
    OncallSecondary,
    TeamLead,
    User(Uuid),
}

impl TargetSelector {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "oncall_primary" => Some(Self::OncallPrimary),
            "oncall_secondary" => Some(Self::OncallSecondary),
            "team_lead" => Some(Self::TeamLead),
            other => other
                .strip_prefix("user:")
                .and_then(|id| Uuid::parse_str(id).ok())
                .map(Self::User),
        }
    }

    pub fn as_token(&self) -> String {
        match self {
            Self::OncallPrimary => "oncall_primary".to_string(),
            Self::OncallSecondary => "oncall_secondary".to_string(),
            Self::TeamLead => "team_lead".to_string(),
            Self::User(id) => format!("user:{id}"),
        }
    }
}

/// One step in an escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationTier {
    pub tier: i32,
    pub timeout_minutes: i32,
    pub notify_via: HashSet<NotifyMethod>,
    pub targets: Vec<TargetSelector>,
}

/// An ordered list of tiers governing how an alert is escalated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: Uuid,
    pub name: String,
    pub tiers: Vec<EscalationTier>,
    pub repeat_count: i32,
}

impl EscalationPolicy {
    /// `cumulative_timeout(k) = sum of timeout_minutes[1..k]`.
    ///
    /// Tiers are 1-indexed; `k = 0` always yields zero.
    pub fn cumulative_timeout(&self, k: i32) -> i32 {
        if k <= 0 {
            return 0;
        }
        self.tiers
            .iter()
            .filter(|t| t.tier <= k)
            .map(|t| t.timeout_minutes)
            .sum()
    }

    /// `due_tier = max{k : cumulative_timeout(k) <= elapsed}` clamped to the
    /// policy's tier count. Policies with no tiers always yield 0.
    pub fn due_tier(&self, elapsed_minutes: f64) -> i32 {
        let mut due = 0;
        for tier in &self.tiers {
            if self.cumulative_timeout(tier.tier) as f64 <= elapsed_minutes {
                due = tier.tier;
            }
        }
        due
    }

    pub fn tier_count(&self) -> i32 {
        self.tiers.iter().map(|t| t.tier).max().unwrap_or(0)
    }

    pub fn tier(&self, tier: i32) -> Option<&EscalationTier> {
        self.tiers.iter().find(|t| t.tier == tier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "escalation_action", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EscalationAction {
    Notified,
    Acknowledged,
    Timeout,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notify_result", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotifyResult {
    Sent,
    Failed,
    Busy,
    Voicemail,
}

/// Append-only audit row recording one escalation action taken against an
/// alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub policy_id: Uuid,
    pub tier: i32,
    pub action: EscalationAction,
    pub target_user_id: Option<Uuid>,
    pub notify_method: Option<NotifyMethod>,
    pub notify_result: Option<NotifyResult>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One planned notification the dry-run endpoint (or the real engine)
/// would emit for a given tier boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedNotification {
    pub tier: i32,
    pub cumulative_minutes: i32,
    pub timeout_minutes: i32,
    pub notify_via: Vec<NotifyMethod>,
    pub targets: Vec<TargetSelector>,
}

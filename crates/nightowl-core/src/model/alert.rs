use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Investigating,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Major,
    Critical,
}

impl Severity {
    /// Maps an arbitrary, possibly-unknown label value to a canonical
    /// severity, defaulting unknown values to `warning` per the
    /// Alertmanager normalization rule.
    pub fn from_label(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "info" | "informational" => Severity::Info,
            "major" => Severity::Major,
            "critical" | "crit" => Severity::Critical,
            "warning" | "warn" => Severity::Warning,
            _ => Severity::Warning,
        }
    }
}

/// A ringing signal from an external alert source, scoped to one tenant.
///
/// Mapped from rows by `nightowl-db` by hand (rather than
/// `#[derive(sqlx::FromRow)]`) because `labels`/`annotations` are stored as
/// `jsonb` columns and decoded through `sqlx::types::Json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub fingerprint: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub source: String,
    pub title: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub service_id: Option<Uuid>,

    pub matched_incident_id: Option<Uuid>,
    pub suggested_solution: Option<String>,

    pub first_fired_at: DateTime<Utc>,
    pub last_fired_at: DateTime<Utc>,
    pub occurrence_count: i32,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by_agent: bool,
    pub agent_resolution_notes: Option<String>,

    pub escalation_policy_id: Option<Uuid>,
    pub current_escalation_tier: i32,
}

impl Alert {
    /// Invariants from the data model: occurrence_count >= 1,
    /// acknowledged_at <= resolved_at when both set, status = resolved iff
    /// resolved_at set, last_fired_at >= first_fired_at.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.occurrence_count < 1 {
            return Err("occurrence_count must be >= 1".into());
        }
        if self.last_fired_at < self.first_fired_at {
            return Err("last_fired_at must be >= first_fired_at".into());
        }
        if let (Some(ack), Some(res)) = (self.acknowledged_at, self.resolved_at) {
            if ack > res {
                return Err("acknowledged_at must be <= resolved_at".into());
            }
        }
        let resolved_consistent = (self.status == AlertStatus::Resolved) == self.resolved_at.is_some();
        if !resolved_consistent {
            return Err("status = resolved iff resolved_at is set".into());
        }
        Ok(())
    }
}

/// A normalized alert prior to persistence: the output of §4.1
/// normalization, before dedup/enrichment/persist/publish runs.
#[derive(Debug, Clone)]
pub struct NormalizedAlert {
    pub fingerprint: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub source: String,
    pub title: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub escalation_policy_id: Option<Uuid>,
    pub agent_auto_resolved: bool,
    pub agent_action_taken: Option<String>,
}

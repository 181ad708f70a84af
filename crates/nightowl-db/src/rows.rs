//! Row-to-domain-type mapping for tables with `jsonb` columns, which
//! `#[derive(sqlx::FromRow)]` cannot decode directly into `HashMap`/`Vec`
//! fields without going through `sqlx::types::Json`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nightowl_core::model::{Alert, AlertStatus, Severity};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct AlertRow {
    pub id: Uuid,
    pub fingerprint: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub source: String,
    pub title: String,
    pub description: String,
    pub labels: Json<HashMap<String, String>>,
    pub annotations: Json<HashMap<String, String>>,
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

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        Alert {
            id: row.id,
            fingerprint: row.fingerprint,
            status: row.status,
            severity: row.severity,
            source: row.source,
            title: row.title,
            description: row.description,
            labels: row.labels.0,
            annotations: row.annotations.0,
            service_id: row.service_id,
            matched_incident_id: row.matched_incident_id,
            suggested_solution: row.suggested_solution,
            first_fired_at: row.first_fired_at,
            last_fired_at: row.last_fired_at,
            occurrence_count: row.occurrence_count,
            acknowledged_by: row.acknowledged_by,
            acknowledged_at: row.acknowledged_at,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            resolved_by_agent: row.resolved_by_agent,
            agent_resolution_notes: row.agent_resolution_notes,
            escalation_policy_id: row.escalation_policy_id,
            current_escalation_tier: row.current_escalation_tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_row() -> AlertRow {
        AlertRow {
            id: Uuid::new_v4(),
            fingerprint: "fp-1".into(),
            status: AlertStatus::Firing,
            severity: Severity::Critical,
            source: "alertmanager".into(),
            title: "disk full".into(),
            description: "".into(),
            labels: Json(HashMap::from([("job".to_string(), "node".to_string())])),
            annotations: Json(HashMap::new()),
            service_id: None,
            matched_incident_id: None,
            suggested_solution: None,
            first_fired_at: Utc::now(),
            last_fired_at: Utc::now(),
            occurrence_count: 1,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            resolved_by_agent: false,
            agent_resolution_notes: None,
            escalation_policy_id: None,
            current_escalation_tier: 0,
        }
    }

    #[test]
    fn maps_jsonb_labels_into_hashmap() {
        let alert: Alert = sample_row().into();
        assert_eq!(alert.labels.get("job"), Some(&"node".to_string()));
        assert!(alert.check_invariants().is_ok());
    }
}

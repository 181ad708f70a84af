//! Normalizes the three accepted webhook shapes (Alertmanager v4, Keep,
//! generic JSON) into the canonical [`NormalizedAlert`].
//!
//! JSON parsing and API-key authentication happen upstream in the HTTP
//! layer; this module receives already-parsed `serde_json::Value` bodies
//! so it can be unit-tested without a router.

use std::collections::HashMap;

use nightowl_core::model::{AlertStatus, NormalizedAlert, Severity};
use nightowl_core::{NightOwlError, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// One record in an Alertmanager v4 webhook body's `alerts` array.
#[derive(Debug, Deserialize)]
struct AlertmanagerRecord {
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    fingerprint: String,
    #[serde(rename = "startsAt", default)]
    #[allow(dead_code)]
    starts_at: Option<String>,
    #[serde(rename = "endsAt", default)]
    ends_at: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlertmanagerPayload {
    #[serde(default)]
    alerts: Vec<AlertmanagerRecord>,
}

#[derive(Debug, Deserialize)]
struct KeepPayload {
    name: String,
    #[serde(default)]
    severity: Option<String>,
    fingerprint: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "lastReceived", default)]
    #[allow(dead_code)]
    last_received: Option<String>,
}

/// An Alertmanager `endsAt` value of `"0001-01-01T00:00:00Z"` means "not
/// ended"; anything else non-empty is a real end time.
fn endsat_is_nonzero(ends_at: &Option<String>) -> bool {
    match ends_at {
        None => false,
        Some(v) => !v.is_empty() && !v.starts_with("0001-01-01"),
    }
}

/// Parses an Alertmanager v4 webhook body into one [`NormalizedAlert`] per
/// array element, each processed independently in array order — no
/// batching or merge across elements in the same POST.
pub fn normalize_alertmanager(body: &serde_json::Value) -> Result<Vec<NormalizedAlert>> {
    let payload: AlertmanagerPayload = serde_json::from_value(body.clone())
        .map_err(|err| NightOwlError::bad_request(format!("invalid alertmanager payload: {err}")))?;

    payload
        .alerts
        .into_iter()
        .map(|record| {
            let title = record
                .labels
                .get("alertname")
                .cloned()
                .ok_or_else(|| NightOwlError::bad_request("alertmanager record missing alertname label"))?;
            let severity = record
                .labels
                .get("severity")
                .map(|v| Severity::from_label(v))
                .unwrap_or(Severity::Warning);
            let resolved = record.status.as_deref() == Some("resolved") && endsat_is_nonzero(&record.ends_at);
            Ok(NormalizedAlert {
                fingerprint: record.fingerprint,
                status: if resolved { AlertStatus::Resolved } else { AlertStatus::Firing },
                severity,
                source: "alertmanager".into(),
                title,
                description: record.annotations.get("description").cloned().unwrap_or_default(),
                labels: record.labels,
                annotations: record.annotations,
                escalation_policy_id: None,
                agent_auto_resolved: false,
                agent_action_taken: None,
            })
        })
        .collect()
}

/// Parses a Keep-format webhook body.
pub fn normalize_keep(body: &serde_json::Value) -> Result<NormalizedAlert> {
    let payload: KeepPayload =
        serde_json::from_value(body.clone()).map_err(|err| NightOwlError::bad_request(format!("invalid keep payload: {err}")))?;

    let severity = payload
        .severity
        .as_deref()
        .map(Severity::from_label)
        .unwrap_or(Severity::Warning);
    let source = payload.source.unwrap_or_else(|| "keep".to_string());
    let fingerprint = payload
        .fingerprint
        .unwrap_or_else(|| compute_fingerprint(&source, &payload.name, &payload.labels));
    let resolved = payload.status.as_deref() == Some("resolved");

    Ok(NormalizedAlert {
        fingerprint,
        status: if resolved { AlertStatus::Resolved } else { AlertStatus::Firing },
        severity,
        source,
        title: payload.name,
        description: payload.description,
        labels: payload.labels,
        annotations: HashMap::new(),
        escalation_policy_id: None,
        agent_auto_resolved: false,
        agent_action_taken: None,
    })
}

/// Parses a fully generic JSON webhook body. Required: `title` (falling
/// back to the first non-empty of `name`, `alertname`) and `severity`.
/// `fingerprint` is computed deterministically when absent. Any field not
/// consumed by the canonical schema is folded into `annotations` so nothing
/// from the original payload is silently dropped.
pub fn normalize_generic(body: &serde_json::Value) -> Result<NormalizedAlert> {
    let obj = body
        .as_object()
        .ok_or_else(|| NightOwlError::bad_request("generic webhook body must be a JSON object"))?;

    let title = obj
        .get("title")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| obj.get("name").and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
        .or_else(|| obj.get("alertname").and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
        .ok_or_else(|| NightOwlError::validation(vec![nightowl_core::error::FieldDetail::new("title", "title is required")]))?
        .to_string();

    let severity_str = obj
        .get("severity")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NightOwlError::validation(vec![nightowl_core::error::FieldDetail::new("severity", "severity is required")]))?;
    let severity = Severity::from_label(severity_str);

    let source = obj.get("source").and_then(|v| v.as_str()).unwrap_or("generic").to_string();
    let description = obj.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let labels = obj
        .get("labels")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect::<HashMap<_, _>>()
        })
        .unwrap_or_default();

    let known_fields = [
        "title",
        "name",
        "alertname",
        "severity",
        "source",
        "description",
        "labels",
        "fingerprint",
        "status",
        "agent_metadata",
    ];
    let mut annotations: HashMap<String, String> = obj
        .iter()
        .filter(|(key, _)| !known_fields.contains(&key.as_str()))
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect();
    if let Some(existing) = obj.get("annotations").and_then(|v| v.as_object()) {
        for (k, v) in existing {
            if let Some(s) = v.as_str() {
                annotations.insert(k.clone(), s.to_string());
            }
        }
    }

    let fingerprint = obj
        .get("fingerprint")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| compute_fingerprint(&source, &title, &labels));

    let resolved = obj.get("status").and_then(|v| v.as_str()) == Some("resolved");

    let agent_metadata = obj.get("agent_metadata");
    let agent_auto_resolved = agent_metadata
        .and_then(|m| m.get("auto_resolved"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let agent_action_taken = agent_metadata
        .and_then(|m| m.get("action_taken"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(NormalizedAlert {
        fingerprint,
        status: if resolved { AlertStatus::Resolved } else { AlertStatus::Firing },
        severity,
        source,
        title,
        description,
        labels,
        annotations,
        escalation_policy_id: None,
        agent_auto_resolved,
        agent_action_taken,
    })
}

/// `SHA-256(source || '|' || title || '|' || sorted(labels))`, truncated to
/// 16 hex chars — the deterministic fallback fingerprint used when a
/// source doesn't supply its own.
/// `sorted(labels)` is rendered as `key=value` pairs joined by `,`, sorted
/// by key, so the same label set always hashes identically regardless of
/// map iteration order.
pub fn compute_fingerprint(source: &str, title: &str, labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = labels.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let labels_str = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    let input = format!("{source}|{title}|{labels_str}");
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic_regardless_of_label_order() {
        let mut a = HashMap::new();
        a.insert("pod".to_string(), "web-1".to_string());
        a.insert("ns".to_string(), "prod".to_string());
        let mut b = HashMap::new();
        b.insert("ns".to_string(), "prod".to_string());
        b.insert("pod".to_string(), "web-1".to_string());
        assert_eq!(compute_fingerprint("alertmanager", "PodCrash", &a), compute_fingerprint("alertmanager", "PodCrash", &b));
    }

    #[test]
    fn fingerprint_is_sixteen_hex_chars() {
        let fp = compute_fingerprint("src", "title", &HashMap::new());
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn alertmanager_unknown_severity_maps_to_warning() {
        let body = json!({
            "alerts": [{
                "labels": {"alertname": "PodCrashLoopBackOff", "severity": "critical"},
                "annotations": {},
                "fingerprint": "abc123",
                "startsAt": "2026-02-20T00:00:00Z",
                "endsAt": "0001-01-01T00:00:00Z",
                "status": "firing"
            }]
        });
        let alerts = normalize_alertmanager(&body).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "PodCrashLoopBackOff");
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].status, AlertStatus::Firing);
    }

    #[test]
    fn alertmanager_resolved_with_nonzero_endsat_marks_resolved() {
        let body = json!({
            "alerts": [{
                "labels": {"alertname": "DiskFull"},
                "annotations": {},
                "fingerprint": "def456",
                "startsAt": "2026-02-20T00:00:00Z",
                "endsAt": "2026-02-20T01:00:00Z",
                "status": "resolved"
            }]
        });
        let alerts = normalize_alertmanager(&body).unwrap();
        assert_eq!(alerts[0].status, AlertStatus::Resolved);
        // Unknown severity label falls back to warning.
        assert_eq!(alerts[0].severity, Severity::Warning);
    }

    #[test]
    fn keep_format_defaults_fingerprint_when_absent() {
        let body = json!({
            "name": "HighMemory",
            "severity": "critical",
            "status": "firing",
            "description": "mem high",
            "labels": {"service": "api"},
            "source": "keep"
        });
        let alert = normalize_keep(&body).unwrap();
        assert_eq!(alert.fingerprint.len(), 16);
        assert_eq!(alert.title, "HighMemory");
    }

    #[test]
    fn generic_requires_title_and_severity() {
        let body = json!({ "description": "x" });
        let err = normalize_generic(&body).unwrap_err();
        assert!(matches!(err, NightOwlError::Validation { .. }));
    }

    #[test]
    fn generic_falls_back_through_name_then_alertname() {
        let body = json!({ "alertname": "FooBar", "severity": "info" });
        let alert = normalize_generic(&body).unwrap();
        assert_eq!(alert.title, "FooBar");
    }

    #[test]
    fn generic_preserves_unknown_fields_as_annotations() {
        let body = json!({
            "title": "Custom",
            "severity": "warning",
            "region": "us-east-1",
            "runbook_url": "https://example.com/runbook"
        });
        let alert = normalize_generic(&body).unwrap();
        assert_eq!(alert.annotations.get("region"), Some(&"us-east-1".to_string()));
        assert_eq!(alert.annotations.get("runbook_url"), Some(&"https://example.com/runbook".to_string()));
    }

    #[test]
    fn generic_agent_auto_resolved_path_is_detected() {
        let body = json!({
            "title": "Memory leak",
            "severity": "critical",
            "agent_metadata": {"auto_resolved": true, "action_taken": "Increased memory"}
        });
        let alert = normalize_generic(&body).unwrap();
        assert!(alert.agent_auto_resolved);
        assert_eq!(alert.agent_action_taken.as_deref(), Some("Increased memory"));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::Severity;

/// A knowledge-base entry describing a class of failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub title: String,
    pub fingerprints: Vec<String>,
    pub severity: Severity,
    pub category: String,
    pub tags: Vec<String>,
    pub services: Vec<String>,
    pub clusters: Vec<String>,
    pub namespaces: Vec<String>,
    pub symptoms: String,
    pub error_patterns: Vec<String>,
    pub root_cause: String,
    pub solution: String,
    pub runbook_id: Option<Uuid>,
    pub resolution_count: i32,
    pub avg_resolution_mins: f64,
    pub merged_into_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// An incident with `merged_into_id` set is excluded from all searches
    /// and enrichment.
    pub fn is_searchable(&self) -> bool {
        self.merged_into_id.is_none()
    }

    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.fingerprints.iter().any(|f| f == fingerprint)
    }
}

/// A single diff entry recorded against an incident's history, capturing
/// one changed field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentHistoryEntry {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub changed_by: Option<Uuid>,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// A ranked search hit with highlighted fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSearchHit {
    pub incident: Incident,
    pub rank: f64,
    pub title_highlight: String,
    pub symptoms_highlight: String,
    pub solution_highlight: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: u32 = 25;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn normalized(&self) -> Self {
        let page = self.page.max(1);
        let page_size = if self.page_size == 0 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            self.page_size.min(Self::MAX_PAGE_SIZE)
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        let n = self.normalized();
        ((n.page - 1) * n.page_size) as i64
    }

    pub fn limit(&self) -> i64 {
        self.normalized().page_size as i64
    }
}

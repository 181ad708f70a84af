use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rotation_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RotationType {
    Daily,
    Weekly,
    Custom,
}

/// A named on-call schedule for a team.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Roster {
    pub id: Uuid,
    pub name: String,
    pub timezone: String,
    pub rotation_type: RotationType,
    pub rotation_length: i32,
    pub handoff_time: NaiveTime,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_follow_the_sun: bool,
    pub linked_roster_id: Option<Uuid>,
    pub escalation_policy_id: Option<Uuid>,
}

impl Roster {
    /// `is_active = (end_date is null OR end_date >= today_in_tenant_zone)`.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.end_date.map_or(true, |end| end >= today)
    }
}

/// Ordered pool member for a roster.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RosterMember {
    pub roster_id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub display_name: String,
    pub email: String,
}

/// Explicit takeover of a time window: half-open interval [start_at, end_at).
///
/// `display_name`/`email` are denormalized onto the row at creation time
/// (mirroring `RosterMember`) since the overriding user need not be a member
/// of this roster's regular pool and there is no `users` table in this
/// repository's scope to join against.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RosterOverride {
    pub id: Uuid,
    pub roster_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: String,
}

impl RosterOverride {
    pub fn user_ref(&self) -> UserRef {
        UserRef {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }
}

impl RosterOverride {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.start_at <= at && at < self.end_at
    }
}

/// A lightweight reference to a user, returned by on-call resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnCallSource {
    Override,
    Schedule,
    Unassigned,
}

/// Result of resolving who is on-call for a roster at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnCallResolution {
    pub primary: Option<UserRef>,
    pub secondary: Option<UserRef>,
    pub source: OnCallSource,
}

impl OnCallResolution {
    pub fn unassigned() -> Self {
        Self {
            primary: None,
            secondary: None,
            source: OnCallSource::Unassigned,
        }
    }
}

/// One completed or upcoming shift, surfaced by the history query and iCal
/// export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub roster_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub primary: Option<UserRef>,
    pub secondary: Option<UserRef>,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub override_id: Option<Uuid>,
}

//! Database-backed on-call service: loads roster/member/override rows (and,
//! for follow-the-sun rosters, the linked partner's) and hands them to the
//! pure functions in [`crate::resolution`], [`crate::history`] and
//! [`crate::ical`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nightowl_core::model::{OnCallResolution, Roster, RosterMember, RosterOverride, Shift};
use nightowl_core::{NightOwlError, Result};
use nightowl_db::Database;
use uuid::Uuid;

use crate::{history, ical, resolution};

#[derive(Clone)]
pub struct OnCallService {
    db: Arc<Database>,
}

impl OnCallService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The roster that names `policy_id` as its escalation policy, if any.
    /// Used to resolve `oncall_primary`/`oncall_secondary` target selectors
    /// for an alert that only carries an `escalation_policy_id`.
    pub async fn roster_for_policy(&self, schema: &str, policy_id: Uuid) -> Result<Option<Roster>> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        sqlx::query_as::<_, Roster>(
            "SELECT id, name, timezone, rotation_type, rotation_length, handoff_time, \
             start_date, end_date, is_follow_the_sun, linked_roster_id, escalation_policy_id \
             FROM rosters WHERE escalation_policy_id = $1 LIMIT 1",
        )
        .bind(policy_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    /// Every roster still active today (`end_date` null or in the future),
    /// for the worker's handoff cron — it has no single roster id to key
    /// off, so it must enumerate.
    pub async fn list_active_rosters(&self, schema: &str) -> Result<Vec<Roster>> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        sqlx::query_as::<_, Roster>(
            "SELECT id, name, timezone, rotation_type, rotation_length, handoff_time, \
             start_date, end_date, is_follow_the_sun, linked_roster_id, escalation_policy_id \
             FROM rosters WHERE end_date IS NULL OR end_date >= CURRENT_DATE ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    pub async fn members(&self, schema: &str, roster_id: Uuid) -> Result<Vec<RosterMember>> {
        self.fetch_members(schema, roster_id).await
    }

    async fn fetch_roster(&self, schema: &str, roster_id: Uuid) -> Result<Roster> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        sqlx::query_as::<_, Roster>(
            "SELECT id, name, timezone, rotation_type, rotation_length, handoff_time, \
             start_date, end_date, is_follow_the_sun, linked_roster_id, escalation_policy_id \
             FROM rosters WHERE id = $1",
        )
        .bind(roster_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
        .ok_or_else(|| NightOwlError::NotFound(format!("roster {roster_id}")))
    }

    async fn fetch_members(&self, schema: &str, roster_id: Uuid) -> Result<Vec<RosterMember>> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        sqlx::query_as::<_, RosterMember>(
            "SELECT roster_id, user_id, \"position\", display_name, email \
             FROM roster_members WHERE roster_id = $1 ORDER BY \"position\"",
        )
        .bind(roster_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    async fn fetch_overrides(&self, schema: &str, roster_id: Uuid) -> Result<Vec<RosterOverride>> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        sqlx::query_as::<_, RosterOverride>(
            "SELECT id, roster_id, user_id, display_name, email, start_at, end_at, reason \
             FROM roster_overrides WHERE roster_id = $1 ORDER BY start_at",
        )
        .bind(roster_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    /// Loads everything needed for a follow-the-sun resolution: the roster,
    /// its members and overrides, and (if configured) its partner's roster
    /// and members.
    async fn load_for_resolution(
        &self,
        schema: &str,
        roster_id: Uuid,
    ) -> Result<(Roster, Vec<RosterMember>, Vec<RosterOverride>, Option<(Roster, Vec<RosterMember>)>)> {
        let roster = self.fetch_roster(schema, roster_id).await?;
        let members = self.fetch_members(schema, roster_id).await?;
        let overrides = self.fetch_overrides(schema, roster_id).await?;
        let linked = match (roster.is_follow_the_sun, roster.linked_roster_id) {
            (true, Some(partner_id)) => {
                let partner = self.fetch_roster(schema, partner_id).await?;
                let partner_members = self.fetch_members(schema, partner_id).await?;
                Some((partner, partner_members))
            }
            _ => None,
        };
        Ok((roster, members, overrides, linked))
    }

    pub async fn resolve_at(&self, schema: &str, roster_id: Uuid, at: DateTime<Utc>) -> Result<OnCallResolution> {
        let (roster, members, overrides, linked) = self.load_for_resolution(schema, roster_id).await?;
        let linked_ref = linked.as_ref().map(|(r, m)| (r, m.as_slice()));
        resolution::resolve(&roster, &members, &overrides, linked_ref, at)
            .map_err(|err| NightOwlError::Internal(err))
    }

    pub async fn history(&self, schema: &str, roster_id: Uuid) -> Result<Vec<Shift>> {
        let roster = self.fetch_roster(schema, roster_id).await?;
        let members = self.fetch_members(schema, roster_id).await?;
        let overrides = self.fetch_overrides(schema, roster_id).await?;
        Ok(history::history(&roster, &members, &overrides, Utc::now()))
    }

    pub async fn export_ical(&self, schema: &str, roster_id: Uuid) -> Result<String> {
        let roster = self.fetch_roster(schema, roster_id).await?;
        let members = self.fetch_members(schema, roster_id).await?;
        let overrides = self.fetch_overrides(schema, roster_id).await?;
        let now = Utc::now();
        let mut shifts = history::upcoming_shifts(&roster, &members, now);
        let window_end = now + chrono::Duration::days(history::CALENDAR_WINDOW_DAYS);
        for ov in &overrides {
            if ov.start_at < window_end && ov.end_at > now {
                shifts.push(Shift {
                    roster_id: roster.id,
                    start_at: ov.start_at,
                    end_at: ov.end_at,
                    primary: Some(ov.user_ref()),
                    secondary: None,
                    is_override: true,
                    override_reason: Some(ov.reason.clone()),
                    override_id: Some(ov.id),
                });
            }
        }
        ical::build_calendar(&roster.timezone, &shifts).map_err(NightOwlError::Internal)
    }
}

//! Pure on-call resolution: override precedence, follow-the-sun active-window
//! selection, and rotation-position arithmetic. No I/O: callers in
//! `service.rs` fetch the roster/members/overrides rows and hand them here,
//! which is what makes determinism (testable property 3: two calls at the
//! same `at` return equal results) trivial to assert in unit tests.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use nightowl_core::model::{OnCallResolution, OnCallSource, Roster, RosterMember, RosterOverride, UserRef};

/// Converts `at` into `tz`'s local time-of-day.
fn local_time_of_day(tz: Tz, at: DateTime<Utc>) -> NaiveTime {
    at.with_timezone(&tz).time()
}

fn local_date(tz: Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// Seconds since midnight `t` lies after `window_start`, wrapping at 24h.
fn seconds_since(window_start: NaiveTime, t: NaiveTime) -> i64 {
    let start = window_start.num_seconds_from_midnight() as i64;
    let now = t.num_seconds_from_midnight() as i64;
    (now - start).rem_euclid(86_400)
}

const TWELVE_HOURS_SECS: i64 = 12 * 3600;

/// Selects which of two follow-the-sun partners is active at `at`: the one
/// whose `[handoff_time, handoff_time + 12h)` window (evaluated in its own
/// timezone) contains the local time-of-day. Ties/misconfiguration (both or
/// neither window contains the instant) fall back to whichever roster's
/// handoff occurred most recently.
pub fn select_active_roster<'a>(a: &'a Roster, b: &'a Roster, at: DateTime<Utc>) -> anyhow::Result<&'a Roster> {
    let tz_a: Tz = a.timezone.parse().map_err(|_| anyhow::anyhow!("invalid timezone: {}", a.timezone))?;
    let tz_b: Tz = b.timezone.parse().map_err(|_| anyhow::anyhow!("invalid timezone: {}", b.timezone))?;
    let since_a = seconds_since(a.handoff_time, local_time_of_day(tz_a, at));
    let since_b = seconds_since(b.handoff_time, local_time_of_day(tz_b, at));
    let a_in_window = since_a < TWELVE_HOURS_SECS;
    let b_in_window = since_b < TWELVE_HOURS_SECS;
    Ok(match (a_in_window, b_in_window) {
        (true, false) => a,
        (false, true) => b,
        // Neither/both: pick whichever handoff happened most recently.
        _ => {
            if since_a <= since_b {
                a
            } else {
                b
            }
        }
    })
}

/// The pure rotation calculation: `days = floor((at - (start_date at
/// handoff_time, in roster zone)) / 86400s)`; `days < 0` means the roster
/// hasn't started. `cycle = floor(days / rotation_length)`; `pos = cycle mod
/// len(members)`.
pub fn rotation_position(roster: &Roster, members: &[RosterMember], at: DateTime<Utc>) -> Option<usize> {
    if members.is_empty() {
        return None;
    }
    let tz: Tz = roster.timezone.parse().ok()?;
    let start = tz
        .from_local_datetime(&roster.start_date.and_time(roster.handoff_time))
        .single()?;
    let at_local = at.with_timezone(&tz);
    let elapsed = at_local.signed_duration_since(start);
    let days = elapsed.num_seconds().div_euclid(86_400);
    if days < 0 {
        return None;
    }
    let rotation_length = roster.rotation_length.max(1) as i64;
    let cycle = days / rotation_length;
    let pos = (cycle.rem_euclid(members.len() as i64)) as usize;
    Some(pos)
}

fn user_ref(member: &RosterMember) -> UserRef {
    UserRef {
        user_id: member.user_id,
        display_name: member.display_name.clone(),
        email: member.email.clone(),
    }
}

/// Rotation-only resolution (step 3), ignoring overrides and follow-the-sun
/// selection: used both as the schedule fallback and to compute the
/// "natural" secondary an override leaves untouched.
pub fn resolve_schedule(roster: &Roster, members: &[RosterMember], at: DateTime<Utc>) -> OnCallResolution {
    if let Some(end) = roster.end_date {
        let tz: Tz = match roster.timezone.parse() {
            Ok(tz) => tz,
            Err(_) => return OnCallResolution::unassigned(),
        };
        if local_date(tz, at) > end {
            return OnCallResolution::unassigned();
        }
    }
    let Some(pos) = rotation_position(roster, members, at) else {
        return OnCallResolution::unassigned();
    };
    let primary = &members[pos];
    let secondary = if members.len() > 1 {
        Some(user_ref(&members[(pos + 1) % members.len()]))
    } else {
        None
    };
    OnCallResolution {
        primary: Some(user_ref(primary)),
        secondary,
        source: OnCallSource::Schedule,
    }
}

/// Full on-call resolution for a single roster query: override check, then
/// (if the roster is follow-the-sun and the linked partner's data is
/// supplied) active-window selection, then rotation.
///
/// `linked` is `Some((partner_roster, partner_members))` only when `roster`
/// is configured as follow-the-sun and its partner was loaded by the
/// caller; overrides are always evaluated against `roster`/`overrides` only
/// — the override check runs on "this roster", not the selected partner.
pub fn resolve(
    roster: &Roster,
    members: &[RosterMember],
    overrides: &[RosterOverride],
    linked: Option<(&Roster, &[RosterMember])>,
    at: DateTime<Utc>,
) -> anyhow::Result<OnCallResolution> {
    let (active_roster, active_members) = match (roster.is_follow_the_sun, linked) {
        (true, Some((partner, partner_members))) => {
            let active = select_active_roster(roster, partner, at)?;
            if std::ptr::eq(active, roster) {
                (roster, members)
            } else {
                (partner, partner_members)
            }
        }
        _ => (roster, members),
    };

    let schedule = resolve_schedule(active_roster, active_members, at);

    if let Some(ov) = overrides.iter().find(|o| o.covers(at)) {
        return Ok(OnCallResolution {
            primary: Some(ov.user_ref()),
            secondary: schedule.secondary,
            source: OnCallSource::Override,
        });
    }

    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    fn member(position: i32, name: &str) -> RosterMember {
        RosterMember {
            roster_id: Uuid::nil(),
            user_id: Uuid::new_v4(),
            position,
            display_name: name.into(),
            email: format!("{name}@example.com"),
        }
    }

    fn base_roster(tz: &str, handoff: NaiveTime, start: NaiveDate) -> Roster {
        Roster {
            id: Uuid::new_v4(),
            name: "test".into(),
            timezone: tz.into(),
            rotation_type: nightowl_core::model::RotationType::Weekly,
            rotation_length: 7,
            handoff_time: handoff,
            start_date: start,
            end_date: None,
            is_follow_the_sun: false,
            linked_roster_id: None,
            escalation_policy_id: None,
        }
    }

    #[test]
    fn empty_member_list_is_unassigned() {
        let roster = base_roster("UTC", NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        let result = resolve_schedule(&roster, &[], Utc::now());
        assert_eq!(result.source, OnCallSource::Unassigned);
        assert!(result.primary.is_none());
    }

    #[test]
    fn single_member_has_no_secondary() {
        let roster = base_roster("UTC", NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        let members = vec![member(0, "Solo")];
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let result = resolve_schedule(&roster, &members, at);
        assert!(result.secondary.is_none());
        assert_eq!(result.primary.unwrap().display_name, "Solo");
    }

    #[test]
    fn before_start_date_is_unassigned() {
        let roster = base_roster("UTC", NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        let members = vec![member(0, "Alice"), member(1, "Bob")];
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let result = resolve_schedule(&roster, &members, at);
        assert_eq!(result.source, OnCallSource::Unassigned);
    }

    #[test]
    fn ended_roster_is_unassigned() {
        let mut roster = base_roster("UTC", NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        roster.end_date = Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        let members = vec![member(0, "Alice"), member(1, "Bob")];
        let at = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).unwrap();
        let result = resolve_schedule(&roster, &members, at);
        assert_eq!(result.source, OnCallSource::Unassigned);
    }

    /// Scenario 4: weekly rotation [Alice, Bob] starting Monday 2026-01-05;
    /// override assigning Charlie over [2026-02-16T00:00:00Z,
    /// 2026-02-19T00:00:00Z); queried at 2026-02-17T12:00:00Z. Expect
    /// primary = Charlie, source = override, secondary = the scheduled
    /// rotation member for that week (i.e. unaffected by the override).
    #[test]
    fn override_replaces_primary_but_not_schedules_secondary() {
        let roster = base_roster("UTC", NaiveTime::from_hms_opt(0, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        let members = vec![member(0, "Alice"), member(1, "Bob")];
        let at = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).unwrap();
        let without_override = resolve_schedule(&roster, &members, at);

        let charlie_id = Uuid::new_v4();
        let overrides = vec![RosterOverride {
            id: Uuid::new_v4(),
            roster_id: roster.id,
            user_id: charlie_id,
            display_name: "Charlie".into(),
            email: "charlie@example.com".into(),
            start_at: Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2026, 2, 19, 0, 0, 0).unwrap(),
            reason: "vacation coverage".into(),
        }];

        let result = resolve(&roster, &members, &overrides, None, at).unwrap();
        assert_eq!(result.source, OnCallSource::Override);
        assert_eq!(result.primary.unwrap().display_name, "Charlie");
        assert_eq!(result.secondary, without_override.secondary);
    }

    #[test]
    fn override_outside_window_does_not_apply() {
        let roster = base_roster("UTC", NaiveTime::from_hms_opt(0, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        let members = vec![member(0, "Alice"), member(1, "Bob")];
        let at = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap();
        let overrides = vec![RosterOverride {
            id: Uuid::new_v4(),
            roster_id: roster.id,
            user_id: Uuid::new_v4(),
            display_name: "Charlie".into(),
            email: "charlie@example.com".into(),
            start_at: Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2026, 2, 19, 0, 0, 0).unwrap(),
            reason: "vacation coverage".into(),
        }];
        let result = resolve(&roster, &members, &overrides, None, at).unwrap();
        assert_eq!(result.source, OnCallSource::Schedule);
    }

    /// Scenario 3: APAC (Pacific/Auckland, handoff 08:00) and EMEA
    /// (Europe/Berlin, handoff 08:00), each with a 9999-day rotation length
    /// so position never advances off member 0 within the test window,
    /// isolating the follow-the-sun window-selection logic from rotation
    /// arithmetic.
    #[test]
    fn follow_the_sun_selects_partner_by_local_window() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let handoff = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let mut apac = base_roster("Pacific/Auckland", handoff, start);
        apac.is_follow_the_sun = true;
        apac.rotation_length = 9999;
        let mut emea = base_roster("Europe/Berlin", handoff, start);
        emea.is_follow_the_sun = true;
        emea.rotation_length = 9999;
        apac.linked_roster_id = Some(emea.id);
        emea.linked_roster_id = Some(apac.id);

        let apac_members = vec![member(0, "Stefan"), member(1, "AliceNZ")];
        let emea_members = vec![member(0, "Hans"), member(1, "Katja")];

        let at_apac_active = Utc.with_ymd_and_hms(2026, 2, 20, 6, 0, 0).unwrap();
        let result = resolve(&apac, &apac_members, &[], Some((&emea, &emea_members)), at_apac_active).unwrap();
        assert_eq!(result.primary.unwrap().display_name, "Stefan");

        let at_emea_active = Utc.with_ymd_and_hms(2026, 2, 20, 10, 0, 0).unwrap();
        let result = resolve(&apac, &apac_members, &[], Some((&emea, &emea_members)), at_emea_active).unwrap();
        assert_eq!(result.primary.unwrap().display_name, "Hans");
    }

    #[test]
    fn same_input_is_deterministic() {
        let roster = base_roster("UTC", NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        let members = vec![member(0, "Alice"), member(1, "Bob"), member(2, "Carol")];
        let at = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let r1 = resolve_schedule(&roster, &members, at);
        let r2 = resolve_schedule(&roster, &members, at);
        assert_eq!(r1.primary, r2.primary);
        assert_eq!(r1.secondary, r2.secondary);
    }

    #[test]
    fn rotation_advances_by_cycle() {
        let roster = base_roster("UTC", NaiveTime::from_hms_opt(0, 0, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        let members = vec![member(0, "Alice"), member(1, "Bob")];
        // Week 0: Alice primary.
        let week0 = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
        assert_eq!(resolve_schedule(&roster, &members, week0).primary.unwrap().display_name, "Alice");
        // Week 1 (+7 days): Bob primary.
        let week1 = Utc.with_ymd_and_hms(2026, 1, 13, 0, 0, 0).unwrap();
        assert_eq!(resolve_schedule(&roster, &members, week1).primary.unwrap().display_name, "Bob");
        // Week 2 (+14 days): Alice again.
        let week2 = Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap();
        assert_eq!(resolve_schedule(&roster, &members, week2).primary.unwrap().display_name, "Alice");
    }
}

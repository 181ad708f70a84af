//! Shift history (`GET /rosters/:id/oncall/history`) and forward-looking
//! shift generation shared with the iCal exporter.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use nightowl_core::model::{Roster, RosterMember, RosterOverride, Shift, UserRef};

pub const HISTORY_SHIFT_COUNT: usize = 10;
pub const CALENDAR_WINDOW_DAYS: i64 = 30;

fn user_ref(member: &RosterMember) -> UserRef {
    UserRef {
        user_id: member.user_id,
        display_name: member.display_name.clone(),
        email: member.email.clone(),
    }
}

/// The raw (unwrapped, possibly negative) cycle index containing `at`, or
/// `None` if the roster's timezone fails to parse.
fn cycle_index_at(roster: &Roster, at: DateTime<Utc>) -> Option<i64> {
    let tz: Tz = roster.timezone.parse().ok()?;
    let start = tz.from_local_datetime(&roster.start_date.and_time(roster.handoff_time)).single()?;
    let at_local = at.with_timezone(&tz);
    let elapsed_days = at_local.signed_duration_since(start).num_seconds().div_euclid(86_400);
    let rotation_length = roster.rotation_length.max(1) as i64;
    Some(elapsed_days.div_euclid(rotation_length))
}

/// Start/end instants (in UTC) of the shift for raw cycle index `cycle`.
fn shift_bounds(roster: &Roster, cycle: i64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let tz: Tz = roster.timezone.parse().ok()?;
    let epoch = tz.from_local_datetime(&roster.start_date.and_time(roster.handoff_time)).single()?;
    let rotation_length = roster.rotation_length.max(1) as i64;
    let start = epoch + chrono::Duration::days(cycle * rotation_length);
    let end = start + chrono::Duration::days(rotation_length);
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

fn shift_for_cycle(roster: &Roster, members: &[RosterMember], cycle: i64) -> Option<Shift> {
    if members.is_empty() || cycle < 0 {
        return None;
    }
    let (start_at, end_at) = shift_bounds(roster, cycle)?;
    let pos = (cycle.rem_euclid(members.len() as i64)) as usize;
    let primary = Some(user_ref(&members[pos]));
    let secondary = if members.len() > 1 {
        Some(user_ref(&members[(pos + 1) % members.len()]))
    } else {
        None
    };
    Some(Shift {
        roster_id: roster.id,
        start_at,
        end_at,
        primary,
        secondary,
        is_override: false,
        override_reason: None,
        override_id: None,
    })
}

fn override_shift(roster_id: uuid::Uuid, ov: &RosterOverride) -> Shift {
    Shift {
        roster_id,
        start_at: ov.start_at,
        end_at: ov.end_at,
        primary: Some(ov.user_ref()),
        secondary: None,
        is_override: true,
        override_reason: Some(ov.reason.clone()),
        override_id: Some(ov.id),
    }
}

/// The last [`HISTORY_SHIFT_COUNT`] completed shifts as of `now`, newest
/// first, with any overrides covering those windows surfaced as additional
/// entries alongside their original scheduled shift.
pub fn history(roster: &Roster, members: &[RosterMember], overrides: &[RosterOverride], now: DateTime<Utc>) -> Vec<Shift> {
    let Some(current_cycle) = cycle_index_at(roster, now) else {
        return Vec::new();
    };

    let mut shifts = Vec::new();
    let mut cycle = current_cycle - 1;
    while shifts.len() < HISTORY_SHIFT_COUNT && cycle >= 0 {
        if let Some(shift) = shift_for_cycle(roster, members, cycle) {
            shifts.push(shift);
        }
        cycle -= 1;
    }

    if let (Some(oldest), Some(newest)) = (shifts.last(), shifts.first()) {
        let window_start = oldest.start_at;
        let window_end = newest.end_at;
        for ov in overrides {
            if ov.start_at < window_end && ov.end_at > window_start {
                shifts.push(override_shift(roster.id, ov));
            }
        }
    }

    shifts.sort_by(|a, b| b.start_at.cmp(&a.start_at));
    shifts
}

/// Forward-looking shifts over the next [`CALENDAR_WINDOW_DAYS`] days,
/// starting with the shift containing `now`, used by the iCal exporter.
pub fn upcoming_shifts(roster: &Roster, members: &[RosterMember], now: DateTime<Utc>) -> Vec<Shift> {
    let Some(current_cycle) = cycle_index_at(roster, now) else {
        return Vec::new();
    };
    let window_end = now + chrono::Duration::days(CALENDAR_WINDOW_DAYS);
    let mut shifts = Vec::new();
    let mut cycle = current_cycle.max(0);
    loop {
        let Some(shift) = shift_for_cycle(roster, members, cycle) else { break };
        if shift.start_at >= window_end {
            break;
        }
        shifts.push(shift);
        cycle += 1;
        if shifts.len() > 400 {
            // Guards against pathological (e.g. rotation_length = 0 clamped
            // to 1 on a misconfigured roster) infinite loops; 400 shifts
            // comfortably covers a 30-day window even at daily rotation.
            break;
        }
    }
    shifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use uuid::Uuid;

    fn roster() -> Roster {
        Roster {
            id: Uuid::new_v4(),
            name: "test".into(),
            timezone: "UTC".into(),
            rotation_type: nightowl_core::model::RotationType::Weekly,
            rotation_length: 7,
            handoff_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            end_date: None,
            is_follow_the_sun: false,
            linked_roster_id: None,
            escalation_policy_id: None,
        }
    }

    fn members() -> Vec<RosterMember> {
        vec![
            RosterMember {
                roster_id: Uuid::nil(),
                user_id: Uuid::new_v4(),
                position: 0,
                display_name: "Alice".into(),
                email: "alice@example.com".into(),
            },
            RosterMember {
                roster_id: Uuid::nil(),
                user_id: Uuid::new_v4(),
                position: 1,
                display_name: "Bob".into(),
                email: "bob@example.com".into(),
            },
        ]
    }

    #[test]
    fn history_returns_completed_shifts_newest_first() {
        let roster = roster();
        let members = members();
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let shifts = history(&roster, &members, &[], now);
        assert!(!shifts.is_empty());
        assert!(shifts.len() <= HISTORY_SHIFT_COUNT);
        for pair in shifts.windows(2) {
            assert!(pair[0].start_at >= pair[1].start_at);
        }
        // Every returned shift must have already ended.
        for shift in &shifts {
            assert!(shift.end_at <= now);
        }
    }

    #[test]
    fn history_caps_at_available_shifts_when_roster_is_young() {
        let roster = roster();
        let members = members();
        // Only three completed weeks have elapsed since start_date.
        let now = Utc.with_ymd_and_hms(2026, 1, 26, 0, 0, 0).unwrap();
        let shifts = history(&roster, &members, &[], now);
        assert!(shifts.len() <= 3);
    }

    #[test]
    fn upcoming_shifts_cover_the_calendar_window() {
        let roster = roster();
        let members = members();
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let shifts = upcoming_shifts(&roster, &members, now);
        assert!(!shifts.is_empty());
        let total_span = shifts.last().unwrap().end_at - shifts.first().unwrap().start_at;
        assert!(total_span >= chrono::Duration::days(CALENDAR_WINDOW_DAYS - 7));
    }
}

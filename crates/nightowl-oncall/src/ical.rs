//! RFC 5545 iCal export: one `VEVENT` per rotation shift and per override
//! within the 30-day window, with `DTSTART`/`DTEND` in UTC and roster local
//! time surfaced in `DESCRIPTION`. Event UIDs are stable per `(roster,
//! shift_start)` / `(override_id)` so re-exporting the same window produces
//! byte-identical UIDs for calendar clients that dedupe on them.
use chrono_tz::Tz;
use icalendar::{Calendar, Component, Event, EventLike};
use nightowl_core::model::Shift;
use sha2::{Digest, Sha256};

fn shift_uid(shift: &Shift) -> String {
    if let Some(override_id) = shift.override_id {
        return format!("override-{override_id}@nightowl");
    }
    let mut hasher = Sha256::new();
    hasher.update(shift.roster_id.as_bytes());
    hasher.update(shift.start_at.timestamp().to_le_bytes());
    format!("shift-{}@nightowl", hex::encode(hasher.finalize()))
}

fn display_name(shift: &Shift) -> String {
    shift
        .primary
        .as_ref()
        .map(|u| u.display_name.clone())
        .unwrap_or_else(|| "unassigned".to_string())
}

fn local_time_description(shift: &Shift, tz: Tz) -> String {
    format!(
        "{} \u{2013} {} ({})",
        shift.start_at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"),
        shift.end_at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"),
        tz
    )
}

/// Builds the calendar document for a set of shifts, already filtered to
/// the desired window by the caller (`history::upcoming_shifts` plus
/// whatever overrides fall within it).
pub fn build_calendar(timezone: &str, shifts: &[Shift]) -> anyhow::Result<Calendar> {
    let tz: Tz = timezone.parse().map_err(|_| anyhow::anyhow!("invalid timezone: {timezone}"))?;
    let mut calendar = Calendar::new();
    calendar.name("NightOwl On-Call");

    for shift in shifts {
        let summary = if shift.is_override {
            format!(
                "Override: {} \u{2014} {}",
                display_name(shift),
                shift.override_reason.as_deref().unwrap_or("")
            )
        } else {
            format!("On-call: {}", display_name(shift))
        };
        let event = Event::new()
            .uid(&shift_uid(shift))
            .summary(&summary)
            .description(&local_time_description(shift, tz))
            .starts(shift.start_at)
            .ends(shift.end_at)
            .done();
        calendar.push(event);
    }
    Ok(calendar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn sample_shift(is_override: bool) -> Shift {
        Shift {
            roster_id: Uuid::new_v4(),
            start_at: Utc.with_ymd_and_hms(2026, 2, 17, 8, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2026, 2, 24, 8, 0, 0).unwrap(),
            primary: Some(nightowl_core::model::UserRef {
                user_id: Uuid::new_v4(),
                display_name: "Alice".into(),
                email: "alice@example.com".into(),
            }),
            secondary: None,
            is_override,
            override_reason: is_override.then(|| "vacation coverage".to_string()),
            override_id: is_override.then(Uuid::new_v4),
        }
    }

    #[test]
    fn shift_uid_is_stable_for_the_same_roster_and_start() {
        let shift = sample_shift(false);
        assert_eq!(shift_uid(&shift), shift_uid(&shift));
    }

    #[test]
    fn override_uid_is_keyed_by_override_id() {
        let shift = sample_shift(true);
        assert!(shift_uid(&shift).starts_with("override-"));
    }

    #[test]
    fn calendar_renders_one_vevent_per_shift() {
        let shifts = vec![sample_shift(false), sample_shift(true)];
        let calendar = build_calendar("UTC", &shifts).unwrap();
        let rendered = calendar.to_string();
        assert_eq!(rendered.matches("BEGIN:VEVENT").count(), 2);
        assert!(rendered.contains("On-call: Alice"));
        assert!(rendered.contains("Override: Alice"));
    }
}

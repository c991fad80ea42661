//! Next-occurrence computation for event schedules.
//!
//! All schedule fields are interpreted in the single civil offset carried by
//! `now`. There is no DST handling.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone};

use crate::database::models::{weekday_from_index, Event, EventType};

/// Computes the next time an event fires, strictly after `now`.
///
/// Returns `None` for a single event whose date has passed and for
/// inconsistent schedule fields. Missed recurring slots are skipped, never
/// caught up.
pub fn next_occurrence(
    event_type: EventType,
    event_date: Option<DateTime<FixedOffset>>,
    weekday: Option<i64>,
    event_time: Option<NaiveTime>,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    match event_type {
        EventType::Single => event_date.filter(|date| *date > now),
        EventType::Recurring => {
            let weekday = weekday_from_index(weekday?)?;
            let time = event_time?;
            let offset = *now.offset();
            let today = now.date_naive();
            let days_ahead = (i64::from(weekday.num_days_from_monday())
                - i64::from(today.weekday().num_days_from_monday()))
            .rem_euclid(7);

            let candidate_date = today + Duration::days(days_ahead);
            let candidate = offset
                .from_local_datetime(&candidate_date.and_time(time))
                .single()?;

            if candidate <= now {
                Some(candidate + Duration::days(7))
            } else {
                Some(candidate)
            }
        }
    }
}

/// [`next_occurrence`] over a stored event.
pub fn next_for_event(event: &Event, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    next_occurrence(
        event.event_type,
        event.event_date,
        event.weekday,
        event.event_time,
        now,
    )
}

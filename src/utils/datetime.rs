use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use rust_decimal::Decimal;

use crate::database::models::{Event, Schedule};

/// Dates as users type and read them.
pub const DATE_FORMAT: &str = "%d.%m.%Y";
pub const TIME_FORMAT: &str = "%H:%M";

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
        .map_err(|_| anyhow!("Date must look like DD.MM.YYYY"))
}

pub fn parse_time(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), TIME_FORMAT)
        .map_err(|_| anyhow!("Time must look like HH:MM"))
}

/// Interprets a civil date and time in the bot's fixed offset.
pub fn local_datetime(
    date: NaiveDate,
    time: NaiveTime,
    tz: FixedOffset,
) -> Result<DateTime<FixedOffset>> {
    tz.from_local_datetime(&date.and_time(time))
        .single()
        .ok_or_else(|| anyhow!("{} {} is not a valid local time", date, time))
}

pub fn weekday_name(index: i64) -> &'static str {
    usize::try_from(index)
        .ok()
        .and_then(|i| WEEKDAY_NAMES.get(i))
        .copied()
        .unwrap_or("?")
}

pub fn format_datetime(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%d.%m.%Y %H:%M").to_string()
}

/// Human description of when an event takes place.
pub fn describe_schedule(event: &Event, tz: FixedOffset) -> String {
    match event.schedule() {
        Some(Schedule::Single(at)) => format!("once, {}", format_datetime(&at.with_timezone(&tz))),
        Some(Schedule::Weekly { weekday, time }) => format!(
            "every {} at {}",
            weekday_name(i64::from(weekday.num_days_from_monday())),
            time.format(TIME_FORMAT)
        ),
        None => "schedule incomplete".to_string(),
    }
}

/// Renders an amount without trailing zeros, e.g. `12.5` or `1000`.
pub fn format_amount(amount: Decimal) -> String {
    let normalized = amount.normalize();
    if normalized.is_zero() {
        "0".to_string()
    } else {
        normalized.to_string()
    }
}

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;

use crate::database::models::{
    Setting, DEMURRAGE_ENABLED, DEMURRAGE_INTERVAL_DAYS, DEMURRAGE_LAST_RUN, DEMURRAGE_RATE,
    EXCHANGE_RATE, GRACE_CREDIT_LIMIT, SETTING_DATE_FORMAT, WELCOME_BONUS_AMOUNT,
};

/// Amounts carry at most this many decimal places.
pub const MAX_AMOUNT_SCALE: u32 = 4;
/// Largest amount a single command may move or charge.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);
/// Upper bound for a reminder lead time (one week).
pub const MAX_REMINDER_MINUTES: i64 = 7 * 24 * 60;
pub const MAX_HISTORY_DAYS: i64 = 365;

/// Parses a strictly positive amount such as `10`, `2.5` or `0,75`.
pub fn validate_amount(input: &str) -> Result<Decimal> {
    let input = input.trim().replace(',', ".");
    if input.is_empty() {
        return Err(anyhow!("Amount cannot be empty"));
    }

    let amount: Decimal = input
        .parse()
        .map_err(|_| anyhow!("'{}' is not a number", input))?;

    if amount <= Decimal::ZERO {
        return Err(anyhow!("Amount must be greater than zero"));
    }
    if amount > MAX_AMOUNT {
        return Err(anyhow!("Amount cannot exceed {}", MAX_AMOUNT));
    }
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(anyhow!(
            "Amount can have at most {} decimal places",
            MAX_AMOUNT_SCALE
        ));
    }

    Ok(amount.normalize())
}

pub fn validate_cost(input: &str) -> Result<Decimal> {
    let trimmed = input.trim();
    if trimmed.parse::<Decimal>().is_ok_and(|value| value.is_zero()) {
        return Ok(Decimal::ZERO);
    }
    validate_amount(trimmed)
}

/// Accepts `@handle` or `handle` and returns the lower-cased handle.
pub fn validate_username(input: &str) -> Result<String> {
    let handle = input.trim().trim_start_matches('@');

    if handle.is_empty() {
        return Err(anyhow!("Username cannot be empty"));
    }
    if handle.len() > 32 {
        return Err(anyhow!("Username cannot be longer than 32 characters"));
    }
    if !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(anyhow!("Username can only contain letters, digits and underscores"));
    }

    Ok(handle.to_lowercase())
}

pub fn validate_id(input: &str, what: &str) -> Result<i64> {
    let id: i64 = input
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} id must be a number", what))?;
    if id <= 0 {
        return Err(anyhow!("{} id must be positive", what));
    }
    Ok(id)
}

/// Weekday index, 0 = Monday.
pub fn validate_weekday(input: &str) -> Result<i64> {
    match input.trim().parse::<i64>() {
        Ok(day) if (0..=6).contains(&day) => Ok(day),
        _ => Err(anyhow!("Weekday must be a number from 0 (Monday) to 6 (Sunday)")),
    }
}

pub fn validate_reminder_minutes(input: &str) -> Result<i64> {
    match input.trim().parse::<i64>() {
        Ok(minutes) if (0..=MAX_REMINDER_MINUTES).contains(&minutes) => Ok(minutes),
        _ => Err(anyhow!(
            "Reminder lead time must be between 0 and {} minutes",
            MAX_REMINDER_MINUTES
        )),
    }
}

pub fn validate_history_days(input: &str) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(30);
    }
    match input.parse::<i64>() {
        Ok(days) if (1..=MAX_HISTORY_DAYS).contains(&days) => Ok(days),
        _ => Err(anyhow!("Days must be between 1 and {}", MAX_HISTORY_DAYS)),
    }
}

/// A one-line name of at most 64 characters; `what` prefixes the error.
pub fn validate_title(name: &str, what: &str) -> Result<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(anyhow!("{} cannot be empty", what));
    }
    if name.chars().count() > 64 {
        return Err(anyhow!("{} cannot be longer than 64 characters", what));
    }
    if name.contains('\n') || name.contains('\r') {
        return Err(anyhow!("{} cannot contain line breaks", what));
    }

    Ok(())
}

pub fn validate_activity_name(name: &str) -> Result<()> {
    validate_title(name, "Activity name")
}

pub fn validate_link(link: &str) -> Result<()> {
    let link = link.trim();
    if !(link.starts_with("https://") || link.starts_with("http://")) {
        return Err(anyhow!("Link must start with http:// or https://"));
    }
    if link.contains(char::is_whitespace) {
        return Err(anyhow!("Link cannot contain spaces"));
    }
    Ok(())
}

pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    if !Setting::is_known(key) {
        return Err(anyhow!("Unknown setting '{}'", key));
    }

    let value = value.trim();
    match key {
        DEMURRAGE_ENABLED => match value {
            "0" | "1" => Ok(()),
            _ => Err(anyhow!("{} must be 0 or 1", key)),
        },
        DEMURRAGE_LAST_RUN => chrono::NaiveDate::parse_from_str(value, SETTING_DATE_FORMAT)
            .map(|_| ())
            .map_err(|_| anyhow!("{} must be a date like 2025-01-31", key)),
        DEMURRAGE_INTERVAL_DAYS => match value.parse::<i64>() {
            Ok(days) if days >= 1 => Ok(()),
            _ => Err(anyhow!("{} must be a whole number of days, at least 1", key)),
        },
        DEMURRAGE_RATE => match value.parse::<Decimal>() {
            Ok(rate) if rate >= Decimal::ZERO && rate <= Decimal::ONE => Ok(()),
            _ => Err(anyhow!("{} must be a fraction between 0 and 1", key)),
        },
        EXCHANGE_RATE | WELCOME_BONUS_AMOUNT | GRACE_CREDIT_LIMIT => {
            match value.parse::<Decimal>() {
                Ok(number) if number >= Decimal::ZERO && number <= MAX_AMOUNT => Ok(()),
                _ => Err(anyhow!("{} must be a number between 0 and {}", key, MAX_AMOUNT)),
            }
        }
        _ if value.is_empty() => Err(anyhow!("{} cannot be empty", key)),
        _ => Ok(()),
    }
}

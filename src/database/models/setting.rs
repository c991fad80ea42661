use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Executor, Sqlite};

pub const DEMURRAGE_ENABLED: &str = "demurrage_enabled";
pub const DEMURRAGE_RATE: &str = "demurrage_rate";
pub const DEMURRAGE_INTERVAL_DAYS: &str = "demurrage_interval_days";
pub const DEMURRAGE_LAST_RUN: &str = "demurrage_last_run";
pub const EXCHANGE_RATE: &str = "exchange_rate";
pub const WELCOME_BONUS_AMOUNT: &str = "welcome_bonus_amount";
pub const GRACE_CREDIT_LIMIT: &str = "grace_credit_limit";
pub const DEFAULT_REMINDER_TEXT_KEY: &str = "default_reminder_text";
pub const WELCOME_MESSAGE: &str = "welcome_message";

pub const DEFAULT_REMINDER_TEXT: &str =
    "Reminder: {event_name} starts on {start_date} at {start_time}. \
     Cost: {cost} {currency_symbol}. {link}";
pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Welcome! Your account is open. Use /help to see what you can do.";

/// Date format of `demurrage_last_run`.
pub const SETTING_DATE_FORMAT: &str = "%Y-%m-%d";

/// Every key the bot understands, with its default value.
pub const KNOWN_SETTINGS: [(&str, &str); 9] = [
    (DEMURRAGE_ENABLED, "0"),
    (DEMURRAGE_RATE, "0.01"),
    (DEMURRAGE_INTERVAL_DAYS, "1"),
    (DEMURRAGE_LAST_RUN, "1970-01-01"),
    (EXCHANGE_RATE, "1.0"),
    (WELCOME_BONUS_AMOUNT, "1000"),
    (GRACE_CREDIT_LIMIT, "0"),
    (DEFAULT_REMINDER_TEXT_KEY, DEFAULT_REMINDER_TEXT),
    (WELCOME_MESSAGE, DEFAULT_WELCOME_MESSAGE),
];

#[derive(Debug, thiserror::Error)]
#[error("setting '{key}' has invalid value '{value}'")]
pub struct MalformedSetting {
    pub key: String,
    pub value: String,
}

/// Read-through access to the flat `settings` table.
pub struct Setting;

impl Setting {
    pub fn default_for(key: &str) -> Option<&'static str> {
        KNOWN_SETTINGS
            .iter()
            .find(|(known, _)| *known == key)
            .map(|(_, value)| *value)
    }

    pub fn is_known(key: &str) -> bool {
        Self::default_for(key).is_some()
    }

    /// Returns the stored value, or the key's default if the row is missing.
    pub async fn get<'e, E>(executor: E, key: &str) -> Result<Option<String>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let stored = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(executor)
            .await?;

        Ok(stored.or_else(|| Self::default_for(key).map(str::to_string)))
    }

    pub async fn set<'e, E>(executor: E, key: &str, value: &str) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value"
        )
        .bind(key)
        .bind(value)
        .execute(executor)
        .await?;
        Ok(())
    }
}

pub fn parse_decimal(key: &str, raw: Option<String>) -> Result<Decimal, MalformedSetting> {
    let raw = raw.unwrap_or_default();
    raw.trim().parse().map_err(|_| MalformedSetting {
        key: key.to_string(),
        value: raw.clone(),
    })
}

pub fn parse_int(key: &str, raw: Option<String>) -> Result<i64, MalformedSetting> {
    let raw = raw.unwrap_or_default();
    raw.trim().parse().map_err(|_| MalformedSetting {
        key: key.to_string(),
        value: raw.clone(),
    })
}

pub fn parse_flag(key: &str, raw: Option<String>) -> Result<bool, MalformedSetting> {
    match raw.as_deref().map(str::trim) {
        Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") | None => Ok(false),
        Some(other) => Err(MalformedSetting {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}

pub fn parse_date(key: &str, raw: Option<String>) -> Result<NaiveDate, MalformedSetting> {
    let raw = raw.unwrap_or_default();
    NaiveDate::parse_from_str(raw.trim(), SETTING_DATE_FORMAT).map_err(|_| MalformedSetting {
        key: key.to_string(),
        value: raw.clone(),
    })
}

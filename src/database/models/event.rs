use chrono::{DateTime, FixedOffset, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, FromRow, QueryBuilder, Row, Sqlite};
use std::fmt;
use std::str::FromStr;

use super::{
    decimal_column, invalid_value, optional_offset_column, optional_utc_column, timestamp_to_sql,
};

const EVENT_SELECT: &str = "SELECT e.id, e.activity_id, a.name AS activity_name, \
    a.description AS activity_description, e.name, e.description, e.event_type, \
    e.event_date, e.weekday, e.event_time, e.cost, e.link, e.reminder_minutes, \
    e.reminder_text, e.created_by, e.is_active, e.last_run \
    FROM events e JOIN activities a ON a.id = e.activity_id";

pub const EVENT_TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Single,
    Recurring,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Single => "single",
            EventType::Recurring => "recurring",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(EventType::Single),
            "recurring" => Ok(EventType::Recurring),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}

/// Maps the stored weekday index (0 = Monday) to a [`Weekday`].
pub fn weekday_from_index(index: i64) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// A well-formed schedule. Writing one always sets all four schedule columns,
/// so the stored fields stay consistent with `event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Single(DateTime<FixedOffset>),
    Weekly { weekday: Weekday, time: NaiveTime },
}

impl Schedule {
    pub fn event_type(&self) -> EventType {
        match self {
            Schedule::Single(_) => EventType::Single,
            Schedule::Weekly { .. } => EventType::Recurring,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub activity_id: i64,
    pub activity_name: String,
    pub activity_description: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub event_type: EventType,
    pub event_date: Option<DateTime<FixedOffset>>,
    pub weekday: Option<i64>,
    pub event_time: Option<NaiveTime>,
    pub cost: Decimal,
    pub link: Option<String>,
    pub reminder_minutes: i64,
    pub reminder_text: Option<String>,
    pub created_by: Option<i64>,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for Event {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_type: String = row.try_get("event_type")?;
        let event_type = raw_type
            .parse()
            .map_err(|_| invalid_value("event_type", &raw_type))?;

        let raw_time: Option<String> = row.try_get("event_time")?;
        let event_time = match raw_time {
            Some(raw) => Some(
                NaiveTime::parse_from_str(&raw, EVENT_TIME_FORMAT)
                    .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
                    .map_err(|_| invalid_value("event_time", &raw))?,
            ),
            None => None,
        };

        Ok(Self {
            id: row.try_get("id")?,
            activity_id: row.try_get("activity_id")?,
            activity_name: row.try_get("activity_name")?,
            activity_description: row.try_get("activity_description")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            event_type,
            event_date: optional_offset_column(row, "event_date")?,
            weekday: row.try_get("weekday")?,
            event_time,
            cost: decimal_column(row, "cost")?,
            link: row.try_get("link")?,
            reminder_minutes: row.try_get("reminder_minutes")?,
            reminder_text: row.try_get("reminder_text")?,
            created_by: row.try_get("created_by")?,
            is_active: row.try_get("is_active")?,
            last_run: optional_utc_column(row, "last_run")?,
        })
    }
}

impl Event {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.activity_name)
    }

    pub fn display_description(&self) -> &str {
        self.description
            .as_deref()
            .filter(|description| !description.trim().is_empty())
            .unwrap_or(&self.activity_description)
    }

    pub fn schedule(&self) -> Option<Schedule> {
        match self.event_type {
            EventType::Single => self.event_date.map(Schedule::Single),
            EventType::Recurring => {
                let weekday = weekday_from_index(self.weekday?)?;
                let time = self.event_time?;
                Some(Schedule::Weekly { weekday, time })
            }
        }
    }

    pub async fn create<'e, E>(executor: E, event: &NewEvent) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let (event_date, weekday, event_time) = schedule_columns(&event.schedule);

        let result = sqlx::query(
            r#"
            INSERT INTO events (activity_id, name, description, event_type, event_date, weekday,
                                event_time, cost, link, reminder_minutes, reminder_text, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(event.activity_id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.schedule.event_type().as_str())
        .bind(event_date)
        .bind(weekday)
        .bind(event_time)
        .bind(event.cost.normalize().to_string())
        .bind(&event.link)
        .bind(event.reminder_minutes)
        .bind(&event.reminder_text)
        .bind(event.created_by)
        .execute(executor)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Event>(&format!("{EVENT_SELECT} WHERE e.id = ?"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_active<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Event>(&format!("{EVENT_SELECT} WHERE e.is_active = 1 ORDER BY e.id"))
            .fetch_all(executor)
            .await
    }

    pub async fn list_for_activity<'e, E>(
        executor: E,
        activity_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Event>(&format!(
            "{EVENT_SELECT} WHERE e.activity_id = ? AND e.is_active = 1 ORDER BY e.id"
        ))
        .bind(activity_id)
        .fetch_all(executor)
        .await
    }

    /// Applies the non-empty fields of `changes`. Returns `false` if nothing
    /// was changed or the event does not exist.
    pub async fn update<'e, E>(
        executor: E,
        id: i64,
        changes: &EventChanges,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if changes.is_empty() {
            return Ok(false);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE events SET ");
        {
            let mut fields = builder.separated(", ");
            if let Some(name) = &changes.name {
                fields.push("name = ").push_bind_unseparated(name.clone());
            }
            if let Some(description) = &changes.description {
                fields.push("description = ").push_bind_unseparated(description.clone());
            }
            if let Some(schedule) = &changes.schedule {
                let (event_date, weekday, event_time) = schedule_columns(schedule);
                fields.push("event_type = ").push_bind_unseparated(schedule.event_type().as_str());
                fields.push("event_date = ").push_bind_unseparated(event_date);
                fields.push("weekday = ").push_bind_unseparated(weekday);
                fields.push("event_time = ").push_bind_unseparated(event_time);
            }
            if let Some(cost) = changes.cost {
                fields.push("cost = ").push_bind_unseparated(cost.normalize().to_string());
            }
            if let Some(link) = &changes.link {
                fields.push("link = ").push_bind_unseparated(link.clone());
            }
            if let Some((minutes, text)) = &changes.reminder {
                fields.push("reminder_minutes = ").push_bind_unseparated(*minutes);
                fields.push("reminder_text = ").push_bind_unseparated(text.clone());
            }
            if let Some(is_active) = changes.is_active {
                fields.push("is_active = ").push_bind_unseparated(is_active);
            }
            if let Some(last_run) = changes.last_run {
                fields.push("last_run = ").push_bind_unseparated(timestamp_to_sql(last_run));
            }
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder.build().execute(executor).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub activity_id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Schedule,
    pub cost: Decimal,
    pub link: Option<String>,
    pub reminder_minutes: i64,
    pub reminder_text: Option<String>,
    pub created_by: Option<i64>,
}

impl NewEvent {
    pub fn new(activity_id: i64, schedule: Schedule, cost: Decimal) -> Self {
        Self {
            activity_id,
            name: None,
            description: None,
            schedule,
            cost,
            link: None,
            reminder_minutes: 0,
            reminder_text: None,
            created_by: None,
        }
    }
}

/// A partial update of an event. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct EventChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<Schedule>,
    pub cost: Option<Decimal>,
    pub link: Option<String>,
    /// Lead time in minutes and template; `(0, None)` disables the reminder.
    pub reminder: Option<(i64, Option<String>)>,
    pub is_active: Option<bool>,
    pub last_run: Option<DateTime<Utc>>,
}

impl EventChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.schedule.is_none()
            && self.cost.is_none()
            && self.link.is_none()
            && self.reminder.is_none()
            && self.is_active.is_none()
            && self.last_run.is_none()
    }

    pub fn affects_schedule(&self) -> bool {
        self.schedule.is_some() || self.reminder.is_some() || self.is_active.is_some()
    }
}

fn schedule_columns(schedule: &Schedule) -> (Option<String>, Option<i64>, Option<String>) {
    match schedule {
        Schedule::Single(at) => (Some(at.to_rfc3339()), None, None),
        Schedule::Weekly { weekday, time } => (
            None,
            Some(i64::from(weekday.num_days_from_monday())),
            Some(time.format(EVENT_TIME_FORMAT).to_string()),
        ),
    }
}

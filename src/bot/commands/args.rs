//! Argument parsing for single-line commands. Everything here is pure so the
//! handlers only deal with typed values.

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;

use crate::utils::datetime::{parse_date, parse_time};
use crate::utils::validation::{
    validate_activity_name, validate_amount, validate_cost, validate_id, validate_link,
    validate_reminder_minutes, validate_title, validate_username, validate_weekday,
};

pub const MONEY_USAGE: &str = "@user amount [comment]";
pub const ONCE_USAGE: &str = "/eventonce activity_id DD.MM.YYYY HH:MM cost";
pub const WEEKLY_USAGE: &str = "/eventweekly activity_id weekday(0-6) HH:MM cost";
pub const REMINDER_USAGE: &str = "/eventreminder event_id minutes [template]";
pub const SETTING_USAGE: &str = "/setting key value";
pub const EDIT_EVENT_USAGE: &str = "/editevent event_id name|description|active|schedule value \
(schedule once DD.MM.YYYY HH:MM, schedule weekly weekday(0-6) HH:MM, active 0|1)";
pub const EDIT_ACTIVITY_USAGE: &str =
    "/editactivity activity_id name|description|end value (end DD.MM.YYYY or none)";

#[derive(Debug, Clone, PartialEq)]
pub struct MoneyArgs {
    pub username: String,
    pub amount: Decimal,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivityArgs {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnceEventArgs {
    pub activity_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyEventArgs {
    pub activity_id: i64,
    pub weekday: i64,
    pub time: NaiveTime,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderArgs {
    pub event_id: i64,
    pub minutes: i64,
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventEdit {
    Name(String),
    Description(String),
    Once { date: NaiveDate, time: NaiveTime },
    Weekly { weekday: i64, time: NaiveTime },
    Active(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditEventArgs {
    pub event_id: i64,
    pub edit: EventEdit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEdit {
    Name(String),
    Description(String),
    EndDate(Option<NaiveDate>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditActivityArgs {
    pub activity_id: i64,
    pub edit: ActivityEdit,
}

/// Splits off the first `n` whitespace-separated words and returns them with
/// the untouched remainder.
fn split_words(input: &str, n: usize) -> (Vec<&str>, &str) {
    let mut words = Vec::with_capacity(n);
    let mut rest = input.trim_start();
    while words.len() < n {
        if rest.is_empty() {
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        words.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (words, rest.trim_end())
}

fn optional_text(rest: &str) -> Option<String> {
    (!rest.is_empty()).then(|| rest.to_string())
}

/// `@user amount [comment]`
pub fn parse_money_args(input: &str) -> Result<MoneyArgs> {
    let (words, rest) = split_words(input, 2);
    let [user, amount] = words.as_slice() else {
        return Err(anyhow!("Expected a user and an amount"));
    };

    Ok(MoneyArgs {
        username: validate_username(user)?,
        amount: validate_amount(amount)?,
        comment: optional_text(rest),
    })
}

/// `name [| description]`
pub fn parse_new_activity(input: &str) -> Result<NewActivityArgs> {
    let (name, description) = match input.split_once('|') {
        Some((name, description)) => (name.trim(), description.trim()),
        None => (input.trim(), ""),
    };
    validate_activity_name(name)?;

    Ok(NewActivityArgs {
        name: name.to_string(),
        description: description.to_string(),
    })
}

pub fn parse_once_event(input: &str) -> Result<OnceEventArgs> {
    let (words, rest) = split_words(input, 4);
    let [activity, date, time, cost] = words.as_slice() else {
        return Err(anyhow!("Expected activity, date, time and cost"));
    };
    if !rest.is_empty() {
        return Err(anyhow!("Unexpected text after the cost: '{}'", rest));
    }

    Ok(OnceEventArgs {
        activity_id: validate_id(activity, "Activity")?,
        date: parse_date(date)?,
        time: parse_time(time)?,
        cost: validate_cost(cost)?,
    })
}

pub fn parse_weekly_event(input: &str) -> Result<WeeklyEventArgs> {
    let (words, rest) = split_words(input, 4);
    let [activity, weekday, time, cost] = words.as_slice() else {
        return Err(anyhow!("Expected activity, weekday, time and cost"));
    };
    if !rest.is_empty() {
        return Err(anyhow!("Unexpected text after the cost: '{}'", rest));
    }

    Ok(WeeklyEventArgs {
        activity_id: validate_id(activity, "Activity")?,
        weekday: validate_weekday(weekday)?,
        time: parse_time(time)?,
        cost: validate_cost(cost)?,
    })
}

/// `id minutes [template]`; a template of `.` selects the default one.
pub fn parse_reminder(input: &str) -> Result<ReminderArgs> {
    let (words, rest) = split_words(input, 2);
    let [event, minutes] = words.as_slice() else {
        return Err(anyhow!("Expected an event id and a lead time in minutes"));
    };

    Ok(ReminderArgs {
        event_id: validate_id(event, "Event")?,
        minutes: validate_reminder_minutes(minutes)?,
        template: optional_text(rest),
    })
}

pub fn parse_event_cost(input: &str) -> Result<(i64, Decimal)> {
    let (words, _) = split_words(input, 2);
    let [event, cost] = words.as_slice() else {
        return Err(anyhow!("Expected an event id and a cost"));
    };
    Ok((validate_id(event, "Event")?, validate_cost(cost)?))
}

pub fn parse_event_link(input: &str) -> Result<(i64, String)> {
    let (words, _) = split_words(input, 2);
    let [event, link] = words.as_slice() else {
        return Err(anyhow!("Expected an event id and a link"));
    };
    validate_link(link)?;
    Ok((validate_id(event, "Event")?, link.to_string()))
}

/// `id field value...`, shared by the edit commands.
fn split_edit<'a>(input: &'a str, what: &str) -> Result<(i64, String, &'a str)> {
    let (words, rest) = split_words(input, 2);
    let [id, field] = words.as_slice() else {
        return Err(anyhow!("Expected {} id, a field and a value", what.to_lowercase()));
    };
    Ok((validate_id(id, what)?, field.to_lowercase(), rest))
}

fn parse_schedule_edit(input: &str) -> Result<EventEdit> {
    let (words, rest) = split_words(input, 3);
    if !rest.is_empty() {
        return Err(anyhow!("Unexpected text after the time: '{}'", rest));
    }
    match words.as_slice() {
        ["once", date, time] => Ok(EventEdit::Once {
            date: parse_date(date)?,
            time: parse_time(time)?,
        }),
        ["weekly", weekday, time] => Ok(EventEdit::Weekly {
            weekday: validate_weekday(weekday)?,
            time: parse_time(time)?,
        }),
        _ => Err(anyhow!(
            "Schedule must be 'once DD.MM.YYYY HH:MM' or 'weekly weekday HH:MM'"
        )),
    }
}

pub fn parse_edit_event(input: &str) -> Result<EditEventArgs> {
    let (event_id, field, value) = split_edit(input, "Event")?;

    let edit = match field.as_str() {
        "name" => {
            validate_title(value, "Event name")?;
            EventEdit::Name(value.to_string())
        }
        "description" => EventEdit::Description(value.to_string()),
        "schedule" => parse_schedule_edit(value)?,
        "active" => match value {
            "1" | "on" | "yes" => EventEdit::Active(true),
            "0" | "off" | "no" => EventEdit::Active(false),
            _ => return Err(anyhow!("active must be 0 or 1")),
        },
        other => return Err(anyhow!("Unknown event field '{}'", other)),
    };

    Ok(EditEventArgs { event_id, edit })
}

pub fn parse_edit_activity(input: &str) -> Result<EditActivityArgs> {
    let (activity_id, field, value) = split_edit(input, "Activity")?;

    let edit = match field.as_str() {
        "name" => {
            validate_activity_name(value)?;
            ActivityEdit::Name(value.to_string())
        }
        "description" => ActivityEdit::Description(value.to_string()),
        "end" => match value.to_lowercase().as_str() {
            "none" | "-" => ActivityEdit::EndDate(None),
            _ => ActivityEdit::EndDate(Some(parse_date(value)?)),
        },
        other => return Err(anyhow!("Unknown activity field '{}'", other)),
    };

    Ok(EditActivityArgs { activity_id, edit })
}

/// `@user`
pub fn parse_username_arg(input: &str) -> Result<String> {
    let (words, rest) = split_words(input, 1);
    match (words.first(), rest.is_empty()) {
        (Some(user), true) => validate_username(user),
        _ => Err(anyhow!("Expected exactly one @user")),
    }
}

/// `key value...`; the value keeps its inner spaces.
pub fn parse_setting(input: &str) -> Result<(String, String)> {
    let (words, rest) = split_words(input, 1);
    match (words.first(), rest.is_empty()) {
        (Some(key), false) => Ok((key.to_lowercase(), rest.to_string())),
        _ => Err(anyhow!("Expected a setting key and a value")),
    }
}

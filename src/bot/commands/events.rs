use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use teloxide::prelude::*;

use super::args::{
    parse_edit_event, parse_event_cost, parse_event_link, parse_once_event, parse_reminder,
    parse_weekly_event, EventEdit, EDIT_EVENT_USAGE, ONCE_USAGE, REMINDER_USAGE, WEEKLY_USAGE,
};
use crate::bot::handlers::BotContext;
use crate::database::models::{
    weekday_from_index, Activity, Event, EventChanges, NewEvent, Schedule, User,
    GENERAL_ACTIVITY_ID,
};
use crate::services::event_payment::{render_template, ReminderContext};
use crate::services::recurrence::next_for_event;
use crate::utils::datetime::{describe_schedule, format_amount, format_datetime, local_datetime};
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::{log_command_success, log_validation_error};
use crate::utils::validation::validate_id;

pub async fn handle_events(feedback: &CommandFeedback, ctx: &BotContext) -> ResponseResult<()> {
    let events = match Event::list_active(&ctx.db.pool).await {
        Ok(events) => events,
        Err(e) => {
            tracing::error!("Failed to list events: {}", e);
            feedback.generic_failure().await?;
            return Ok(());
        }
    };

    let now = ctx.scheduler.now();
    let mut upcoming: Vec<_> = events
        .iter()
        .filter_map(|event| next_for_event(event, now).map(|next| (next, event)))
        .collect();
    upcoming.sort_by_key(|(next, _)| *next);

    if upcoming.is_empty() {
        feedback.info("No upcoming events.").await?;
        return Ok(());
    }

    let tz = ctx.scheduler.timezone();
    let mut text = String::from("Upcoming events:\n");
    for (next, event) in upcoming {
        text.push_str(&format!(
            "\n#{} {} ({})\n   {}, next: {}\n   Cost: {} {}",
            event.id,
            event.display_name(),
            event.activity_name,
            describe_schedule(event, tz),
            format_datetime(&next),
            format_amount(event.cost),
            ctx.currency_symbol
        ));
        if let Some(link) = &event.link {
            text.push_str(&format!("\n   {link}"));
        }
    }

    feedback.info(&text).await?;
    Ok(())
}

pub async fn handle_event_once(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
    args: &str,
) -> ResponseResult<()> {
    let parsed = match parse_once_event(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            log_validation_error("eventonce", "args", args, &e.to_string(), user.telegram_id);
            feedback.validation_error(&e.to_string(), ONCE_USAGE).await?;
            return Ok(());
        }
    };

    let tz = ctx.scheduler.timezone();
    let start = match local_datetime(parsed.date, parsed.time, tz) {
        Ok(start) => start,
        Err(e) => {
            feedback.validation_error(&e.to_string(), ONCE_USAGE).await?;
            return Ok(());
        }
    };
    if start <= ctx.scheduler.now() {
        feedback
            .validation_error("The event must start in the future", ONCE_USAGE)
            .await?;
        return Ok(());
    }

    create_event(
        feedback,
        ctx,
        user,
        parsed.activity_id,
        Schedule::Single(start),
        parsed.cost,
    )
    .await
}

pub async fn handle_event_weekly(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
    args: &str,
) -> ResponseResult<()> {
    let parsed = match parse_weekly_event(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            log_validation_error("eventweekly", "args", args, &e.to_string(), user.telegram_id);
            feedback.validation_error(&e.to_string(), WEEKLY_USAGE).await?;
            return Ok(());
        }
    };

    let Some(weekday) = weekday_from_index(parsed.weekday) else {
        feedback
            .validation_error("Weekday must be a number from 0 to 6", WEEKLY_USAGE)
            .await?;
        return Ok(());
    };

    create_event(
        feedback,
        ctx,
        user,
        parsed.activity_id,
        Schedule::Weekly {
            weekday,
            time: parsed.time,
        },
        parsed.cost,
    )
    .await
}

async fn create_event(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
    activity_id: i64,
    schedule: Schedule,
    cost: Decimal,
) -> ResponseResult<()> {
    let activity = match Activity::find_by_id(&ctx.db.pool, activity_id).await {
        Ok(Some(activity)) if activity.is_active => activity,
        Ok(_) => {
            feedback
                .error(&format!("Activity {activity_id} was not found."))
                .await?;
            return Ok(());
        }
        Err(e) => {
            tracing::error!("Failed to load activity {}: {}", activity_id, e);
            feedback.generic_failure().await?;
            return Ok(());
        }
    };

    let mut new_event = NewEvent::new(activity.id, schedule, cost);
    new_event.created_by = Some(user.id);

    let event_id = match Event::create(&ctx.db.pool, &new_event).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Failed to create event for activity {}: {}", activity.id, e);
            feedback.generic_failure().await?;
            return Ok(());
        }
    };

    if activity_id == GENERAL_ACTIVITY_ID && cost > Decimal::ZERO {
        feedback
            .warning(&format!(
                "Event #{event_id} belongs to the general activity: \
                 every member will be charged {} {}.",
                format_amount(cost),
                ctx.currency_symbol
            ))
            .await?;
    }

    match ctx.scheduler.arm_by_id(event_id).await {
        Ok(Some(next)) => {
            feedback
                .success(&format!(
                    "Event #{} created for {}. Next run: {}.",
                    event_id,
                    activity.name,
                    format_datetime(&next)
                ))
                .await?;
        }
        Ok(None) => {
            feedback
                .warning(&format!(
                    "Event #{event_id} was created but has no upcoming run, \
                     so nothing was scheduled."
                ))
                .await?;
        }
        Err(e) => {
            tracing::error!("Failed to schedule event {}: {}", event_id, e);
            feedback
                .error(&format!("Event #{event_id} was created but could not be scheduled: {e}"))
                .await?;
            return Ok(());
        }
    }

    log_command_success(
        "event",
        &user.display_name(),
        user.telegram_id,
        Some(&format!("event {event_id} in activity {activity_id}")),
    );
    Ok(())
}

/// Checks that a reminder template only uses known placeholders.
fn check_template(template: &str, tz: FixedOffset) -> Result<(), String> {
    let sample = ReminderContext {
        event_name: "Sample".to_string(),
        event_description: String::new(),
        start: Some(chrono::Utc::now().with_timezone(&tz)),
        cost: Decimal::ZERO,
        currency_symbol: String::new(),
        reminder_minutes: 0,
        link: String::new(),
    };
    render_template(template, &sample).map(|_| ()).map_err(|e| e.to_string())
}

pub async fn handle_event_reminder(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let parsed = match parse_reminder(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback.validation_error(&e.to_string(), REMINDER_USAGE).await?;
            return Ok(());
        }
    };

    // "." resets to the default template.
    let template = parsed.template.filter(|text| text.trim() != ".");
    if let Some(text) = &template {
        if let Err(e) = check_template(text, ctx.scheduler.timezone()) {
            feedback
                .validation_error(&format!("Invalid template: {e}"), REMINDER_USAGE)
                .await?;
            return Ok(());
        }
    }

    let changes = EventChanges {
        reminder: Some((parsed.minutes, template)),
        ..Default::default()
    };
    let message = if parsed.minutes == 0 {
        format!("Reminder for event #{} turned off.", parsed.event_id)
    } else {
        format!(
            "Reminder for event #{} set to {} minutes before the start.",
            parsed.event_id, parsed.minutes
        )
    };
    apply_changes(feedback, ctx, parsed.event_id, changes, &message).await
}

pub async fn handle_event_cost(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let (event_id, cost) = match parse_event_cost(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback.validation_error(&e.to_string(), "/eventcost event_id cost").await?;
            return Ok(());
        }
    };

    let changes = EventChanges {
        cost: Some(cost),
        ..Default::default()
    };
    let message = format!(
        "Event #{} now costs {} {}.",
        event_id,
        format_amount(cost),
        ctx.currency_symbol
    );
    apply_changes(feedback, ctx, event_id, changes, &message).await
}

pub async fn handle_event_link(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let (event_id, link) = match parse_event_link(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback.validation_error(&e.to_string(), "/eventlink event_id url").await?;
            return Ok(());
        }
    };

    let changes = EventChanges {
        link: Some(link),
        ..Default::default()
    };
    let message = format!("Link for event #{event_id} updated.");
    apply_changes(feedback, ctx, event_id, changes, &message).await
}

/// Turns one edited field into stored changes. A one-off date must lie
/// after `now`.
fn edit_to_changes(edit: EventEdit, now: DateTime<FixedOffset>) -> Result<EventChanges, String> {
    let mut changes = EventChanges::default();
    match edit {
        EventEdit::Name(name) => changes.name = Some(name.trim().to_string()),
        EventEdit::Description(description) => {
            changes.description = Some(description.trim().to_string())
        }
        EventEdit::Once { date, time } => {
            let start = local_datetime(date, time, now.timezone()).map_err(|e| e.to_string())?;
            if start <= now {
                return Err("The event must start in the future".to_string());
            }
            changes.schedule = Some(Schedule::Single(start));
        }
        EventEdit::Weekly { weekday, time } => {
            let weekday =
                weekday_from_index(weekday).ok_or("Weekday must be a number from 0 to 6")?;
            changes.schedule = Some(Schedule::Weekly { weekday, time });
        }
        EventEdit::Active(active) => changes.is_active = Some(active),
    }
    Ok(changes)
}

pub async fn handle_edit_event(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let parsed = match parse_edit_event(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback.validation_error(&e.to_string(), EDIT_EVENT_USAGE).await?;
            return Ok(());
        }
    };

    let message = match &parsed.edit {
        EventEdit::Name(_) => format!("Event #{} renamed.", parsed.event_id),
        EventEdit::Description(_) => format!("Description of event #{} updated.", parsed.event_id),
        EventEdit::Once { .. } | EventEdit::Weekly { .. } => {
            format!("Event #{} rescheduled.", parsed.event_id)
        }
        EventEdit::Active(true) => format!("Event #{} is active again.", parsed.event_id),
        EventEdit::Active(false) => format!("Event #{} is paused.", parsed.event_id),
    };

    let changes = match edit_to_changes(parsed.edit, ctx.scheduler.now()) {
        Ok(changes) => changes,
        Err(e) => {
            feedback.validation_error(&e, EDIT_EVENT_USAGE).await?;
            return Ok(());
        }
    };
    apply_changes(feedback, ctx, parsed.event_id, changes, &message).await
}

/// Stores `changes` and re-arms the event so its jobs follow the new values.
async fn apply_changes(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    event_id: i64,
    changes: EventChanges,
    success: &str,
) -> ResponseResult<()> {
    match Event::update(&ctx.db.pool, event_id, &changes).await {
        Ok(true) => {}
        Ok(false) => {
            feedback.error(&format!("Event #{event_id} was not found.")).await?;
            return Ok(());
        }
        Err(e) => {
            tracing::error!("Failed to update event {}: {}", event_id, e);
            feedback.generic_failure().await?;
            return Ok(());
        }
    }

    if let Err(e) = ctx.scheduler.arm_by_id(event_id).await {
        tracing::error!("Failed to re-arm event {}: {}", event_id, e);
        feedback
            .error(&format!("Event #{event_id} was updated but could not be rescheduled: {e}"))
            .await?;
        return Ok(());
    }

    feedback.success(success).await?;
    Ok(())
}

pub async fn handle_delete_event(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let event_id = match validate_id(args, "Event") {
        Ok(id) => id,
        Err(e) => {
            feedback.validation_error(&e.to_string(), "/deleteevent event_id").await?;
            return Ok(());
        }
    };

    if let Err(e) = ctx.scheduler.disarm(event_id).await {
        tracing::error!("Failed to disarm event {}: {}", event_id, e);
        feedback
            .error(&format!("Event #{event_id} could not be unscheduled: {e}"))
            .await?;
        return Ok(());
    }

    match Event::delete(&ctx.db.pool, event_id).await {
        Ok(true) => {
            feedback.success(&format!("Event #{event_id} deleted.")).await?;
        }
        Ok(false) => {
            feedback.error(&format!("Event #{event_id} was not found.")).await?;
        }
        Err(e) => {
            tracing::error!("Failed to delete event {}: {}", event_id, e);
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

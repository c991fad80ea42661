use teloxide::prelude::*;

use super::args::{parse_edit_activity, parse_new_activity, ActivityEdit, EDIT_ACTIVITY_USAGE};
use crate::bot::handlers::BotContext;
use crate::database::models::{Activity, ActivityChanges, User};
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::{log_command_error, log_command_success};
use crate::utils::validation::validate_id;

pub async fn handle_activities(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
) -> ResponseResult<()> {
    let (activities, subscribed) = match tokio::try_join!(
        Activity::list_active(&ctx.db.pool),
        Activity::subscribed_ids(&ctx.db.pool, user.id)
    ) {
        Ok(found) => found,
        Err(e) => {
            log_command_error("activities", &user.display_name(), user.telegram_id, &e.to_string());
            feedback.generic_failure().await?;
            return Ok(());
        }
    };

    if activities.is_empty() {
        feedback.info("There are no activities yet.").await?;
        return Ok(());
    }

    let mut text = String::from("Activities:\n");
    for activity in &activities {
        let mark = if activity.is_general() || subscribed.contains(&activity.id) {
            "✅"
        } else {
            "▫️"
        };
        text.push_str(&format!("\n{} {}. {}", mark, activity.id, activity.name));
        if !activity.description.is_empty() {
            text.push_str(&format!(": {}", activity.description));
        }
    }
    text.push_str("\n\nUse /subscribe id or /unsubscribe id.");

    feedback.info(&text).await?;
    Ok(())
}

/// Looks up an active activity by the id typed after a command.
async fn resolve_activity(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
    usage: &str,
) -> ResponseResult<Option<Activity>> {
    let id = match validate_id(args, "Activity") {
        Ok(id) => id,
        Err(e) => {
            feedback.validation_error(&e.to_string(), usage).await?;
            return Ok(None);
        }
    };

    match Activity::find_by_id(&ctx.db.pool, id).await {
        Ok(Some(activity)) if activity.is_active => Ok(Some(activity)),
        Ok(_) => {
            feedback.error(&format!("Activity {id} was not found.")).await?;
            Ok(None)
        }
        Err(e) => {
            tracing::error!("Failed to load activity {}: {}", id, e);
            feedback.generic_failure().await?;
            Ok(None)
        }
    }
}

pub async fn handle_subscribe(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
    args: &str,
) -> ResponseResult<()> {
    let usage = "/subscribe activity_id";
    let Some(activity) = resolve_activity(feedback, ctx, args, usage).await? else {
        return Ok(());
    };

    if activity.is_general() {
        feedback
            .info("Everyone is always subscribed to the general activity.")
            .await?;
        return Ok(());
    }

    match Activity::subscribe(&ctx.db.pool, user.id, activity.id).await {
        Ok(true) => {
            feedback
                .success(&format!("Subscribed to {}.", activity.name))
                .await?;
            let name = Some(activity.name.as_str());
            log_command_success("subscribe", &user.display_name(), user.telegram_id, name);
        }
        Ok(false) => {
            feedback
                .info(&format!("You are already subscribed to {}.", activity.name))
                .await?;
        }
        Err(e) => {
            log_command_error("subscribe", &user.display_name(), user.telegram_id, &e.to_string());
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

pub async fn handle_unsubscribe(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
    args: &str,
) -> ResponseResult<()> {
    let usage = "/unsubscribe activity_id";
    let Some(activity) = resolve_activity(feedback, ctx, args, usage).await? else {
        return Ok(());
    };

    if !Activity::allows_unsubscribe(activity.id) {
        feedback
            .error("You cannot leave the general activity.")
            .await?;
        return Ok(());
    }

    match Activity::unsubscribe(&ctx.db.pool, user.id, activity.id).await {
        Ok(true) => {
            feedback
                .success(&format!("Unsubscribed from {}.", activity.name))
                .await?;
            let name = Some(activity.name.as_str());
            log_command_success("unsubscribe", &user.display_name(), user.telegram_id, name);
        }
        Ok(false) => {
            feedback
                .info(&format!("You were not subscribed to {}.", activity.name))
                .await?;
        }
        Err(e) => {
            let error = e.to_string();
            log_command_error("unsubscribe", &user.display_name(), user.telegram_id, &error);
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

pub async fn handle_new_activity(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let parsed = match parse_new_activity(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback
                .validation_error(&e.to_string(), "/newactivity name [| description]")
                .await?;
            return Ok(());
        }
    };

    match Activity::create(&ctx.db.pool, &parsed.name, &parsed.description, None).await {
        Ok(id) => {
            feedback
                .success(&format!("Activity {} created with id {}.", parsed.name, id))
                .await?;
        }
        Err(e) => {
            tracing::error!("Failed to create activity '{}': {}", parsed.name, e);
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

fn activity_changes(edit: ActivityEdit) -> ActivityChanges {
    match edit {
        ActivityEdit::Name(name) => ActivityChanges {
            name: Some(name),
            ..Default::default()
        },
        ActivityEdit::Description(description) => ActivityChanges {
            description: Some(description),
            ..Default::default()
        },
        ActivityEdit::EndDate(end_date) => ActivityChanges {
            end_date: Some(end_date),
            ..Default::default()
        },
    }
}

pub async fn handle_edit_activity(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let parsed = match parse_edit_activity(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback.validation_error(&e.to_string(), EDIT_ACTIVITY_USAGE).await?;
            return Ok(());
        }
    };

    let activity_id = parsed.activity_id;
    let message = match &parsed.edit {
        ActivityEdit::Name(name) => format!("Activity {activity_id} renamed to {}.", name.trim()),
        ActivityEdit::Description(_) => format!("Description of activity {activity_id} updated."),
        ActivityEdit::EndDate(Some(date)) => {
            format!("Activity {activity_id} now ends on {}.", date.format("%d.%m.%Y"))
        }
        ActivityEdit::EndDate(None) => format!("Activity {activity_id} no longer has an end date."),
    };

    match Activity::update(&ctx.db.pool, activity_id, &activity_changes(parsed.edit)).await {
        Ok(true) => {
            feedback.success(&message).await?;
        }
        Ok(false) => {
            feedback
                .error(&format!("Activity {activity_id} was not found."))
                .await?;
        }
        Err(e) => {
            tracing::error!("Failed to update activity {}: {}", activity_id, e);
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

pub async fn handle_delete_activity(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let usage = "/deleteactivity activity_id";
    let Some(activity) = resolve_activity(feedback, ctx, args, usage).await? else {
        return Ok(());
    };

    if !Activity::allows_delete(activity.id) {
        feedback.error("The general activity cannot be deleted.").await?;
        return Ok(());
    }

    // Jobs must not outlive the events removed with the activity.
    if let Err(e) = ctx.scheduler.disarm_activity(activity.id).await {
        tracing::error!("Failed to disarm events of activity {}: {}", activity.id, e);
        feedback
            .error(&format!(
                "Activity {} was not deleted: its events could not be unscheduled: {e}",
                activity.name
            ))
            .await?;
        return Ok(());
    }

    match Activity::delete(&ctx.db.pool, activity.id).await {
        Ok(true) => {
            feedback
                .success(&format!("Activity {} deleted.", activity.name))
                .await?;
        }
        Ok(false) => {
            feedback
                .error(&format!("Activity {} was not found.", activity.id))
                .await?;
        }
        Err(e) => {
            tracing::error!("Failed to delete activity {}: {}", activity.id, e);
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

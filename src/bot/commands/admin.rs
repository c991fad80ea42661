use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use teloxide::prelude::*;

use super::account::{render_history, HISTORY_LIMIT};
use super::args::{
    parse_money_args, parse_setting, parse_username_arg, MoneyArgs, MONEY_USAGE, SETTING_USAGE,
};
use super::report_ledger_error;
use crate::bot::handlers::BotContext;
use crate::database::models::{Setting, User};
use crate::services::demurrage::DemurrageOutcome;
use crate::services::ledger::LedgerError;
use crate::services::notifier::{money_notice, notify_user};
use crate::utils::datetime::format_amount;
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::log_command_success;
use crate::utils::validation::validate_setting;

/// Parses `@user amount [comment]` and loads the named member.
async fn resolve_target(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    command: &str,
    args: &str,
) -> ResponseResult<Option<(User, MoneyArgs)>> {
    let parsed = match parse_money_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback
                .validation_error(&e.to_string(), &format!("/{command} {MONEY_USAGE}"))
                .await?;
            return Ok(None);
        }
    };

    match User::find_by_username(&ctx.db.pool, &parsed.username).await {
        Ok(Some(user)) if !user.is_fund() => Ok(Some((user, parsed))),
        Ok(_) => {
            let missing = LedgerError::UserNotFound(format!("@{}", parsed.username));
            report_ledger_error(feedback, command, &missing).await?;
            Ok(None)
        }
        Err(e) => {
            report_ledger_error(feedback, command, &LedgerError::Database(e)).await?;
            Ok(None)
        }
    }
}

/// Tells the member an admin changed their balance.
async fn notify_target(
    ctx: &BotContext,
    user: &User,
    headline: &str,
    comment: Option<&str>,
    balance: Decimal,
) {
    let notice = money_notice(headline, comment, balance, &ctx.currency_symbol);
    notify_user(ctx.notifier.as_ref(), user, &notice).await;
}

pub async fn handle_add(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let Some((user, parsed)) = resolve_target(feedback, ctx, "add", args).await? else {
        return Ok(());
    };

    match ctx.ledger.credit(user.id, parsed.amount, parsed.comment.as_deref()).await {
        Ok(balance) => {
            feedback
                .success(&format!(
                    "Issued {} {} to {}. New balance: {} {}",
                    format_amount(parsed.amount),
                    ctx.currency_symbol,
                    user.display_name(),
                    format_amount(balance),
                    ctx.currency_symbol
                ))
                .await?;
            let headline = format!(
                "💰 You received {} {} from an admin.",
                format_amount(parsed.amount),
                ctx.currency_symbol
            );
            notify_target(ctx, &user, &headline, parsed.comment.as_deref(), balance).await;
            let amount = parsed.amount.to_string();
            log_command_success("add", &user.display_name(), user.telegram_id, Some(&amount));
            Ok(())
        }
        Err(e) => report_ledger_error(feedback, "add", &e).await,
    }
}

pub async fn handle_rem(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let Some((user, parsed)) = resolve_target(feedback, ctx, "rem", args).await? else {
        return Ok(());
    };

    match ctx.ledger.debit(user.id, parsed.amount, parsed.comment.as_deref()).await {
        Ok(balance) => {
            feedback
                .success(&format!(
                    "Removed {} {} from {}. New balance: {} {}",
                    format_amount(parsed.amount),
                    ctx.currency_symbol,
                    user.display_name(),
                    format_amount(balance),
                    ctx.currency_symbol
                ))
                .await?;
            let headline = format!(
                "An admin removed {} {} from your account.",
                format_amount(parsed.amount),
                ctx.currency_symbol
            );
            notify_target(ctx, &user, &headline, parsed.comment.as_deref(), balance).await;
            let amount = parsed.amount.to_string();
            log_command_success("rem", &user.display_name(), user.telegram_id, Some(&amount));
            Ok(())
        }
        Err(e) => report_ledger_error(feedback, "rem", &e).await,
    }
}

pub async fn handle_payfund(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let Some((user, parsed)) = resolve_target(feedback, ctx, "payfund", args).await? else {
        return Ok(());
    };

    match ctx
        .ledger
        .pay_from_fund(user.id, parsed.amount, parsed.comment.as_deref())
        .await
    {
        Ok(balance) => {
            feedback
                .success(&format!(
                    "Paid {} {} from the fund to {}. Their balance: {} {}",
                    format_amount(parsed.amount),
                    ctx.currency_symbol,
                    user.display_name(),
                    format_amount(balance),
                    ctx.currency_symbol
                ))
                .await?;
            let headline = format!(
                "💰 You received {} {} from the community fund.",
                format_amount(parsed.amount),
                ctx.currency_symbol
            );
            notify_target(ctx, &user, &headline, parsed.comment.as_deref(), balance).await;
            log_command_success(
                "payfund",
                &user.display_name(),
                user.telegram_id,
                Some(&parsed.amount.to_string()),
            );
            Ok(())
        }
        Err(LedgerError::InsufficientFunds { balance, .. }) => {
            feedback
                .error(&format!(
                    "The fund only holds {} {}.",
                    format_amount(balance),
                    ctx.currency_symbol
                ))
                .await?;
            Ok(())
        }
        Err(e) => report_ledger_error(feedback, "payfund", &e).await,
    }
}

pub async fn handle_topup(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let Some((user, parsed)) = resolve_target(feedback, ctx, "topup", args).await? else {
        return Ok(());
    };

    match ctx.ledger.top_up(user.id, parsed.amount, parsed.comment.as_deref()).await {
        Ok(credited) => {
            feedback
                .success(&format!(
                    "Credited {} {} to {} for an external payment of {}.",
                    format_amount(credited),
                    ctx.currency_symbol,
                    user.display_name(),
                    format_amount(parsed.amount)
                ))
                .await?;
            let credited = credited.to_string();
            log_command_success("topup", &user.display_name(), user.telegram_id, Some(&credited));
            Ok(())
        }
        Err(e) => report_ledger_error(feedback, "topup", &e).await,
    }
}

const CHECK_HISTORY_DAYS: i64 = 30;
const MEMBER_PAGE: usize = 20;

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn account_summary(user: &User, currency_symbol: &str) -> String {
    [
        format!("👤 {}", user.display_name()),
        format!("Balance: {} {}", format_amount(user.balance), currency_symbol),
        format!("Transactions: {}", user.transaction_count),
        format!("Grace credit in use: {}", yes_no(user.grace_credit_used)),
        format!("Admin: {}", yes_no(user.is_admin)),
        format!("Registered: {}", user.created_at.format("%d.%m.%Y")),
    ]
    .join("\n")
}

/// Newest members first, at most [`MEMBER_PAGE`] of them.
fn member_list(users: &[User], currency_symbol: &str) -> String {
    let mut text = format!("👥 Members: {}\n", users.len());
    for (position, user) in users.iter().take(MEMBER_PAGE).enumerate() {
        let admin_mark = if user.is_admin { "👮 " } else { "" };
        text.push_str(&format!(
            "\n{}. {}{}: {} {}, {} tx, since {}",
            position + 1,
            admin_mark,
            user.display_name(),
            format_amount(user.balance),
            currency_symbol,
            user.transaction_count,
            user.created_at.format("%d.%m.%Y")
        ));
    }
    if users.len() > MEMBER_PAGE {
        text.push_str(&format!("\n\nShowing the newest {} of {}.", MEMBER_PAGE, users.len()));
    }
    text
}

pub async fn handle_check(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let username = match parse_username_arg(args) {
        Ok(username) => username,
        Err(e) => {
            feedback.validation_error(&e.to_string(), "/check @user").await?;
            return Ok(());
        }
    };

    let user = match User::find_by_username(&ctx.db.pool, &username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let missing = LedgerError::UserNotFound(format!("@{username}"));
            return report_ledger_error(feedback, "check", &missing).await;
        }
        Err(e) => return report_ledger_error(feedback, "check", &LedgerError::Database(e)).await,
    };

    let since = Utc::now() - Duration::days(CHECK_HISTORY_DAYS);
    let entries = match ctx.ledger.history(user.id, since, HISTORY_LIMIT).await {
        Ok(entries) => entries,
        Err(e) => return report_ledger_error(feedback, "check", &e).await,
    };

    let mut text = account_summary(&user, &ctx.currency_symbol);
    if entries.is_empty() {
        text.push_str(&format!("\n\nNo transactions in the last {CHECK_HISTORY_DAYS} days."));
    } else {
        text.push_str(&format!("\n\nLast {CHECK_HISTORY_DAYS} days:"));
        text.push_str(&render_history(&entries, user.id, &ctx.currency_symbol));
    }

    feedback.info(&text).await?;
    Ok(())
}

pub async fn handle_users(feedback: &CommandFeedback, ctx: &BotContext) -> ResponseResult<()> {
    match User::list_members(&ctx.db.pool).await {
        Ok(users) if users.is_empty() => {
            feedback.info("There are no members yet.").await?;
        }
        Ok(users) => {
            feedback.info(&member_list(&users, &ctx.currency_symbol)).await?;
        }
        Err(e) => {
            tracing::error!("Failed to list members: {}", e);
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

pub async fn handle_demurrage(feedback: &CommandFeedback, ctx: &BotContext) -> ResponseResult<()> {
    match ctx.demurrage.run().await {
        Ok(DemurrageOutcome::Disabled) => {
            feedback.info("Demurrage is disabled.").await?;
        }
        Ok(DemurrageOutcome::NotDue { days_since, interval }) => {
            feedback
                .info(&format!(
                    "Demurrage is not due yet: last run {days_since} day(s) ago, \
                     interval {interval} day(s)."
                ))
                .await?;
        }
        Ok(DemurrageOutcome::ZeroRate) => {
            feedback.info("Demurrage rate is zero, nothing was charged.").await?;
        }
        Ok(DemurrageOutcome::Applied { charged_users, total }) => {
            feedback
                .success(&format!(
                    "Demurrage applied: {} {} collected from {} member(s).",
                    format_amount(total),
                    ctx.currency_symbol,
                    charged_users
                ))
                .await?;
        }
        Err(e) => return report_ledger_error(feedback, "demurrage", &e).await,
    }
    Ok(())
}

pub async fn handle_setting(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    args: &str,
) -> ResponseResult<()> {
    let (key, value) = match parse_setting(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            feedback.validation_error(&e.to_string(), SETTING_USAGE).await?;
            return Ok(());
        }
    };

    if let Err(e) = validate_setting(&key, &value) {
        feedback.validation_error(&e.to_string(), SETTING_USAGE).await?;
        return Ok(());
    }

    match Setting::set(&ctx.db.pool, &key, value.trim()).await {
        Ok(()) => {
            feedback
                .success(&format!("Setting {key} is now '{}'.", value.trim()))
                .await?;
        }
        Err(e) => {
            tracing::error!("Failed to store setting {}: {}", key, e);
            feedback.generic_failure().await?;
        }
    }
    Ok(())
}

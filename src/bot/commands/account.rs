use chrono::{Duration, Utc};
use teloxide::prelude::*;

use super::args::{parse_money_args, MONEY_USAGE};
use super::report_ledger_error;
use crate::bot::handlers::BotContext;
use crate::database::models::{
    HistoryEntry, Setting, User, DEFAULT_WELCOME_MESSAGE, WELCOME_MESSAGE,
};
use crate::services::ledger::Registration;
use crate::services::notifier::{money_notice, notify_user};
use crate::utils::datetime::format_amount;
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::log_command_success;
use crate::utils::markdown::{bold, escape_markdown};
use crate::utils::validation::validate_history_days;

pub(crate) const HISTORY_LIMIT: i64 = 50;

pub async fn handle_start(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    registration: &Registration,
) -> ResponseResult<()> {
    let welcome = match Setting::get(&ctx.db.pool, WELCOME_MESSAGE).await {
        Ok(Some(text)) => text,
        Ok(None) => DEFAULT_WELCOME_MESSAGE.to_string(),
        Err(e) => {
            tracing::warn!("Failed to load welcome message: {}", e);
            DEFAULT_WELCOME_MESSAGE.to_string()
        }
    };

    let mut text = welcome;
    if registration.created && !registration.welcome_bonus.is_zero() {
        text.push_str(&format!(
            "\n\nYou received a welcome bonus of {} {}.",
            format_amount(registration.welcome_bonus),
            ctx.currency_symbol
        ));
    }
    text.push_str(&format!(
        "\n\nBalance: {} {}",
        format_amount(registration.user.balance),
        ctx.currency_symbol
    ));

    feedback.info(&text).await?;
    Ok(())
}

pub async fn handle_balance(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
) -> ResponseResult<()> {
    let mut text = format!(
        "Your balance: {} {}",
        format_amount(user.balance),
        ctx.currency_symbol
    );
    if user.grace_credit_used {
        text.push_str("\nYour grace credit is in use until the balance is back above zero.");
    }
    text.push_str(&format!("\nTransactions: {}", user.transaction_count));

    feedback.info(&text).await?;
    Ok(())
}

pub async fn handle_send(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
    args: &str,
) -> ResponseResult<()> {
    let args = match parse_money_args(args) {
        Ok(args) => args,
        Err(e) => {
            feedback
                .validation_error(&e.to_string(), &format!("/send {MONEY_USAGE}"))
                .await?;
            return Ok(());
        }
    };

    let receipt = match ctx
        .ledger
        .transfer(user.telegram_id, &args.username, args.amount, args.comment.as_deref())
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => return report_ledger_error(feedback, "transfer", &e).await,
    };

    let amount = format_amount(args.amount);
    let mut text = format!(
        "Sent {} {} to {}. Your balance: {} {}",
        amount,
        ctx.currency_symbol,
        receipt.recipient.display_name(),
        format_amount(receipt.sender.balance),
        ctx.currency_symbol
    );
    if receipt.used_grace_credit {
        text.push_str("\nThis transfer used your one-time grace credit.");
    }
    feedback.success(&text).await?;

    let notice = money_notice(
        &format!(
            "💰 {} sent you {} {}.",
            receipt.sender.display_name(),
            amount,
            ctx.currency_symbol
        ),
        args.comment.as_deref(),
        receipt.recipient.balance,
        &ctx.currency_symbol,
    );
    notify_user(ctx.notifier.as_ref(), &receipt.recipient, &notice).await;

    log_command_success(
        "send",
        &user.display_name(),
        user.telegram_id,
        Some(&format!("tx {}", receipt.transaction_id)),
    );
    Ok(())
}

pub async fn handle_history(
    feedback: &CommandFeedback,
    ctx: &BotContext,
    user: &User,
    args: &str,
) -> ResponseResult<()> {
    let days = match validate_history_days(args) {
        Ok(days) => days,
        Err(e) => {
            feedback.validation_error(&e.to_string(), "/history [days]").await?;
            return Ok(());
        }
    };

    let since = Utc::now() - Duration::days(days);
    let entries = match ctx.ledger.history(user.id, since, HISTORY_LIMIT).await {
        Ok(entries) => entries,
        Err(e) => return report_ledger_error(feedback, "history", &e).await,
    };

    if entries.is_empty() {
        feedback
            .info(&format!("No transactions in the last {days} days."))
            .await?;
        return Ok(());
    }

    let mut text = format!("Transactions in the last {days} days:\n");
    text.push_str(&render_history(&entries, user.id, &ctx.currency_symbol));

    feedback.info(&text).await?;
    Ok(())
}

/// One line per entry, signed from the point of view of `user_id`.
pub(crate) fn render_history(
    entries: &[HistoryEntry],
    user_id: i64,
    currency_symbol: &str,
) -> String {
    let mut text = String::new();
    for entry in entries {
        let tx = &entry.transaction;
        let outgoing = tx.from_user_id == user_id && tx.kind.debits_sender();
        let (sign, counterpart) = if outgoing {
            ("-", entry.to_username.as_deref())
        } else {
            ("+", entry.from_username.as_deref())
        };
        text.push_str(&format!(
            "\n{} {}{} {} {} @{}",
            tx.created_at.format("%d.%m %H:%M"),
            sign,
            format_amount(tx.amount),
            currency_symbol,
            tx.kind,
            counterpart.unwrap_or("unknown")
        ));
        if let Some(comment) = tx.comment.as_deref().filter(|c| !c.is_empty()) {
            text.push_str(&format!(" ({comment})"));
        }
    }
    text
}

pub async fn handle_economy(feedback: &CommandFeedback, ctx: &BotContext) -> ResponseResult<()> {
    let summary = match ctx.ledger.economy_summary(Utc::now()).await {
        Ok(summary) => summary,
        Err(e) => return report_ledger_error(feedback, "economy", &e).await,
    };

    let symbol = &ctx.currency_symbol;
    let line = |label: &str, amount| {
        escape_markdown(&format!("{label}: {} {symbol}", format_amount(amount)))
    };
    let text = [
        bold("📊 Economy overview"),
        String::new(),
        escape_markdown(&format!("Members: {}", summary.member_count)),
        line("Money in circulation", summary.total_supply),
        line("Fund", summary.fund_balance),
        String::new(),
        bold("Transfer turnover"),
        line("7 days", summary.turnover_7d),
        line("30 days", summary.turnover_30d),
        line("All time", summary.turnover_all),
    ]
    .join("\n");

    feedback.send_markdown(text).await?;
    Ok(())
}

use async_trait::async_trait;
use rust_decimal::Decimal;
use teloxide::prelude::*;
use tracing::warn;

use crate::database::models::User;
use crate::utils::datetime::format_amount;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("recipient {0} cannot receive messages")]
    Unreachable(i64),
}

/// Outbound messages to users. Callers log failures; they never undo
/// committed ledger changes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, telegram_id: i64, text: &str) -> Result<(), NotifyError>;
}

pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, telegram_id: i64, text: &str) -> Result<(), NotifyError> {
        self.bot.send_message(ChatId(telegram_id), text).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed: usize,
}

pub fn money_notice(
    headline: &str,
    comment: Option<&str>,
    balance: Decimal,
    currency_symbol: &str,
) -> String {
    let mut text = headline.to_string();
    if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
        text.push_str(&format!("\nComment: {comment}"));
    }
    text.push_str(&format!("\nYour balance: {} {}", format_amount(balance), currency_symbol));
    text
}

/// Sends `text` to one user. Returns whether it was delivered; users
/// without a chat are skipped and failures are logged.
pub async fn notify_user(notifier: &dyn Notifier, user: &User, text: &str) -> bool {
    if !user.receives_notifications() {
        return false;
    }
    match notifier.send_message(user.telegram_id, text).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to notify user {} ({}): {}", user.id, user.telegram_id, e);
            false
        }
    }
}

/// Sends `text` to every user that can receive messages. Failures do not
/// stop the broadcast.
pub async fn broadcast(notifier: &dyn Notifier, users: &[User], text: &str) -> Delivery {
    let mut delivery = Delivery::default();
    for user in users.iter().filter(|user| user.receives_notifications()) {
        if notify_user(notifier, user, text).await {
            delivery.sent += 1;
        } else {
            delivery.failed += 1;
        }
    }
    delivery
}

pub mod account;
pub mod activities;
pub mod admin;
pub mod args;
pub mod events;

use teloxide::prelude::ResponseResult;
use teloxide::utils::command::BotCommands;

use crate::services::ledger::LedgerError;
use crate::utils::datetime::format_amount;
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::log_ledger_error;
use crate::utils::validation::MAX_AMOUNT;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Community ledger bot commands:")]
pub enum Command {
    #[command(description = "Display this help message")]
    Help,
    #[command(description = "Open your account")]
    Start,
    #[command(description = "Show your balance")]
    Balance,
    #[command(description = "Send money: /send @user amount [comment]")]
    Send(String),
    #[command(description = "Your transactions: /history [days]")]
    History(String),
    #[command(description = "Economy overview")]
    Economy,
    #[command(description = "List activities")]
    Activities,
    #[command(description = "Subscribe to an activity: /subscribe id")]
    Subscribe(String),
    #[command(description = "Leave an activity: /unsubscribe id")]
    Unsubscribe(String),
    #[command(description = "List upcoming events")]
    Events,

    #[command(description = "[admin] Issue money: /add @user amount [comment]")]
    Add(String),
    #[command(description = "[admin] Remove money: /rem @user amount [comment]")]
    Rem(String),
    #[command(description = "[admin] Pay from the fund: /payfund @user amount [comment]")]
    Payfund(String),
    #[command(description = "[admin] Credit an external payment: /topup @user amount")]
    Topup(String),
    #[command(description = "[admin] Create an activity: /newactivity name")]
    Newactivity(String),
    #[command(description = "[admin] Delete an activity: /deleteactivity id")]
    Deleteactivity(String),
    #[command(description = "[admin] Edit an activity: /editactivity id field value")]
    Editactivity(String),
    #[command(description = "[admin] One-off event: /eventonce activity DD.MM.YYYY HH:MM cost")]
    Eventonce(String),
    #[command(description = "[admin] Weekly event: /eventweekly activity weekday(0-6) HH:MM cost")]
    Eventweekly(String),
    #[command(description = "[admin] Event reminder: /eventreminder id minutes [template]")]
    Eventreminder(String),
    #[command(description = "[admin] Change event cost: /eventcost id cost")]
    Eventcost(String),
    #[command(description = "[admin] Set event link: /eventlink id url")]
    Eventlink(String),
    #[command(description = "[admin] Edit an event: /editevent id field value")]
    Editevent(String),
    #[command(description = "[admin] Delete an event: /deleteevent id")]
    Deleteevent(String),
    #[command(description = "[admin] Inspect an account: /check @user")]
    Check(String),
    #[command(description = "[admin] List members")]
    Users,
    #[command(description = "[admin] Run demurrage now if due")]
    Demurrage,
    #[command(description = "[admin] Change a setting: /setting key value")]
    Setting(String),
}

impl Command {
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::Add(_)
                | Command::Rem(_)
                | Command::Payfund(_)
                | Command::Topup(_)
                | Command::Newactivity(_)
                | Command::Deleteactivity(_)
                | Command::Editactivity(_)
                | Command::Eventonce(_)
                | Command::Eventweekly(_)
                | Command::Eventreminder(_)
                | Command::Eventcost(_)
                | Command::Eventlink(_)
                | Command::Editevent(_)
                | Command::Deleteevent(_)
                | Command::Check(_)
                | Command::Users
                | Command::Demurrage
                | Command::Setting(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Start => "start",
            Command::Balance => "balance",
            Command::Send(_) => "send",
            Command::History(_) => "history",
            Command::Economy => "economy",
            Command::Activities => "activities",
            Command::Subscribe(_) => "subscribe",
            Command::Unsubscribe(_) => "unsubscribe",
            Command::Events => "events",
            Command::Add(_) => "add",
            Command::Rem(_) => "rem",
            Command::Payfund(_) => "payfund",
            Command::Topup(_) => "topup",
            Command::Newactivity(_) => "newactivity",
            Command::Deleteactivity(_) => "deleteactivity",
            Command::Editactivity(_) => "editactivity",
            Command::Eventonce(_) => "eventonce",
            Command::Eventweekly(_) => "eventweekly",
            Command::Eventreminder(_) => "eventreminder",
            Command::Eventcost(_) => "eventcost",
            Command::Eventlink(_) => "eventlink",
            Command::Editevent(_) => "editevent",
            Command::Deleteevent(_) => "deleteevent",
            Command::Check(_) => "check",
            Command::Users => "users",
            Command::Demurrage => "demurrage",
            Command::Setting(_) => "setting",
        }
    }
}

/// Tells the user why a money operation failed. Errors the user cannot fix
/// are logged and reported generically.
pub(crate) async fn report_ledger_error(
    feedback: &CommandFeedback,
    operation: &str,
    error: &LedgerError,
) -> ResponseResult<()> {
    let message = match error {
        LedgerError::UserNotFound(who) => {
            format!("User {who} was not found. They need to /start the bot first.")
        }
        LedgerError::InvalidAmount(amount) => format!("Invalid amount: {}", format_amount(*amount)),
        LedgerError::SelfTransfer => "You cannot send money to yourself.".to_string(),
        LedgerError::InsufficientFunds { balance, requested } => format!(
            "Insufficient funds: balance {}, needed {}.",
            format_amount(*balance),
            format_amount(*requested)
        ),
        LedgerError::AmountTooLarge(amount) => format!(
            "Amount {} is too large, the limit is {}.",
            format_amount(*amount),
            format_amount(MAX_AMOUNT)
        ),
        LedgerError::Database(_) | LedgerError::InvalidSetting(_) => {
            log_ledger_error(operation, &error.to_string());
            feedback.generic_failure().await?;
            return Ok(());
        }
    };
    feedback.error(&message).await?;
    Ok(())
}

pub mod message;

use std::sync::Arc;
use teloxide::{dispatching::UpdateHandler, prelude::*};

use crate::database::connection::DatabaseManager;
use crate::services::demurrage::DemurrageProcessor;
use crate::services::ledger::Ledger;
use crate::services::notifier::Notifier;
use crate::services::scheduler::EventScheduler;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type HandlerResult = Result<(), HandlerError>;

/// Everything a command handler needs, cheap to clone per update.
#[derive(Clone)]
pub struct BotContext {
    pub db: DatabaseManager,
    pub ledger: Ledger,
    pub scheduler: Arc<EventScheduler>,
    pub demurrage: Arc<DemurrageProcessor>,
    pub notifier: Arc<dyn Notifier>,
    pub currency_symbol: String,
}

pub struct BotHandler {
    pub ctx: BotContext,
}

impl BotHandler {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx }
    }

    pub fn schema(&self) -> UpdateHandler<HandlerError> {
        let ctx = self.ctx.clone();

        Update::filter_message()
            .filter_command::<crate::bot::commands::Command>()
            .endpoint(move |bot: Bot, msg: Message, cmd| {
                let ctx = ctx.clone();
                async move { message::command_handler(bot, msg, cmd, ctx).await }
            })
    }
}

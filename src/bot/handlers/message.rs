use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use super::{BotContext, HandlerResult};
use crate::bot::commands::{account, activities, admin, events, Command};
use crate::database::models::User;
use crate::utils::feedback::CommandFeedback;
use crate::utils::logging::{log_command_error, log_command_start};

pub async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: BotContext,
) -> HandlerResult {
    let feedback = CommandFeedback::new(bot.clone(), msg.chat.id);

    let Some(sender) = msg.from() else {
        return Ok(());
    };
    let telegram_id = sender.id.0 as i64;
    let handle = sender.username.clone();
    let display = handle.clone().unwrap_or_else(|| sender.first_name.clone());

    log_command_start(cmd.name(), &display, telegram_id, None);

    if cmd == Command::Help {
        bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
        return Ok(());
    }

    // Every other command works on the caller's account, so it is opened on
    // first contact.
    let registration = match ctx.ledger.register_user(telegram_id, handle.as_deref()).await {
        Ok(registration) => registration,
        Err(e) => {
            log_command_error(cmd.name(), &display, telegram_id, &e.to_string());
            feedback.generic_failure().await?;
            return Ok(());
        }
    };
    let user: User = registration.user.clone();

    if cmd.requires_admin() && !user.is_admin {
        feedback.error("This command is only available to admins.").await?;
        return Ok(());
    }

    match cmd {
        Command::Help => {}
        Command::Start => account::handle_start(&feedback, &ctx, &registration).await?,
        Command::Balance => account::handle_balance(&feedback, &ctx, &user).await?,
        Command::Send(args) => account::handle_send(&feedback, &ctx, &user, &args).await?,
        Command::History(args) => account::handle_history(&feedback, &ctx, &user, &args).await?,
        Command::Economy => account::handle_economy(&feedback, &ctx).await?,
        Command::Activities => activities::handle_activities(&feedback, &ctx, &user).await?,
        Command::Subscribe(args) => {
            activities::handle_subscribe(&feedback, &ctx, &user, &args).await?
        }
        Command::Unsubscribe(args) => {
            activities::handle_unsubscribe(&feedback, &ctx, &user, &args).await?
        }
        Command::Events => events::handle_events(&feedback, &ctx).await?,
        Command::Add(args) => admin::handle_add(&feedback, &ctx, &args).await?,
        Command::Rem(args) => admin::handle_rem(&feedback, &ctx, &args).await?,
        Command::Payfund(args) => admin::handle_payfund(&feedback, &ctx, &args).await?,
        Command::Topup(args) => admin::handle_topup(&feedback, &ctx, &args).await?,
        Command::Newactivity(args) => {
            activities::handle_new_activity(&feedback, &ctx, &args).await?
        }
        Command::Deleteactivity(args) => {
            activities::handle_delete_activity(&feedback, &ctx, &args).await?
        }
        Command::Editactivity(args) => {
            activities::handle_edit_activity(&feedback, &ctx, &args).await?
        }
        Command::Eventonce(args) => events::handle_event_once(&feedback, &ctx, &user, &args).await?,
        Command::Eventweekly(args) => {
            events::handle_event_weekly(&feedback, &ctx, &user, &args).await?
        }
        Command::Eventreminder(args) => {
            events::handle_event_reminder(&feedback, &ctx, &args).await?
        }
        Command::Eventcost(args) => events::handle_event_cost(&feedback, &ctx, &args).await?,
        Command::Eventlink(args) => events::handle_event_link(&feedback, &ctx, &args).await?,
        Command::Editevent(args) => events::handle_edit_event(&feedback, &ctx, &args).await?,
        Command::Deleteevent(args) => events::handle_delete_event(&feedback, &ctx, &args).await?,
        Command::Check(args) => admin::handle_check(&feedback, &ctx, &args).await?,
        Command::Users => admin::handle_users(&feedback, &ctx).await?,
        Command::Demurrage => admin::handle_demurrage(&feedback, &ctx).await?,
        Command::Setting(args) => admin::handle_setting(&feedback, &ctx, &args).await?,
    }

    Ok(())
}

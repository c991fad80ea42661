//! What happens when an event's jobs fire: charging the audience at the
//! start and reminding it beforehand.

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::models::{
    Event, EventChanges, EventType, Setting, TransactionType, User, DEFAULT_REMINDER_TEXT,
    DEFAULT_REMINDER_TEXT_KEY, FUND_USER_ID,
};
use crate::services::ledger::{post, LedgerError, Posting};
use crate::services::notifier::{broadcast, Delivery, Notifier};
use crate::services::recurrence::next_for_event;
use crate::services::scheduler::{EventScheduler, SchedulerError};
use crate::utils::datetime::format_amount;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Skipped,
    Charged {
        members: usize,
        total: Decimal,
        delivery: Delivery,
        next_run: Option<DateTime<FixedOffset>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReminderOutcome {
    Skipped,
    Sent(Delivery),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
    #[error("unbalanced brace at position {0}")]
    UnbalancedBrace(usize),
}

#[derive(Debug, Clone)]
pub struct ReminderContext {
    pub event_name: String,
    pub event_description: String,
    pub start: Option<DateTime<FixedOffset>>,
    pub cost: Decimal,
    pub currency_symbol: String,
    pub reminder_minutes: i64,
    pub link: String,
}

impl ReminderContext {
    fn value(&self, placeholder: &str) -> Option<String> {
        let value = match placeholder {
            "event_name" => self.event_name.clone(),
            "event_description" => self.event_description.clone(),
            "start_date" => self
                .start
                .map(|at| at.format("%d.%m.%Y").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            "start_time" => self
                .start
                .map(|at| at.format("%H:%M").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            "cost" => format_amount(self.cost),
            "currency_symbol" => self.currency_symbol.clone(),
            "reminder_minutes" => self.reminder_minutes.to_string(),
            "link" => self.link.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// Substitutes `{name}` placeholders; `{{` and `}}` produce literal braces.
pub fn render_template(template: &str, context: &ReminderContext) -> Result<String, TemplateError> {
    let mut rendered = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                chars.next();
                rendered.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((at, '{')) => return Err(TemplateError::UnbalancedBrace(at)),
                        Some((_, ch)) => name.push(ch),
                        None => return Err(TemplateError::UnbalancedBrace(position)),
                    }
                }
                let value = context
                    .value(name.trim())
                    .ok_or(TemplateError::UnknownPlaceholder(name))?;
                rendered.push_str(&value);
            }
            '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                chars.next();
                rendered.push('}');
            }
            '}' => return Err(TemplateError::UnbalancedBrace(position)),
            other => rendered.push(other),
        }
    }

    Ok(rendered)
}

/// The event's own template unless it is missing, blank or `.`.
pub fn select_template<'a>(event_template: Option<&'a str>, default_template: &'a str) -> &'a str {
    match event_template.map(str::trim) {
        Some(text) if !text.is_empty() && text != "." => text,
        _ => default_template,
    }
}

fn fallback_notice(event_name: &str) -> String {
    format!("Event «{event_name}» starts soon")
}

fn start_notice(event: &Event, charged: Option<Decimal>, currency_symbol: &str) -> String {
    let mut text = format!("▶️ Event «{}» is starting now.", event.display_name());
    if let Some(link) = event.link.as_deref().filter(|link| !link.trim().is_empty()) {
        text.push_str(&format!("\n\n🔗 Join: {link}"));
    }
    if let Some(amount) = charged {
        text.push_str(&format!(
            "\n\n{} {} has been charged for participation.",
            format_amount(amount),
            currency_symbol
        ));
    }
    text
}

pub struct EventProcessor {
    pool: SqlitePool,
    scheduler: Arc<EventScheduler>,
    notifier: Arc<dyn Notifier>,
    currency_symbol: String,
}

impl EventProcessor {
    pub fn new(
        pool: SqlitePool,
        scheduler: Arc<EventScheduler>,
        notifier: Arc<dyn Notifier>,
        currency_symbol: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            scheduler,
            notifier,
            currency_symbol: currency_symbol.into(),
        }
    }

    pub async fn run_payment(&self, event_id: i64) -> Result<PaymentOutcome, ProcessError> {
        self.run_payment_at(event_id, self.scheduler.now()).await
    }

    /// Charges every audience member the event's cost, records `last_run`
    /// and, for weekly events, arms the next occurrence.
    ///
    /// Fees and `last_run` commit together or not at all. A weekly event is
    /// re-armed even when the charge fails.
    pub async fn run_payment_at(
        &self,
        event_id: i64,
        now: DateTime<FixedOffset>,
    ) -> Result<PaymentOutcome, ProcessError> {
        let Some(event) = Event::find_by_id(&self.pool, event_id).await? else {
            warn!("Payment job for event {} skipped: event not found", event_id);
            return Ok(PaymentOutcome::Skipped);
        };
        if !event.is_active {
            warn!("Payment job for event {} skipped: event inactive", event_id);
            return Ok(PaymentOutcome::Skipped);
        }

        info!("Running payment for event {} ('{}')", event.id, event.display_name());

        let (audience, total) = match self.charge(&event, now).await {
            Ok(charged) => charged,
            Err(e) => {
                if event.event_type == EventType::Recurring {
                    if let Err(arm_error) = self.scheduler.arm_at(&event, now).await {
                        warn!(
                            "Failed to re-arm event {} after a failed payment: {}",
                            event.id, arm_error
                        );
                    }
                }
                return Err(e);
            }
        };

        info!(
            "Event {} charged {} members, {} in total",
            event.id,
            audience.len(),
            format_amount(total)
        );

        let charged = (event.cost > Decimal::ZERO).then_some(event.cost);
        let notice = start_notice(&event, charged, &self.currency_symbol);
        let delivery = broadcast(self.notifier.as_ref(), &audience, &notice).await;

        let next_run = match event.event_type {
            EventType::Recurring => self.scheduler.arm_at(&event, now).await?,
            EventType::Single => None,
        };

        Ok(PaymentOutcome::Charged {
            members: audience.len(),
            total,
            delivery,
            next_run,
        })
    }

    async fn charge(
        &self,
        event: &Event,
        now: DateTime<FixedOffset>,
    ) -> Result<(Vec<User>, Decimal), ProcessError> {
        let mut tx = self.pool.begin().await?;
        let audience = User::audience_for_activity(&mut *tx, event.activity_id).await?;
        let mut total = Decimal::ZERO;

        if event.cost > Decimal::ZERO {
            let comment = format!("Event fee: {}", event.display_name());
            for member in &audience {
                post(
                    &mut tx,
                    &Posting {
                        from_user_id: member.id,
                        to_user_id: FUND_USER_ID,
                        amount: event.cost,
                        kind: TransactionType::EventFee,
                        comment: Some(&comment),
                    },
                    now.with_timezone(&Utc),
                )
                .await?;
                total += event.cost;
            }
        }

        Event::update(
            &mut *tx,
            event.id,
            &EventChanges {
                last_run: Some(now.with_timezone(&Utc)),
                ..Default::default()
            },
        )
        .await?;
        tx.commit().await?;

        Ok((audience, total))
    }

    pub async fn run_reminder(&self, event_id: i64) -> Result<ReminderOutcome, ProcessError> {
        self.run_reminder_at(event_id, self.scheduler.now()).await
    }

    /// Sends the event's reminder to its audience. Nothing is written.
    pub async fn run_reminder_at(
        &self,
        event_id: i64,
        now: DateTime<FixedOffset>,
    ) -> Result<ReminderOutcome, ProcessError> {
        let event = match Event::find_by_id(&self.pool, event_id).await? {
            Some(event) if event.is_active => event,
            _ => {
                warn!("Reminder job for event {} skipped: event not found or inactive", event_id);
                return Ok(ReminderOutcome::Skipped);
            }
        };

        let default_template = Setting::get(&self.pool, DEFAULT_REMINDER_TEXT_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_REMINDER_TEXT.to_string());
        let template = select_template(event.reminder_text.as_deref(), &default_template);

        let context = ReminderContext {
            event_name: event.display_name().to_string(),
            event_description: event.display_description().to_string(),
            start: next_for_event(&event, now),
            cost: event.cost,
            currency_symbol: self.currency_symbol.clone(),
            reminder_minutes: event.reminder_minutes,
            link: event.link.clone().unwrap_or_default(),
        };

        let text = render_template(template, &context).unwrap_or_else(|e| {
            warn!("Invalid reminder template for event {}: {}", event.id, e);
            fallback_notice(event.display_name())
        });

        let audience = User::audience_for_activity(&self.pool, event.activity_id).await?;
        let delivery = broadcast(self.notifier.as_ref(), &audience, &text).await;
        info!(
            "Reminder for event {} sent to {} members ({} failed)",
            event.id, delivery.sent, delivery.failed
        );

        Ok(ReminderOutcome::Sent(delivery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn context() -> ReminderContext {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        ReminderContext {
            event_name: "Yoga".to_string(),
            event_description: "Morning stretch".to_string(),
            start: Some(tz.with_ymd_and_hms(2025, 8, 6, 9, 5, 0).unwrap()),
            cost: Decimal::new(150, 1),
            currency_symbol: "Ӫ".to_string(),
            reminder_minutes: 30,
            link: "https://meet.example/yoga".to_string(),
        }
    }

    #[test]
    fn test_render_all_placeholders() {
        let rendered = render_template(
            "{event_name}: {event_description} on {start_date} {start_time}, \
             {cost}{currency_symbol}, in {reminder_minutes} min {link}",
            &context(),
        )
        .unwrap();
        assert_eq!(
            rendered,
            "Yoga: Morning stretch on 06.08.2025 09:05, 15Ӫ, in 30 min https://meet.example/yoga"
        );
    }

    #[test]
    fn test_render_escaped_braces() {
        assert_eq!(
            render_template("{{literal}} {event_name}", &context()).unwrap(),
            "{literal} Yoga"
        );
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        assert_eq!(
            render_template("Hi {nickname}", &context()),
            Err(TemplateError::UnknownPlaceholder("nickname".to_string()))
        );
    }

    #[test]
    fn test_render_rejects_unbalanced_braces() {
        assert!(matches!(
            render_template("Starts {event_name", &context()),
            Err(TemplateError::UnbalancedBrace(_))
        ));
        assert!(matches!(
            render_template("oops }", &context()),
            Err(TemplateError::UnbalancedBrace(5))
        ));
    }

    #[test]
    fn test_render_without_start() {
        let mut ctx = context();
        ctx.start = None;
        assert_eq!(render_template("{start_date}", &ctx).unwrap(), "N/A");
    }

    #[test]
    fn test_select_template() {
        assert_eq!(select_template(Some("Custom"), "Default"), "Custom");
        assert_eq!(select_template(Some("."), "Default"), "Default");
        assert_eq!(select_template(Some("   "), "Default"), "Default");
        assert_eq!(select_template(None, "Default"), "Default");
    }

    #[test]
    fn test_fallback_notice() {
        assert_eq!(fallback_notice("Yoga"), "Event «Yoga» starts soon");
    }
}

#![allow(clippy::unwrap_used)]

mod common;

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};
use common::*;
use ledger_bot::database::connection::DatabaseManager;
use ledger_bot::database::models::*;
use ledger_bot::services::event_payment::{EventProcessor, PaymentOutcome, ReminderOutcome};
use ledger_bot::services::notifier::Delivery;
use ledger_bot::services::scheduler::{EventScheduler, JobKey};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    db: DatabaseManager,
    _temp_dir: TempDir,
    runner: Arc<MemoryRunner>,
    notifier: Arc<RecordingNotifier>,
    processor: EventProcessor,
}

async fn fixture_with(notifier: RecordingNotifier) -> Fixture {
    let (db, temp_dir) = setup_test_db().await.unwrap();
    let runner = Arc::new(MemoryRunner::default());
    let notifier = Arc::new(notifier);
    let scheduler = Arc::new(EventScheduler::new(runner.clone(), db.pool.clone(), tz()));
    let processor = EventProcessor::new(db.pool.clone(), scheduler, notifier.clone(), "Ӫ");

    Fixture {
        db,
        _temp_dir: temp_dir,
        runner,
        notifier,
        processor,
    }
}

async fn fixture() -> Fixture {
    fixture_with(RecordingNotifier::default()).await
}

/// Wednesday 6 August 2025, 19:00 at UTC+3.
fn wednesday_evening() -> DateTime<FixedOffset> {
    tz().with_ymd_and_hms(2025, 8, 6, 19, 0, 0).unwrap()
}

fn seven_pm() -> NaiveTime {
    NaiveTime::from_hms_opt(19, 0, 0).unwrap()
}

async fn activity_with(db: &DatabaseManager, name: &str, members: &[&User]) -> i64 {
    let activity_id = Activity::create(&db.pool, name, "", None).await.unwrap();
    for user in members {
        Activity::subscribe(&db.pool, user.id, activity_id).await.unwrap();
    }
    activity_id
}

async fn weekly_event(db: &DatabaseManager, activity_id: i64, cost: &str) -> i64 {
    let schedule = Schedule::Weekly {
        weekday: Weekday::Wed,
        time: seven_pm(),
    };
    Event::create(&db.pool, &NewEvent::new(activity_id, schedule, dec(cost)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_weekly_payment_charges_subscribers_and_rearms() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "100").await;
    let bob = member(&f.db, 1002, "bob", "10").await;
    let carol = member(&f.db, 1003, "carol", "50").await;
    let activity_id = activity_with(&f.db, "Yoga", &[&alice, &bob]).await;
    let event_id = weekly_event(&f.db, activity_id, "15").await;
    let supply_before = total_supply(&f.db).await;

    let now = wednesday_evening();
    let outcome = f.processor.run_payment_at(event_id, now).await?;

    let next = now + Duration::days(7);
    assert_eq!(
        outcome,
        PaymentOutcome::Charged {
            members: 2,
            total: dec("30"),
            delivery: Delivery { sent: 2, failed: 0 },
            next_run: Some(next),
        }
    );

    // Fees may take a member below zero.
    assert_eq!(reload(&f.db, alice.id).await.balance, dec("85"));
    assert_eq!(reload(&f.db, bob.id).await.balance, dec("-5"));
    assert_eq!(reload(&f.db, carol.id).await.balance, dec("50"));
    assert_eq!(User::fund(&f.db.pool).await?.balance, dec("30"));
    assert_eq!(total_supply(&f.db).await, supply_before);

    let fees = Transaction::list_by_type(&f.db.pool, TransactionType::EventFee).await?;
    assert_eq!(fees.len(), 2);
    assert!(fees.iter().all(|fee| fee.to_user_id == FUND_USER_ID));
    assert_eq!(fees[0].from_user_id, alice.id);

    let event = Event::find_by_id(&f.db.pool, event_id).await?.unwrap();
    assert_eq!(event.last_run, Some(now.with_timezone(&Utc)));

    assert_eq!(f.runner.get(JobKey::payment(event_id)).await, Some(next.with_timezone(&Utc)));

    let messages = f.notifier.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0, alice.telegram_id);
    assert!(messages[0].1.contains("Yoga"));
    assert!(messages[0].1.contains("15 Ӫ"));

    Ok(())
}

#[tokio::test]
async fn test_general_activity_reaches_every_member() -> Result<()> {
    let f = fixture().await;
    member(&f.db, 1001, "alice", "20").await;
    member(&f.db, 1002, "bob", "20").await;
    member(&f.db, 1003, "carol", "20").await;
    let event_id = weekly_event(&f.db, GENERAL_ACTIVITY_ID, "2").await;

    let outcome = f.processor.run_payment_at(event_id, wednesday_evening()).await?;
    assert!(matches!(
        outcome,
        PaymentOutcome::Charged { members: 3, total, .. } if total == dec("6")
    ));
    assert_eq!(User::fund(&f.db.pool).await?.balance, dec("6"));

    // The fund never pays itself and never gets a message.
    let messages = f.notifier.messages().await;
    assert!(messages.iter().all(|(telegram_id, _)| *telegram_id != 0));

    Ok(())
}

#[tokio::test]
async fn test_free_event_only_notifies() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "20").await;
    let activity_id = activity_with(&f.db, "Walk", &[&alice]).await;
    let event_id = weekly_event(&f.db, activity_id, "0").await;

    let outcome = f.processor.run_payment_at(event_id, wednesday_evening()).await?;
    assert!(matches!(
        outcome,
        PaymentOutcome::Charged { members: 1, total, .. } if total.is_zero()
    ));
    assert_eq!(transaction_count(&f.db).await, 0);
    assert_eq!(reload(&f.db, alice.id).await.balance, dec("20"));

    let messages = f.notifier.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].1.contains("charged"));

    let event = Event::find_by_id(&f.db.pool, event_id).await?.unwrap();
    assert!(event.last_run.is_some());

    Ok(())
}

#[tokio::test]
async fn test_single_event_is_terminal() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "20").await;
    let activity_id = activity_with(&f.db, "Concert", &[&alice]).await;
    let start = wednesday_evening();
    let event_id = Event::create(
        &f.db.pool,
        &NewEvent::new(activity_id, Schedule::Single(start), dec("5")),
    )
    .await?;

    let outcome = f.processor.run_payment_at(event_id, start).await?;
    assert!(matches!(outcome, PaymentOutcome::Charged { next_run: None, .. }));
    assert!(f.runner.get(JobKey::payment(event_id)).await.is_none());
    assert_eq!(reload(&f.db, alice.id).await.balance, dec("15"));

    Ok(())
}

#[tokio::test]
async fn test_missing_or_inactive_event_is_skipped() -> Result<()> {
    let f = fixture().await;
    member(&f.db, 1001, "alice", "20").await;

    assert_eq!(
        f.processor.run_payment_at(404, wednesday_evening()).await?,
        PaymentOutcome::Skipped
    );

    let event_id = weekly_event(&f.db, GENERAL_ACTIVITY_ID, "5").await;
    Event::update(
        &f.db.pool,
        event_id,
        &EventChanges {
            is_active: Some(false),
            ..Default::default()
        },
    )
    .await?;

    assert_eq!(
        f.processor.run_payment_at(event_id, wednesday_evening()).await?,
        PaymentOutcome::Skipped
    );
    assert_eq!(
        f.processor.run_reminder_at(event_id, wednesday_evening()).await?,
        ReminderOutcome::Skipped
    );
    assert_eq!(transaction_count(&f.db).await, 0);
    assert!(f.notifier.messages().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_failed_payment_rolls_back_every_fee() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "100").await;
    let bob = member(&f.db, 1002, "bob", "100").await;
    let activity_id = activity_with(&f.db, "Yoga", &[&alice, &bob]).await;
    let event_id = weekly_event(&f.db, activity_id, "15").await;
    let supply_before = total_supply(&f.db).await;

    // Alice is charged first, then Bob's update fails.
    break_user(&f.db, bob.id).await;
    let result = f.processor.run_payment_at(event_id, wednesday_evening()).await;
    assert!(result.is_err());

    assert_eq!(reload(&f.db, alice.id).await.balance, dec("100"));
    assert_eq!(User::fund(&f.db.pool).await?.balance, Decimal::ZERO);
    assert_eq!(total_supply(&f.db).await, supply_before);
    assert_eq!(transaction_count(&f.db).await, 0);

    let event = Event::find_by_id(&f.db.pool, event_id).await?.unwrap();
    assert!(event.last_run.is_none());
    assert!(f.notifier.messages().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_failed_payment_still_arms_the_next_week() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "100").await;
    let activity_id = activity_with(&f.db, "Yoga", &[&alice]).await;
    let event_id = weekly_event(&f.db, activity_id, "15").await;

    break_user(&f.db, alice.id).await;
    let result = f.processor.run_payment_at(event_id, wednesday_evening()).await;
    assert!(result.is_err());

    let next_week = (wednesday_evening() + Duration::days(7)).with_timezone(&Utc);
    assert_eq!(f.runner.get(JobKey::payment(event_id)).await, Some(next_week));
    assert_eq!(reload(&f.db, alice.id).await.balance, dec("100"));

    Ok(())
}

#[tokio::test]
async fn test_failed_single_payment_is_not_rearmed() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "100").await;
    let start = wednesday_evening();
    let event_id = Event::create(
        &f.db.pool,
        &NewEvent::new(GENERAL_ACTIVITY_ID, Schedule::Single(start), dec("5")),
    )
    .await?;

    break_user(&f.db, alice.id).await;
    assert!(f.processor.run_payment_at(event_id, start).await.is_err());
    assert!(f.runner.get(JobKey::payment(event_id)).await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_notification_failures_do_not_undo_charges() -> Result<()> {
    let f = fixture_with(RecordingNotifier::unreachable(&[1001])).await;
    let alice = member(&f.db, 1001, "alice", "100").await;
    let bob = member(&f.db, 1002, "bob", "100").await;
    let activity_id = activity_with(&f.db, "Yoga", &[&alice, &bob]).await;
    let event_id = weekly_event(&f.db, activity_id, "10").await;

    let outcome = f.processor.run_payment_at(event_id, wednesday_evening()).await?;
    assert!(matches!(
        outcome,
        PaymentOutcome::Charged { delivery: Delivery { sent: 1, failed: 1 }, .. }
    ));
    assert_eq!(reload(&f.db, alice.id).await.balance, dec("90"));
    assert_eq!(reload(&f.db, bob.id).await.balance, dec("90"));

    Ok(())
}

#[tokio::test]
async fn test_reminder_renders_event_template() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "100").await;
    let activity_id = activity_with(&f.db, "Yoga", &[&alice]).await;
    let event_id = weekly_event(&f.db, activity_id, "15").await;
    let template = "{event_name} at {start_time} on {start_date}, {cost}{currency_symbol} {{ok}}";
    Event::update(
        &f.db.pool,
        event_id,
        &EventChanges {
            reminder: Some((30, Some(template.to_string()))),
            ..Default::default()
        },
    )
    .await?;

    let now = wednesday_evening() - Duration::minutes(30);
    let outcome = f.processor.run_reminder_at(event_id, now).await?;
    assert_eq!(outcome, ReminderOutcome::Sent(Delivery { sent: 1, failed: 0 }));

    let messages = f.notifier.messages().await;
    assert_eq!(messages[0].1, "Yoga at 19:00 on 06.08.2025, 15Ӫ {ok}");

    // Reminders never touch the ledger.
    assert_eq!(transaction_count(&f.db).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_reminder_falls_back_to_default_and_generic_notice() -> Result<()> {
    let f = fixture().await;
    let alice = member(&f.db, 1001, "alice", "100").await;
    let activity_id = activity_with(&f.db, "Yoga", &[&alice]).await;
    let event_id = weekly_event(&f.db, activity_id, "15").await;
    Setting::set(&f.db.pool, DEFAULT_REMINDER_TEXT_KEY, "Soon: {event_name}").await?;

    let set_template = |text: &str| EventChanges {
        reminder: Some((30, Some(text.to_string()))),
        ..Default::default()
    };
    let now = wednesday_evening() - Duration::minutes(30);

    Event::update(&f.db.pool, event_id, &set_template(".")).await?;
    f.processor.run_reminder_at(event_id, now).await?;

    Event::update(&f.db.pool, event_id, &set_template("{unknown} placeholder")).await?;
    f.processor.run_reminder_at(event_id, now).await?;

    let messages = f.notifier.messages().await;
    assert_eq!(messages[0].1, "Soon: Yoga");
    assert_eq!(messages[1].1, "Event «Yoga» starts soon");

    Ok(())
}

#![allow(clippy::unwrap_used)]

mod common;

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};
use common::*;
use ledger_bot::database::connection::DatabaseManager;
use ledger_bot::database::models::*;
use ledger_bot::services::scheduler::{
    EventScheduler, JobKey, JobRunner, RearmSummary, SchedulerError,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Monday 4 August 2025, 12:00 at UTC+3.
fn monday_noon() -> DateTime<FixedOffset> {
    tz().with_ymd_and_hms(2025, 8, 4, 12, 0, 0).unwrap()
}

fn scheduler(db: &DatabaseManager, runner: &Arc<MemoryRunner>) -> EventScheduler {
    EventScheduler::new(runner.clone(), db.pool.clone(), tz())
}

async fn weekly(db: &DatabaseManager, weekday: Weekday, hour: u32, reminder_minutes: i64) -> Event {
    let mut new_event = NewEvent::new(
        GENERAL_ACTIVITY_ID,
        Schedule::Weekly {
            weekday,
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        },
        Decimal::ONE,
    );
    new_event.reminder_minutes = reminder_minutes;
    let id = Event::create(&db.pool, &new_event).await.unwrap();
    Event::find_by_id(&db.pool, id).await.unwrap().unwrap()
}

async fn single(db: &DatabaseManager, start: DateTime<FixedOffset>) -> Event {
    let id = Event::create(
        &db.pool,
        &NewEvent::new(GENERAL_ACTIVITY_ID, Schedule::Single(start), Decimal::ZERO),
    )
    .await
    .unwrap();
    Event::find_by_id(&db.pool, id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_arm_schedules_payment_and_reminder() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let event = weekly(&db, Weekday::Wed, 19, 90).await;

    let next = scheduler.arm_at(&event, monday_noon()).await?.unwrap();
    let expected = tz().with_ymd_and_hms(2025, 8, 6, 19, 0, 0).unwrap();
    assert_eq!(next, expected);

    assert_eq!(
        runner.get(JobKey::payment(event.id)).await,
        Some(Utc.with_ymd_and_hms(2025, 8, 6, 16, 0, 0).unwrap())
    );
    assert_eq!(
        runner.get(JobKey::reminder(event.id)).await,
        Some(Utc.with_ymd_and_hms(2025, 8, 6, 14, 30, 0).unwrap())
    );
    assert_eq!(scheduler.armed().await.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_reminder_in_the_past_is_not_backfilled() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let event = weekly(&db, Weekday::Mon, 12, 60).await;

    // Ten minutes before the start, the hour-long lead has already passed.
    let now = monday_noon() - Duration::minutes(10);
    let next = scheduler.arm_at(&event, now).await?;
    assert_eq!(next, Some(monday_noon()));
    assert!(runner.get(JobKey::payment(event.id)).await.is_some());
    assert!(runner.get(JobKey::reminder(event.id)).await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_rearm_replaces_previous_jobs() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let event = weekly(&db, Weekday::Wed, 19, 30).await;
    scheduler.arm_at(&event, monday_noon()).await?;

    Event::update(
        &db.pool,
        event.id,
        &EventChanges {
            schedule: Some(Schedule::Weekly {
                weekday: Weekday::Fri,
                time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            }),
            reminder: Some((0, None)),
            ..Default::default()
        },
    )
    .await?;
    let updated = Event::find_by_id(&db.pool, event.id).await?.unwrap();
    scheduler.arm_at(&updated, monday_noon()).await?;

    assert_eq!(
        runner.armed().await,
        vec![(
            JobKey::payment(event.id),
            Utc.with_ymd_and_hms(2025, 8, 8, 5, 0, 0).unwrap()
        )]
    );

    Ok(())
}

#[tokio::test]
async fn test_spent_single_event_arms_nothing() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);

    let past = single(&db, monday_noon() - Duration::hours(1)).await;
    assert_eq!(scheduler.arm_at(&past, monday_noon()).await?, None);

    let future = single(&db, monday_noon() + Duration::days(2)).await;
    assert_eq!(
        scheduler.arm_at(&future, monday_noon()).await?,
        Some(monday_noon() + Duration::days(2))
    );
    assert_eq!(runner.armed().await.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_inactive_event_is_disarmed() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let mut event = weekly(&db, Weekday::Wed, 19, 30).await;
    scheduler.arm_at(&event, monday_noon()).await?;

    event.is_active = false;
    assert_eq!(scheduler.arm_at(&event, monday_noon()).await?, None);
    assert!(runner.armed().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_disarm_tolerates_unknown_keys() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);

    scheduler.disarm(999).await?;

    let event = weekly(&db, Weekday::Wed, 19, 30).await;
    scheduler.arm_at(&event, monday_noon()).await?;
    scheduler.disarm(event.id).await?;
    scheduler.disarm(event.id).await?;
    assert!(runner.armed().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_arm_by_id_for_deleted_event_only_disarms() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let event = weekly(&db, Weekday::Wed, 19, 30).await;
    scheduler.arm_at(&event, monday_noon()).await?;

    Event::delete(&db.pool, event.id).await?;
    assert_eq!(scheduler.arm_by_id(event.id).await?, None);
    assert!(runner.armed().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_rearm_all_counts_outcomes() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);

    weekly(&db, Weekday::Wed, 19, 30).await;
    weekly(&db, Weekday::Sun, 10, 0).await;
    single(&db, monday_noon() - Duration::days(1)).await;
    let inactive = weekly(&db, Weekday::Tue, 9, 0).await;
    Event::update(
        &db.pool,
        inactive.id,
        &EventChanges {
            is_active: Some(false),
            ..Default::default()
        },
    )
    .await?;

    let summary = scheduler.rearm_all_at(monday_noon()).await?;
    assert_eq!(
        summary,
        RearmSummary {
            armed: 2,
            idle: 1,
            failed: 0
        }
    );
    // Two payments and one reminder.
    assert_eq!(runner.armed().await.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_runner_failures_surface() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::failing());
    let scheduler = scheduler(&db, &runner);
    let event = weekly(&db, Weekday::Wed, 19, 0).await;

    let result = scheduler.arm_at(&event, monday_noon()).await;
    assert!(matches!(result, Err(SchedulerError::Runner(_))));

    let summary = scheduler.rearm_all_at(monday_noon()).await?;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.armed, 0);

    Ok(())
}

#[tokio::test]
async fn test_disarm_activity_cancels_its_events() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let yoga = Activity::create(&db.pool, "Yoga", "", None).await?;
    let general = weekly(&db, Weekday::Sun, 10, 0).await;
    let id = Event::create(
        &db.pool,
        &NewEvent::new(
            yoga,
            Schedule::Weekly {
                weekday: Weekday::Wed,
                time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            },
            Decimal::ONE,
        ),
    )
    .await?;
    let yoga_event = Event::find_by_id(&db.pool, id).await?.unwrap();
    scheduler.arm_at(&general, monday_noon()).await?;
    scheduler.arm_at(&yoga_event, monday_noon()).await?;

    assert_eq!(scheduler.disarm_activity(yoga).await?, 1);
    assert!(runner.get(JobKey::payment(yoga_event.id)).await.is_none());
    assert!(runner.get(JobKey::payment(general.id)).await.is_some());

    Ok(())
}

#[tokio::test]
async fn test_disarm_activity_reports_cancel_failures() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let event = weekly(&db, Weekday::Wed, 19, 0).await;
    scheduler.arm_at(&event, monday_noon()).await?;

    runner.break_cancel();
    let result = scheduler.disarm_activity(GENERAL_ACTIVITY_ID).await;
    assert!(matches!(result, Err(SchedulerError::Runner(_))));
    // The job is still armed, so the activity must not be deleted.
    assert!(runner.get(JobKey::payment(event.id)).await.is_some());

    Ok(())
}

#[tokio::test]
async fn test_edited_event_is_rearmed_from_its_new_values() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let runner = Arc::new(MemoryRunner::default());
    let scheduler = scheduler(&db, &runner);
    let event = weekly(&db, Weekday::Wed, 19, 30).await;
    scheduler.arm_at(&event, monday_noon()).await?;

    let moved = EventChanges {
        name: Some("Friday choir".to_string()),
        description: Some("Bring sheet music".to_string()),
        schedule: Some(Schedule::Weekly {
            weekday: Weekday::Fri,
            time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }),
        ..Default::default()
    };
    assert!(Event::update(&db.pool, event.id, &moved).await?);
    let edited = Event::find_by_id(&db.pool, event.id).await?.unwrap();
    assert_eq!(edited.display_name(), "Friday choir");
    assert_eq!(edited.description.as_deref(), Some("Bring sheet music"));

    scheduler.arm_at(&edited, monday_noon()).await?;
    assert_eq!(
        runner.get(JobKey::payment(event.id)).await,
        Some(Utc.with_ymd_and_hms(2025, 8, 8, 15, 0, 0).unwrap())
    );
    assert_eq!(
        runner.get(JobKey::reminder(event.id)).await,
        Some(Utc.with_ymd_and_hms(2025, 8, 8, 14, 30, 0).unwrap())
    );

    let paused = EventChanges {
        is_active: Some(false),
        ..Default::default()
    };
    Event::update(&db.pool, event.id, &paused).await?;
    let edited = Event::find_by_id(&db.pool, event.id).await?.unwrap();
    assert_eq!(scheduler.arm_at(&edited, monday_noon()).await?, None);
    assert!(runner.armed().await.is_empty());

    Ok(())
}

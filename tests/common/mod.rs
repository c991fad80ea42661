#![allow(dead_code, clippy::unwrap_used)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use ledger_bot::database::connection::DatabaseManager;
use ledger_bot::database::models::User;
use ledger_bot::services::ledger::Ledger;
use ledger_bot::services::notifier::{NotifyError, Notifier};
use ledger_bot::services::scheduler::{JobKey, JobRunner, SchedulerError};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::{tempdir, TempDir};
use tokio::sync::Mutex;

pub async fn setup_test_db() -> Result<(DatabaseManager, TempDir)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");
    let database_url = format!("sqlite:{}", db_path.display());

    let db_manager = DatabaseManager::new(&database_url).await?;
    db_manager.run_migrations().await?;

    Ok((db_manager, temp_dir))
}

pub fn tz() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).unwrap()
}

pub fn dec(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

/// Opens an account without a welcome bonus and sets its balance directly.
pub async fn member(db: &DatabaseManager, telegram_id: i64, username: &str, balance: &str) -> User {
    let mut conn = db.pool.acquire().await.unwrap();
    let user = User::create(&mut conn, telegram_id, Some(username), false).await.unwrap();
    if balance != "0" {
        User::adjust_balance(&mut conn, user.id, dec(balance)).await.unwrap();
    }
    User::find_by_id(&mut *conn, user.id).await.unwrap().unwrap()
}

pub async fn reload(db: &DatabaseManager, id: i64) -> User {
    User::find_by_id(&db.pool, id).await.unwrap().unwrap()
}

/// Sum of every balance including the fund's.
pub async fn total_supply(db: &DatabaseManager) -> Decimal {
    let fund = User::fund(&db.pool).await.unwrap();
    User::list_members(&db.pool)
        .await
        .unwrap()
        .iter()
        .fold(fund.balance, |total, user| total + user.balance)
}

pub async fn transaction_count(db: &DatabaseManager) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions")
        .fetch_one(&db.pool)
        .await
        .unwrap()
}

/// Makes every balance update of `user_id` fail.
pub async fn break_user(db: &DatabaseManager, user_id: i64) {
    sqlx::query(&format!(
        "CREATE TRIGGER fail_user_{user_id} BEFORE UPDATE ON users WHEN NEW.id = {user_id} \
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"
    ))
    .execute(&db.pool)
    .await
    .unwrap();
}

pub fn ledger(db: &DatabaseManager) -> Ledger {
    Ledger::new(db.pool.clone())
}

/// Keeps armed jobs in a map instead of starting timers.
#[derive(Default)]
pub struct MemoryRunner {
    jobs: Mutex<HashMap<JobKey, DateTime<Utc>>>,
    pub fail_schedule: bool,
    fail_cancel: AtomicBool,
}

impl MemoryRunner {
    pub fn failing() -> Self {
        Self {
            fail_schedule: true,
            ..Default::default()
        }
    }

    /// Makes every later cancel fail.
    pub fn break_cancel(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    pub async fn get(&self, key: JobKey) -> Option<DateTime<Utc>> {
        self.jobs.lock().await.get(&key).copied()
    }
}

#[async_trait]
impl JobRunner for MemoryRunner {
    async fn schedule_once(
        &self,
        key: JobKey,
        run_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if self.fail_schedule {
            return Err(SchedulerError::Runner("runner unavailable".to_string()));
        }
        self.jobs.lock().await.insert(key, run_at);
        Ok(())
    }

    async fn cancel(&self, key: &JobKey) -> Result<(), SchedulerError> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(SchedulerError::Runner("cancel refused".to_string()));
        }
        self.jobs.lock().await.remove(key);
        Ok(())
    }

    async fn armed(&self) -> Vec<(JobKey, DateTime<Utc>)> {
        let mut armed: Vec<_> = self.jobs.lock().await.iter().map(|(k, v)| (*k, *v)).collect();
        armed.sort_by_key(|(key, run_at)| (*run_at, key.event_id));
        armed
    }
}

/// Records messages instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, String)>>,
    unreachable: HashSet<i64>,
}

impl RecordingNotifier {
    pub fn unreachable(ids: &[i64]) -> Self {
        Self {
            unreachable: ids.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub async fn messages(&self) -> Vec<(i64, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, telegram_id: i64, text: &str) -> Result<(), NotifyError> {
        if self.unreachable.contains(&telegram_id) {
            return Err(NotifyError::Unreachable(telegram_id));
        }
        self.sent.lock().await.push((telegram_id, text.to_string()));
        Ok(())
    }
}


use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, FromRow, Row, Sqlite, SqliteConnection};

use super::{decimal_column, timestamp_to_sql, utc_column, GENERAL_ACTIVITY_ID};

/// Internal id of the treasury account that collects fees and demurrage.
pub const FUND_USER_ID: i64 = 0;
/// Handle users type to address the treasury, e.g. `/send fund 10`.
pub const FUND_USERNAME: &str = "fund";

const USER_COLUMNS: &str =
    "id, telegram_id, username, balance, is_admin, transaction_count, grace_credit_used, \
     created_at";
const JOINED_USER_COLUMNS: &str =
    "u.id, u.telegram_id, u.username, u.balance, u.is_admin, u.transaction_count, \
     u.grace_credit_used, u.created_at";

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("balance of user {user_id} cannot absorb {delta}")]
    Overflow { user_id: i64, delta: Decimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub balance: Decimal,
    pub is_admin: bool,
    pub transaction_count: i64,
    pub grace_credit_used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendDecision {
    Covered,
    GraceCredit,
    Refused,
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            telegram_id: row.try_get("telegram_id")?,
            username: row.try_get("username")?,
            balance: decimal_column(row, "balance")?,
            is_admin: row.try_get("is_admin")?,
            transaction_count: row.try_get("transaction_count")?,
            grace_credit_used: row.try_get("grace_credit_used")?,
            created_at: utc_column(row, "created_at")?,
        })
    }
}

pub fn normalize_username(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

impl User {
    pub fn is_fund(&self) -> bool {
        self.id == FUND_USER_ID
    }

    /// The fund has no chat to deliver messages to.
    pub fn receives_notifications(&self) -> bool {
        !self.is_fund()
    }

    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => format!("ID:{}", self.telegram_id),
        }
    }

    /// Decides whether `amount` may leave this account.
    ///
    /// A member whose balance does not cover the amount may still spend it once,
    /// as long as the resulting debt stays within `grace_limit`. The fund never
    /// gets grace credit.
    pub fn spend_decision(&self, amount: Decimal, grace_limit: Decimal) -> SpendDecision {
        if self.balance >= amount {
            return SpendDecision::Covered;
        }
        if self.is_fund() || self.grace_credit_used || grace_limit <= Decimal::ZERO {
            return SpendDecision::Refused;
        }
        if self.balance - amount >= -grace_limit {
            SpendDecision::GraceCredit
        } else {
            SpendDecision::Refused
        }
    }

    /// Both inserts run on `conn`; pass a transaction to make them atomic.
    pub async fn create(
        conn: &mut SqliteConnection,
        telegram_id: i64,
        username: Option<&str>,
        is_admin: bool,
    ) -> Result<Self, sqlx::Error> {
        let now = timestamp_to_sql(Utc::now());
        let username = username.map(normalize_username);

        let id = sqlx::query(
            "INSERT INTO users (telegram_id, username, is_admin, created_at) VALUES (?, ?, ?, ?)"
        )
        .bind(telegram_id)
        .bind(&username)
        .bind(is_admin)
        .bind(&now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "INSERT OR IGNORE INTO user_subscriptions (user_id, activity_id, subscribed_at) \
             VALUES (?, ?, ?)"
        )
        .bind(id)
        .bind(GENERAL_ACTIVITY_ID)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        Self::find_by_id(&mut *conn, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_telegram_id<'e, E>(
        executor: E,
        telegram_id: i64,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?"
        ))
            .bind(telegram_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_username<'e, E>(
        executor: E,
        username: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let username = normalize_username(username);
        if username == FUND_USERNAME {
            return Self::find_by_id(executor, FUND_USER_ID).await;
        }
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
            .bind(username)
            .fetch_optional(executor)
            .await
    }

    pub async fn fund<'e, E>(executor: E) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        Self::find_by_id(executor, FUND_USER_ID)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn list_members<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(FUND_USER_ID)
        .fetch_all(executor)
        .await
    }

    pub async fn list_positive_balances<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let members = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ? ORDER BY id"
        ))
        .bind(FUND_USER_ID)
        .fetch_all(executor)
        .await?;

        // Balances are TEXT, so the sign test happens on the decoded decimal.
        Ok(members
            .into_iter()
            .filter(|user| user.balance > Decimal::ZERO)
            .collect())
    }

    /// Users an event of `activity_id` is addressed to, in id order.
    ///
    /// The general activity reaches every member; any other activity reaches
    /// its subscribers. The fund is never part of an audience.
    pub async fn audience_for_activity<'e, E>(
        executor: E,
        activity_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if activity_id == GENERAL_ACTIVITY_ID {
            return sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id != ? ORDER BY id"
            ))
            .bind(FUND_USER_ID)
            .fetch_all(executor)
            .await;
        }

        sqlx::query_as::<_, User>(&format!(
            "SELECT {JOINED_USER_COLUMNS} FROM users u \
             JOIN user_subscriptions s ON s.user_id = u.id \
             WHERE s.activity_id = ? AND u.id != ? ORDER BY u.id"
        ))
        .bind(activity_id)
        .bind(FUND_USER_ID)
        .fetch_all(executor)
        .await
    }

    pub async fn adjust_balance(
        conn: &mut SqliteConnection,
        id: i64,
        delta: Decimal,
    ) -> Result<Decimal, BalanceError> {
        let current = sqlx::query_scalar::<_, String>("SELECT balance FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        let current: Decimal = current.trim().parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "balance".to_string(),
            source: Box::new(e),
        })?;

        let updated = current
            .checked_add(delta)
            .ok_or(BalanceError::Overflow { user_id: id, delta })?;
        sqlx::query("UPDATE users SET balance = ? WHERE id = ?")
            .bind(updated.normalize().to_string())
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(updated)
    }

    pub async fn increment_tx_count<'e, E>(executor: E, ids: &[i64]) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "UPDATE users SET transaction_count = transaction_count + 1 \
             WHERE id IN ({placeholders})"
        );

        let mut query_builder = sqlx::query(&query);
        for id in ids {
            query_builder = query_builder.bind(id);
        }
        query_builder.execute(executor).await?;
        Ok(())
    }

    pub async fn set_grace_credit_used<'e, E>(
        executor: E,
        id: i64,
        used: bool,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE users SET grace_credit_used = ? WHERE id = ?")
            .bind(used)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn set_username<'e, E>(
        executor: E,
        id: i64,
        username: Option<&str>,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE users SET username = ? WHERE id = ?")
            .bind(username.map(normalize_username))
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Takes `username` away from any account other than `telegram_id`'s.
    /// Telegram handles can be given up and claimed by someone else.
    pub async fn release_username<'e, E>(
        executor: E,
        username: &str,
        telegram_id: i64,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE users SET username = NULL WHERE username = ? AND telegram_id != ? AND id != ?"
        )
        .bind(normalize_username(username))
        .bind(telegram_id)
        .bind(FUND_USER_ID)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_admin<'e, E>(executor: E, id: i64, is_admin: bool) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE users SET is_admin = ? WHERE id = ?")
            .bind(is_admin)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, FromRow, Row, Sqlite};
use std::fmt;
use std::str::FromStr;

use super::{decimal_column, invalid_value, timestamp_to_sql, utc_column};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    ManualAdd,
    ManualRem,
    Transfer,
    FundPayment,
    WelcomeBonus,
    TopUp,
    EventFee,
    Demurrage,
}

impl TransactionType {
    pub const ALL: [TransactionType; 8] = [
        TransactionType::ManualAdd,
        TransactionType::ManualRem,
        TransactionType::Transfer,
        TransactionType::FundPayment,
        TransactionType::WelcomeBonus,
        TransactionType::TopUp,
        TransactionType::EventFee,
        TransactionType::Demurrage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::ManualAdd => "manual_add",
            TransactionType::ManualRem => "manual_rem",
            TransactionType::Transfer => "transfer",
            TransactionType::FundPayment => "fund_payment",
            TransactionType::WelcomeBonus => "welcome_bonus",
            TransactionType::TopUp => "top_up",
            TransactionType::EventFee => "event_fee",
            TransactionType::Demurrage => "demurrage",
        }
    }

    /// Money is created: the sender side is not debited.
    pub fn is_issuance(&self) -> bool {
        matches!(
            self,
            TransactionType::ManualAdd | TransactionType::WelcomeBonus | TransactionType::TopUp
        )
    }

    /// Money is destroyed: the receiver side is not credited.
    pub fn is_burn(&self) -> bool {
        matches!(self, TransactionType::ManualRem)
    }

    pub fn debits_sender(&self) -> bool {
        !self.is_issuance()
    }

    pub fn credits_receiver(&self) -> bool {
        !self.is_burn()
    }

    /// Demurrage is a tax, not activity; it leaves the counters alone.
    pub fn counts_toward_activity(&self) -> bool {
        !matches!(self, TransactionType::Demurrage)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown transaction type '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub amount: Decimal,
    pub kind: TransactionType,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Transaction {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_type: String = row.try_get("type")?;
        Ok(Self {
            id: row.try_get("id")?,
            from_user_id: row.try_get("from_user_id")?,
            to_user_id: row.try_get("to_user_id")?,
            amount: decimal_column(row, "amount")?,
            kind: raw_type.parse().map_err(|_| invalid_value("type", &raw_type))?,
            comment: row.try_get("comment")?,
            created_at: utc_column(row, "created_at")?,
        })
    }
}

/// A transaction joined with both parties' handles, as shown in `/history`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub transaction: Transaction,
    pub from_username: Option<String>,
    pub to_username: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for HistoryEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            transaction: Transaction::from_row(row)?,
            from_username: row.try_get("from_username")?,
            to_username: row.try_get("to_username")?,
        })
    }
}

impl Transaction {
    /// Appends a ledger row. Rows are never updated or deleted afterwards.
    pub async fn insert<'e, E>(
        executor: E,
        from_user_id: i64,
        to_user_id: i64,
        amount: Decimal,
        kind: TransactionType,
        comment: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (from_user_id, to_user_id, amount, type, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(amount.normalize().to_string())
        .bind(kind.as_str())
        .bind(comment)
        .bind(timestamp_to_sql(created_at))
        .execute(executor)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn history_for<'e, E>(
        executor: E,
        user_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT t.id, t.from_user_id, t.to_user_id, t.amount, t.type, t.comment, t.created_at,
                   f.username AS from_username, r.username AS to_username
            FROM transactions t
            JOIN users f ON f.id = t.from_user_id
            JOIN users r ON r.id = t.to_user_id
            WHERE (t.from_user_id = ? OR t.to_user_id = ?) AND t.created_at >= ?
            ORDER BY t.created_at DESC, t.id DESC
            LIMIT ?
            "#
        )
        .bind(user_id)
        .bind(user_id)
        .bind(timestamp_to_sql(since))
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    pub async fn list_by_type<'e, E>(
        executor: E,
        kind: TransactionType,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Transaction>(
            "SELECT id, from_user_id, to_user_id, amount, type, comment, created_at \
             FROM transactions WHERE type = ? ORDER BY id"
        )
        .bind(kind.as_str())
        .fetch_all(executor)
        .await
    }

    /// Sum of `kind` amounts created at or after `since` (all time for `None`).
    pub async fn turnover<'e, E>(
        executor: E,
        kind: TransactionType,
        since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let since = since.map(timestamp_to_sql).unwrap_or_default();
        let amounts = sqlx::query_scalar::<_, String>(
            "SELECT amount FROM transactions WHERE type = ? AND created_at >= ?"
        )
        .bind(kind.as_str())
        .bind(since)
        .fetch_all(executor)
        .await?;

        amounts.iter().try_fold(Decimal::ZERO, |total, raw| {
            raw.trim()
                .parse::<Decimal>()
                .map(|amount| total + amount)
                .map_err(|_| invalid_value("amount", raw))
        })
    }
}

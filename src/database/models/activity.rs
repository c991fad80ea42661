use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, FromRow, QueryBuilder, Row, Sqlite};

use super::{timestamp_to_sql, utc_column};

/// The organisation-wide activity every user is subscribed to.
pub const GENERAL_ACTIVITY_ID: i64 = 1;

const ACTIVITY_COLUMNS: &str = "id, name, description, end_date, is_active, created_at";
const END_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Activity {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let end_date: Option<String> = row.try_get("end_date")?;
        let end_date = end_date
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, END_DATE_FORMAT).map_err(|e| {
                    sqlx::Error::ColumnDecode {
                        index: "end_date".to_string(),
                        source: Box::new(e),
                    }
                })
            })
            .transpose()?;

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            end_date,
            is_active: row.try_get("is_active")?,
            created_at: utc_column(row, "created_at")?,
        })
    }
}

impl Activity {
    pub fn is_general(&self) -> bool {
        self.id == GENERAL_ACTIVITY_ID
    }

    pub fn allows_unsubscribe(activity_id: i64) -> bool {
        activity_id != GENERAL_ACTIVITY_ID
    }

    pub fn allows_delete(activity_id: i64) -> bool {
        activity_id != GENERAL_ACTIVITY_ID
    }

    pub async fn create<'e, E>(
        executor: E,
        name: &str,
        description: &str,
        end_date: Option<NaiveDate>,
    ) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT INTO activities (name, description, end_date, created_at) VALUES (?, ?, ?, ?)"
        )
        .bind(name.trim())
        .bind(description.trim())
        .bind(end_date.map(|date| date.format(END_DATE_FORMAT).to_string()))
        .bind(timestamp_to_sql(Utc::now()))
        .execute(executor)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Activity>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn list_active<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Activity>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE is_active = 1 ORDER BY id"
        ))
        .fetch_all(executor)
        .await
    }

    pub async fn update<'e, E>(
        executor: E,
        id: i64,
        changes: &ActivityChanges,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if changes.is_empty() {
            return Ok(false);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE activities SET ");
        {
            let mut fields = builder.separated(", ");
            if let Some(name) = &changes.name {
                fields.push("name = ").push_bind_unseparated(name.trim().to_string());
            }
            if let Some(description) = &changes.description {
                fields.push("description = ").push_bind_unseparated(description.trim().to_string());
            }
            if let Some(end_date) = changes.end_date {
                let end_date = end_date.map(|date| date.format(END_DATE_FORMAT).to_string());
                fields.push("end_date = ").push_bind_unseparated(end_date);
            }
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder.build().execute(executor).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes the activity; its events and subscriptions cascade.
    ///
    /// Returns `false` for the general activity or an unknown id. Callers must
    /// disarm the activity's events before calling this.
    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if !Self::allows_delete(id) {
            tracing::warn!("Refusing to delete the general activity");
            return Ok(false);
        }

        let result = sqlx::query("DELETE FROM activities WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn subscribe<'e, E>(
        executor: E,
        user_id: i64,
        activity_id: i64,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_subscriptions (user_id, activity_id, subscribed_at) \
             VALUES (?, ?, ?)"
        )
        .bind(user_id)
        .bind(activity_id)
        .bind(timestamp_to_sql(Utc::now()))
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The general activity is never left.
    pub async fn unsubscribe<'e, E>(
        executor: E,
        user_id: i64,
        activity_id: i64,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if !Self::allows_unsubscribe(activity_id) {
            tracing::warn!("User {} tried to unsubscribe from the general activity", user_id);
            return Ok(false);
        }

        let result =
            sqlx::query("DELETE FROM user_subscriptions WHERE user_id = ? AND activity_id = ?")
                .bind(user_id)
                .bind(activity_id)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn subscribed_ids<'e, E>(executor: E, user_id: i64) -> Result<Vec<i64>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT activity_id FROM user_subscriptions WHERE user_id = ? ORDER BY activity_id"
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }
}

/// Fields to overwrite on an activity. `end_date: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub end_date: Option<Option<NaiveDate>>,
}

impl ActivityChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.end_date.is_none()
    }
}

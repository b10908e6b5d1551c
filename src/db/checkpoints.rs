/// Checkpoint repository
use crate::{
    db::{self, models::Checkpoint},
    error::{PayflowError, PayflowResult},
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct CheckpointRepository {
    db: SqlitePool,
}

impl CheckpointRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, account_id: &str) -> PayflowResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|row| {
            let last: Option<String> = row.get("last_processed_changed_at");
            let metadata: Option<String> = row.get("metadata");
            Ok(Checkpoint {
                account_id: row.get("account_id"),
                last_processed_changed_at: last.as_deref().map(db::parse_utc).transpose()?,
                updated_at: db::parse_utc(&row.get::<String, _>("updated_at"))?,
                metadata: metadata
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| {
                        PayflowError::Internal(format!("Corrupt checkpoint metadata: {}", e))
                    })?,
            })
        })
        .transpose()
    }

    pub async fn create(
        &self,
        account_id: &str,
        watermark: DateTime<Utc>,
    ) -> PayflowResult<Checkpoint> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO checkpoints (account_id, last_processed_changed_at, updated_at)
             VALUES (?1, ?2, ?3)",
        )
        .bind(account_id)
        .bind(db::format_utc(watermark))
        .bind(db::format_utc(now))
        .execute(&self.db)
        .await?;

        Ok(Checkpoint {
            account_id: account_id.to_string(),
            last_processed_changed_at: Some(watermark),
            updated_at: now,
            metadata: None,
        })
    }

    /// Move the watermark forward. Callers guarantee monotonicity by
    /// only advancing to `now` after a completed cycle.
    pub async fn advance(&self, account_id: &str, watermark: DateTime<Utc>) -> PayflowResult<()> {
        let now = db::format_utc(Utc::now());
        sqlx::query(
            "UPDATE checkpoints
             SET last_processed_changed_at = ?1, updated_at = ?2
             WHERE account_id = ?3",
        )
        .bind(db::format_utc(watermark))
        .bind(&now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

/// Delivery attempt audit log
///
/// Append-only. Nothing in the pipeline reads this back; it exists
/// for operators.
use crate::{
    db::{self, models::AttemptStatus},
    error::PayflowResult,
};
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct AuditRepository {
    db: SqlitePool,
}

impl AuditRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn log_attempt(
        &self,
        account_id: &str,
        receipt_id: &str,
        recipient_email: &str,
        status: AttemptStatus,
        error_message: Option<&str>,
    ) -> PayflowResult<()> {
        sqlx::query(
            "INSERT INTO delivery_attempts
                 (account_id, receipt_id, recipient_email, status, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(account_id)
        .bind(receipt_id)
        .bind(recipient_email)
        .bind(status.as_str())
        .bind(error_message)
        .bind(db::format_utc(Utc::now()))
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn records_success_and_failure() {
        let pool = db::test_pool().await;
        let audit = AuditRepository::new(pool.clone());

        audit
            .log_attempt("acc-1", "att-1", "doc@example.com", AttemptStatus::Sent, None)
            .await
            .unwrap();
        audit
            .log_attempt(
                "acc-1",
                "att-2",
                "doc@example.com",
                AttemptStatus::Failed,
                Some("SMTP send failed"),
            )
            .await
            .unwrap();

        let rows = sqlx::query("SELECT status, error_message FROM delivery_attempts ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<String, _>("status"), "sent");
        assert_eq!(
            rows[1].get::<Option<String>, _>("error_message").as_deref(),
            Some("SMTP send failed")
        );
    }
}

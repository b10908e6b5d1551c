/// Idempotency ledger repository
///
/// One row per successfully delivered receipt, uniquely keyed by
/// (account_id, installment_id, attachment_url). The SQL constraint,
/// not the application check, is the delivery guarantee: a racing
/// insert loses cleanly.
use crate::{
    db::{self, models::DeliveryRecord},
    error::PayflowResult,
};
use sqlx::{Row, SqlitePool};

/// Outcome of a ledger insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Unique key already present: another processor delivered first.
    AlreadyDelivered,
}

#[derive(Clone)]
pub struct LedgerRepository {
    db: SqlitePool,
}

impl LedgerRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Point lookup on the unique delivery key
    pub async fn already_delivered(
        &self,
        account_id: &str,
        installment_id: &str,
        attachment_url: &str,
    ) -> PayflowResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM delivery_records
             WHERE account_id = ?1 AND installment_id = ?2 AND attachment_url = ?3",
        )
        .bind(account_id)
        .bind(installment_id)
        .bind(attachment_url)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.is_some())
    }

    /// Insert the terminal record of a successful delivery.
    ///
    /// A unique-constraint violation means a concurrent processor won
    /// the race; that is the idempotency contract working, not an
    /// error.
    pub async fn record(&self, entry: &DeliveryRecord) -> PayflowResult<RecordOutcome> {
        let metadata = entry
            .metadata
            .as_ref()
            .map(|m| m.to_string());

        let result = sqlx::query(
            "INSERT INTO delivery_records
                 (account_id, installment_id, attachment_url, recipient_email, sent_at, content_hash, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&entry.account_id)
        .bind(&entry.installment_id)
        .bind(&entry.attachment_url)
        .bind(&entry.recipient_email)
        .bind(db::format_utc(entry.sent_at))
        .bind(&entry.content_hash)
        .bind(&metadata)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(RecordOutcome::Recorded),
            Err(e) if db::is_unique_violation(&e) => Ok(RecordOutcome::AlreadyDelivered),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn count_for_account(&self, account_id: &str) -> PayflowResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM delivery_records WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(&self.db)
            .await?;

        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(account: &str, installment: &str, url: &str) -> DeliveryRecord {
        DeliveryRecord {
            account_id: account.to_string(),
            installment_id: installment.to_string(),
            attachment_url: url.to_string(),
            recipient_email: "doc@example.com".to_string(),
            sent_at: Utc::now(),
            content_hash: Some("abc".to_string()),
            metadata: Some(serde_json::json!({"customer_name": "Acme Corp"})),
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_noop() {
        let pool = db::test_pool().await;
        let ledger = LedgerRepository::new(pool);

        let e = entry("acc-1", "inst-1", "https://api.contaazul.com/a1.pdf");
        assert_eq!(ledger.record(&e).await.unwrap(), RecordOutcome::Recorded);
        assert_eq!(
            ledger.record(&e).await.unwrap(),
            RecordOutcome::AlreadyDelivered
        );
        assert_eq!(ledger.count_for_account("acc-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn key_is_the_full_triple() {
        let pool = db::test_pool().await;
        let ledger = LedgerRepository::new(pool);

        let base = entry("acc-1", "inst-1", "https://api.contaazul.com/a1.pdf");
        ledger.record(&base).await.unwrap();

        let other_installment = entry("acc-1", "inst-2", "https://api.contaazul.com/a1.pdf");
        let other_url = entry("acc-1", "inst-1", "https://api.contaazul.com/a2.pdf");
        let other_account = entry("acc-2", "inst-1", "https://api.contaazul.com/a1.pdf");

        for e in [&other_installment, &other_url, &other_account] {
            assert_eq!(ledger.record(e).await.unwrap(), RecordOutcome::Recorded);
        }

        assert!(ledger
            .already_delivered("acc-1", "inst-1", "https://api.contaazul.com/a1.pdf")
            .await
            .unwrap());
        assert!(!ledger
            .already_delivered("acc-1", "inst-3", "https://api.contaazul.com/a1.pdf")
            .await
            .unwrap());
    }
}

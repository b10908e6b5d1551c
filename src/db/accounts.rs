/// Account repository
use crate::{
    db::{self, models::Account},
    error::{PayflowError, PayflowResult},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

/// Narrow CRUD over the accounts table
#[derive(Clone)]
pub struct AccountRepository {
    db: SqlitePool,
}

impl AccountRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// All accounts the poll loop should visit
    pub async fn active(&self) -> PayflowResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE is_active = 1")
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(row_to_account).collect()
    }

    pub async fn get(&self, account_id: &str) -> PayflowResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Soft-deactivate on access revocation; accounts are never deleted.
    pub async fn deactivate(&self, account_id: &str) -> PayflowResult<()> {
        let now = db::format_utc(Utc::now());
        let result = sqlx::query(
            "UPDATE accounts SET is_active = 0, disconnected_at = ?1 WHERE account_id = ?2",
        )
        .bind(&now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PayflowError::NotFound(format!(
                "Account {} not found",
                account_id
            )));
        }

        Ok(())
    }
}

pub(crate) fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> PayflowResult<Account> {
    let metadata: Option<String> = row.get("metadata");
    let disconnected_at: Option<String> = row.get("disconnected_at");

    Ok(Account {
        account_id: row.get("account_id"),
        owner_name: row.get("owner_name"),
        owner_email: row.get("owner_email"),
        company_name: row.get("company_name"),
        is_active: row.get::<i64, _>("is_active") != 0,
        connected_at: db::parse_utc(&row.get::<String, _>("connected_at"))?,
        disconnected_at: disconnected_at.as_deref().map(db::parse_utc).transpose()?,
        metadata: metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| PayflowError::Internal(format!("Corrupt account metadata: {}", e)))?,
    })
}

#[cfg(test)]
pub(crate) async fn insert_account(pool: &SqlitePool, account_id: &str, active: bool) {
    sqlx::query(
        "INSERT INTO accounts (account_id, company_name, is_active, connected_at)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(account_id)
    .bind("Acme Corp")
    .bind(active as i64)
    .bind(db::format_utc(Utc::now()))
    .execute(pool)
    .await
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_filters_deactivated() {
        let pool = db::test_pool().await;
        let repo = AccountRepository::new(pool.clone());

        insert_account(&pool, "acc-1", true).await;
        insert_account(&pool, "acc-2", true).await;

        repo.deactivate("acc-2").await.unwrap();

        let active = repo.active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].account_id, "acc-1");

        let gone = repo.get("acc-2").await.unwrap().unwrap();
        assert!(!gone.is_active);
        assert!(gone.disconnected_at.is_some());
    }

    #[tokio::test]
    async fn deactivate_unknown_account_errors() {
        let pool = db::test_pool().await;
        let repo = AccountRepository::new(pool);
        assert!(repo.deactivate("nope").await.is_err());
    }
}

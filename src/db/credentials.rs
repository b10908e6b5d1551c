/// Credential repository
///
/// Owns the encrypted OAuth token pair rows. The token service is the
/// only caller; everything here works on ciphertext.
use crate::{
    db::{self, models::Credential},
    error::PayflowResult,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct CredentialRepository {
    db: SqlitePool,
}

/// Account identity captured during the OAuth callback, persisted
/// together with the token pair.
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub company_name: Option<String>,
}

impl CredentialRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, account_id: &str) -> PayflowResult<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|row| {
            Ok(Credential {
                account_id: row.get("account_id"),
                access_token: row.get("access_token"),
                refresh_token: row.get("refresh_token"),
                expires_at: db::parse_utc(&row.get::<String, _>("expires_at"))?,
                created_at: db::parse_utc(&row.get::<String, _>("created_at"))?,
                updated_at: db::parse_utc(&row.get::<String, _>("updated_at"))?,
            })
        })
        .transpose()
    }

    /// Rotate both token ciphertexts in place.
    ///
    /// Used after a refresh-token exchange: the provider invalidates
    /// the old refresh token, so both values are replaced atomically.
    pub async fn rotate(
        &self,
        account_id: &str,
        access_ciphertext: &str,
        refresh_ciphertext: &str,
        expires_at: DateTime<Utc>,
    ) -> PayflowResult<()> {
        let now = db::format_utc(Utc::now());
        sqlx::query(
            "UPDATE credentials
             SET access_token = ?1, refresh_token = ?2, expires_at = ?3, updated_at = ?4
             WHERE account_id = ?5",
        )
        .bind(access_ciphertext)
        .bind(refresh_ciphertext)
        .bind(db::format_utc(expires_at))
        .bind(&now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Upsert credential and account rows in one transaction.
    ///
    /// Either both writes commit or neither does.
    pub async fn save_with_account(
        &self,
        account_id: &str,
        access_ciphertext: &str,
        refresh_ciphertext: &str,
        expires_at: DateTime<Utc>,
        profile: &AccountProfile,
    ) -> PayflowResult<()> {
        let now = db::format_utc(Utc::now());
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO accounts (account_id, owner_name, owner_email, company_name, is_active, connected_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT (account_id) DO UPDATE SET
                 owner_name = excluded.owner_name,
                 owner_email = excluded.owner_email,
                 company_name = excluded.company_name,
                 is_active = 1,
                 disconnected_at = NULL",
        )
        .bind(account_id)
        .bind(&profile.owner_name)
        .bind(&profile.owner_email)
        .bind(&profile.company_name)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO credentials (account_id, access_token, refresh_token, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (account_id) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at,
                 updated_at = excluded.updated_at",
        )
        .bind(account_id)
        .bind(access_ciphertext)
        .bind(refresh_ciphertext)
        .bind(db::format_utc(expires_at))
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn save_creates_account_and_credential_together() {
        let pool = db::test_pool().await;
        let repo = CredentialRepository::new(pool.clone());

        let expires = Utc::now() + Duration::hours(1);
        repo.save_with_account(
            "acc-1",
            "enc-access",
            "enc-refresh",
            expires,
            &AccountProfile {
                company_name: Some("Acme Corp".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let cred = repo.get("acc-1").await.unwrap().unwrap();
        assert_eq!(cred.access_token, "enc-access");
        assert_eq!(cred.expires_at, expires);

        let account: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE account_id = 'acc-1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(account.0, 1);
    }

    #[tokio::test]
    async fn save_upserts_and_reactivates() {
        let pool = db::test_pool().await;
        let repo = CredentialRepository::new(pool.clone());
        let accounts = crate::db::accounts::AccountRepository::new(pool.clone());

        let expires = Utc::now() + Duration::hours(1);
        let profile = AccountProfile::default();
        repo.save_with_account("acc-1", "a1", "r1", expires, &profile)
            .await
            .unwrap();
        accounts.deactivate("acc-1").await.unwrap();

        repo.save_with_account("acc-1", "a2", "r2", expires, &profile)
            .await
            .unwrap();

        let cred = repo.get("acc-1").await.unwrap().unwrap();
        assert_eq!(cred.refresh_token, "r2");

        let account = accounts.get("acc-1").await.unwrap().unwrap();
        assert!(account.is_active);
        assert!(account.disconnected_at.is_none());
    }

    #[tokio::test]
    async fn rotate_replaces_both_tokens() {
        let pool = db::test_pool().await;
        let repo = CredentialRepository::new(pool);

        let expires = Utc::now() + Duration::hours(1);
        repo.save_with_account("acc-1", "a1", "r1", expires, &AccountProfile::default())
            .await
            .unwrap();

        let new_expiry = Utc::now() + Duration::hours(2);
        repo.rotate("acc-1", "a2", "r2", new_expiry).await.unwrap();

        let cred = repo.get("acc-1").await.unwrap().unwrap();
        assert_eq!(cred.access_token, "a2");
        assert_eq!(cred.refresh_token, "r2");
        assert_eq!(cred.expires_at, new_expiry);
    }
}

/// Token lifecycle service
///
/// The only component that sees plaintext OAuth tokens. Everything is
/// encrypted before it reaches the credential repository and decrypted
/// transiently per use; plaintext is never logged or persisted.
use crate::{
    crypto::SecretCipher,
    db::{
        credentials::{AccountProfile, CredentialRepository},
        models::Credential,
    },
    error::{PayflowError, PayflowResult},
    provider::oauth::{OAuthClient, TokenResponse},
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct TokenService {
    credentials: CredentialRepository,
    cipher: SecretCipher,
    oauth: Arc<OAuthClient>,
}

impl TokenService {
    pub fn new(
        credentials: CredentialRepository,
        cipher: SecretCipher,
        oauth: Arc<OAuthClient>,
    ) -> Self {
        Self {
            credentials,
            cipher,
            oauth,
        }
    }

    /// Encrypt and persist a fresh token pair from the OAuth flow.
    pub async fn save_tokens(
        &self,
        account_id: &str,
        tokens: &TokenResponse,
        profile: &AccountProfile,
    ) -> PayflowResult<()> {
        let access_ct = self.cipher.encrypt(&tokens.access_token)?;
        let refresh_ct = self.cipher.encrypt(&tokens.refresh_token)?;
        let expires_at = Utc::now() + Duration::seconds(tokens.expires_in);

        self.credentials
            .save_with_account(account_id, &access_ct, &refresh_ct, expires_at, profile)
            .await?;

        info!(account_id = %account_id, "Stored encrypted token pair");
        Ok(())
    }

    pub async fn get_credential(&self, account_id: &str) -> PayflowResult<Option<Credential>> {
        self.credentials.get(account_id).await
    }

    /// The plaintext access token, but only while the stored pair is
    /// unexpired. Expiry is strict; refreshing is a separate, explicit
    /// operation.
    pub async fn access_token_if_valid(&self, account_id: &str) -> PayflowResult<Option<String>> {
        let credential = self.require_credential(account_id).await?;

        if credential.is_expired(Utc::now()) {
            return Ok(None);
        }
        self.cipher.decrypt(&credential.access_token).map(Some)
    }

    /// A usable plaintext access token for the account, refreshing
    /// the pair first if the stored one has expired.
    pub async fn access_token(&self, account_id: &str) -> PayflowResult<String> {
        match self.access_token_if_valid(account_id).await? {
            Some(token) => Ok(token),
            None => self.refresh(account_id).await,
        }
    }

    /// Exchange the stored refresh token for a new pair and rotate
    /// both ciphertexts. On any failure the stored pair is untouched.
    pub async fn refresh(&self, account_id: &str) -> PayflowResult<String> {
        let credential = self.require_credential(account_id).await?;
        let refresh_plain = self.cipher.decrypt(&credential.refresh_token)?;

        let tokens = match self.oauth.refresh_tokens(&refresh_plain).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Token refresh failed");
                return Err(e);
            }
        };

        let access_ct = self.cipher.encrypt(&tokens.access_token)?;
        let refresh_ct = self.cipher.encrypt(&tokens.refresh_token)?;
        let expires_at = Utc::now() + Duration::seconds(tokens.expires_in);

        self.credentials
            .rotate(account_id, &access_ct, &refresh_ct, expires_at)
            .await?;

        info!(account_id = %account_id, "Rotated token pair");
        Ok(tokens.access_token)
    }

    async fn require_credential(&self, account_id: &str) -> PayflowResult<Credential> {
        self.credentials
            .get(account_id)
            .await?
            .ok_or_else(|| PayflowError::NotFound(format!("No credentials for {}", account_id)))
    }
}

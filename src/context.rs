/// Application context
///
/// Built once at startup and cloned into handlers and the background
/// worker. Everything inside is cheaply cloneable.
use crate::{
    config::AppConfig,
    crypto::SecretCipher,
    db::{
        self, accounts::AccountRepository, audit::AuditRepository,
        checkpoints::CheckpointRepository, credentials::CredentialRepository,
        ledger::LedgerRepository,
    },
    error::PayflowResult,
    provider::oauth::OAuthClient,
    tokens::TokenService,
    worker::CheckpointStore,
};
use sqlx::SqlitePool;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tracing::info;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: SqlitePool,
    pub cipher: SecretCipher,
    pub oauth: Arc<OAuthClient>,
    pub accounts: AccountRepository,
    pub credentials: CredentialRepository,
    pub ledger: LedgerRepository,
    pub audit: AuditRepository,
    pub checkpoints: CheckpointStore,
    pub tokens: TokenService,
    /// CSRF states issued by /connect and not yet redeemed
    pub pending_states: Arc<Mutex<HashSet<String>>>,
}

impl AppContext {
    pub async fn new(config: AppConfig) -> PayflowResult<Self> {
        config.validate()?;

        let pool = db::create_pool(&config.database.path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        info!(path = %config.database.path.display(), "Database ready");

        let cipher = SecretCipher::from_base64_key(&config.security.master_key)?;
        let oauth = Arc::new(OAuthClient::new(config.provider.clone())?);

        let accounts = AccountRepository::new(pool.clone());
        let credentials = CredentialRepository::new(pool.clone());
        let ledger = LedgerRepository::new(pool.clone());
        let audit = AuditRepository::new(pool.clone());
        let checkpoints =
            CheckpointStore::new(CheckpointRepository::new(pool.clone()), &config.polling);
        let tokens = TokenService::new(credentials.clone(), cipher.clone(), Arc::clone(&oauth));

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            cipher,
            oauth,
            accounts,
            credentials,
            ledger,
            audit,
            checkpoints,
            tokens,
            pending_states: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Remember a CSRF state issued to the browser.
    pub fn issue_state(&self, state: String) {
        if let Ok(mut states) = self.pending_states.lock() {
            states.insert(state);
        }
    }

    /// Redeem a CSRF state from the callback; each state is single-use.
    pub fn redeem_state(&self, state: &str) -> bool {
        match self.pending_states.lock() {
            Ok(mut states) => states.remove(state),
            Err(_) => false,
        }
    }
}

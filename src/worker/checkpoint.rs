/// Per-account polling watermarks
///
/// The watermark is the instant up to which changes have been fully
/// processed. Queries always subtract a safety window so rows the
/// provider indexed late are seen again; the idempotency ledger makes
/// the resulting re-reads harmless.
use crate::{
    config::PollingConfig,
    db::checkpoints::CheckpointRepository,
    error::PayflowResult,
};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

#[derive(Clone)]
pub struct CheckpointStore {
    repo: CheckpointRepository,
    initial_lookback: Duration,
    safety_window: Duration,
}

impl CheckpointStore {
    pub fn new(repo: CheckpointRepository, config: &PollingConfig) -> Self {
        Self {
            repo,
            initial_lookback: Duration::days(config.initial_lookback_days),
            safety_window: Duration::minutes(config.safety_window_minutes),
        }
    }

    /// The lower bound for the next change query: the stored watermark
    /// minus the safety window. A first-time account gets a watermark
    /// seeded at now minus the initial lookback.
    pub async fn changed_since(&self, account_id: &str) -> PayflowResult<DateTime<Utc>> {
        let watermark = match self.repo.get(account_id).await? {
            Some(checkpoint) => match checkpoint.last_processed_changed_at {
                Some(watermark) => watermark,
                None => self.seed(account_id).await?,
            },
            None => {
                let seeded = Utc::now() - self.initial_lookback;
                info!(account_id = %account_id, watermark = %seeded, "Seeding checkpoint");
                self.repo.create(account_id, seeded).await?;
                seeded
            }
        };

        Ok(watermark - self.safety_window)
    }

    async fn seed(&self, account_id: &str) -> PayflowResult<DateTime<Utc>> {
        let seeded = Utc::now() - self.initial_lookback;
        self.repo.advance(account_id, seeded).await?;
        Ok(seeded)
    }

    /// Persist a new watermark after a fully successful cycle.
    pub async fn advance(&self, account_id: &str, watermark: DateTime<Utc>) -> PayflowResult<()> {
        self.repo.advance(account_id, watermark).await
    }
}

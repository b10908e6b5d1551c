/// The receipt delivery pipeline
///
/// One cycle per account: query settled receivables changed since the
/// checkpoint, walk receivable -> installment -> attachment, email
/// each undelivered receipt, and advance the watermark once the fetch
/// completed. The ledger, not the checkpoint, is the duplicate-send
/// guard, so every step is idempotent and crashing or re-running
/// anywhere is safe.
use crate::{
    db::{
        accounts::AccountRepository,
        audit::AuditRepository,
        ledger::{LedgerRepository, RecordOutcome},
        models::{Account, AttemptStatus, DeliveryRecord},
    },
    error::{PayflowError, PayflowResult},
    mailer::{self, ReceiptEmail, ReceiptMailer},
    provider::{FinancialApi, Receivable},
    tokens::TokenService,
    worker::{checkpoint::CheckpointStore, downloader},
};
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Statuses that mean an installment has been paid.
const SETTLED_STATUSES: &[&str] = &["received", "paid", "settled", "recebido", "recebido_parcial"];

/// Builds a provider client bound to one account's access token.
pub type ApiFactory = Arc<dyn Fn(String) -> PayflowResult<Arc<dyn FinancialApi>> + Send + Sync>;

/// Counters for one polling cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub delivered: usize,
    pub errors: usize,
}

impl CycleStats {
    fn absorb(&mut self, other: CycleStats) {
        self.delivered += other.delivered;
        self.errors += other.errors;
    }
}

pub struct FinancialProcessor {
    accounts: AccountRepository,
    tokens: TokenService,
    checkpoints: CheckpointStore,
    ledger: LedgerRepository,
    audit: AuditRepository,
    mailer: Arc<dyn ReceiptMailer>,
    api_factory: ApiFactory,
    recipient_fallback: HashMap<String, String>,
}

impl FinancialProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: AccountRepository,
        tokens: TokenService,
        checkpoints: CheckpointStore,
        ledger: LedgerRepository,
        audit: AuditRepository,
        mailer: Arc<dyn ReceiptMailer>,
        api_factory: ApiFactory,
        recipient_fallback: HashMap<String, String>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            checkpoints,
            ledger,
            audit,
            mailer,
            api_factory,
            recipient_fallback,
        }
    }

    /// Run one polling cycle over every active account. Failures are
    /// isolated per account; one broken integration never stalls the
    /// others. Shutdown is honored between accounts, never mid-account.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> CycleStats {
        let accounts = match self.accounts.active().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "Could not list active accounts");
                return CycleStats {
                    delivered: 0,
                    errors: 1,
                };
            }
        };

        let mut stats = CycleStats::default();
        for account in &accounts {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping cycle between accounts");
                break;
            }
            match self.process_account(account).await {
                Ok(account_stats) => stats.absorb(account_stats),
                Err(e) => {
                    error!(account_id = %account.account_id, error = %e, "Account cycle failed");
                    stats.errors += 1;
                }
            }
        }

        if stats.delivered > 0 || stats.errors > 0 {
            info!(
                accounts = accounts.len(),
                delivered = stats.delivered,
                errors = stats.errors,
                "Polling cycle finished"
            );
        }
        stats
    }

    async fn process_account(&self, account: &Account) -> PayflowResult<CycleStats> {
        let account_id = &account.account_id;
        let changed_since = self.checkpoints.changed_since(account_id).await?;
        let access_token = self.tokens.access_token(account_id).await?;
        let api = (self.api_factory)(access_token)?;

        // The next watermark is captured before the query so changes
        // that land mid-cycle are seen next time.
        let cycle_start = Utc::now();
        let receivables = api.search_settled_receivables(changed_since).await?;
        debug!(
            account_id = %account_id,
            receivables = receivables.len(),
            changed_since = %changed_since,
            "Processing cycle"
        );

        let mut stats = CycleStats::default();
        for receivable in &receivables {
            match self
                .process_receivable(account_id, api.as_ref(), receivable)
                .await
            {
                Ok(item_stats) => stats.absorb(item_stats),
                Err(e) => {
                    warn!(
                        account_id = %account_id,
                        receivable_id = %receivable.id,
                        error = %e,
                        "Receivable failed, will retry next cycle"
                    );
                    stats.errors += 1;
                }
            }
        }

        // The fetch completed, so the watermark moves regardless of
        // per-item failures; the ledger keeps re-sends from happening.
        // Token and search failures propagate above and skip this.
        self.checkpoints.advance(account_id, cycle_start).await?;

        Ok(stats)
    }

    async fn process_receivable(
        &self,
        account_id: &str,
        api: &dyn FinancialApi,
        receivable: &Receivable,
    ) -> PayflowResult<CycleStats> {
        let details = api.receivable_details(&receivable.id).await?;
        let customer_name = receivable
            .customer_name
            .clone()
            .unwrap_or_else(|| "Cliente".to_string());

        let mut stats = CycleStats::default();
        for installment_ref in &details.installments {
            if !is_settled(installment_ref.status.as_deref()) {
                continue;
            }

            let installment = api.installment_details(&installment_ref.id).await?;

            let Some(recipient) = self.resolve_recipient(&installment.recipient_email, &customer_name)
            else {
                debug!(
                    account_id = %account_id,
                    installment_id = %installment.id,
                    customer = %customer_name,
                    "No recipient resolvable, skipping installment"
                );
                self.audit
                    .log_attempt(
                        account_id,
                        &installment.id,
                        "",
                        AttemptStatus::Skipped,
                        Some("No recipient resolvable"),
                    )
                    .await?;
                continue;
            };

            for attachment in &installment.attachments {
                match self
                    .deliver_attachment(
                        account_id,
                        api,
                        &installment,
                        &attachment.url,
                        &recipient,
                        &customer_name,
                    )
                    .await
                {
                    Ok(Some(())) => stats.delivered += 1,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            account_id = %account_id,
                            installment_id = %installment.id,
                            error = %e,
                            "Attachment delivery failed"
                        );
                        stats.errors += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Installment-level recipient wins; otherwise fall back to the
    /// configured per-customer map; otherwise skip.
    fn resolve_recipient(
        &self,
        installment_recipient: &Option<String>,
        customer_name: &str,
    ) -> Option<String> {
        if let Some(email) = installment_recipient {
            if mailer::is_valid_email(email) {
                return Some(email.clone());
            }
            warn!(recipient = %email, "Ignoring malformed installment recipient");
        }

        self.recipient_fallback
            .get(customer_name)
            .filter(|email| mailer::is_valid_email(email))
            .cloned()
    }

    /// Returns Ok(Some(())) on a fresh delivery, Ok(None) when the
    /// ledger already covers this attachment.
    async fn deliver_attachment(
        &self,
        account_id: &str,
        api: &dyn FinancialApi,
        installment: &crate::provider::InstallmentDetails,
        attachment_url: &str,
        recipient: &str,
        customer_name: &str,
    ) -> PayflowResult<Option<()>> {
        let installment_id = installment.id.as_str();
        if self
            .ledger
            .already_delivered(account_id, installment_id, attachment_url)
            .await?
        {
            return Ok(None);
        }

        let receipt = match downloader::download_receipt(api, attachment_url).await {
            Ok(receipt) => receipt,
            Err(e @ (PayflowError::Ssrf(_) | PayflowError::InvalidReceipt(_))) => {
                // A rejected URL or non-PDF payload will not heal on a
                // retry; skip the attachment and leave an audit trail.
                warn!(
                    account_id = %account_id,
                    installment_id = %installment_id,
                    error = %e,
                    "Attachment rejected, skipping"
                );
                let reason = e.to_string();
                self.audit
                    .log_attempt(
                        account_id,
                        installment_id,
                        recipient,
                        AttemptStatus::Skipped,
                        Some(&reason),
                    )
                    .await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let email = ReceiptEmail {
            recipient: recipient.to_string(),
            customer_name: customer_name.to_string(),
            amount: installment.amount,
            receipt_date: installment.paid_date.clone(),
            filename: receipt.filename.clone(),
            pdf_bytes: receipt.bytes,
        };

        if !self.mailer.send_receipt(&email).await {
            self.audit
                .log_attempt(
                    account_id,
                    installment_id,
                    recipient,
                    AttemptStatus::Failed,
                    Some("SMTP send failed"),
                )
                .await?;
            return Err(PayflowError::Internal(format!(
                "Send failed for installment {}",
                installment_id
            )));
        }

        let record = DeliveryRecord {
            account_id: account_id.to_string(),
            installment_id: installment_id.to_string(),
            attachment_url: attachment_url.to_string(),
            recipient_email: recipient.to_string(),
            sent_at: Utc::now(),
            content_hash: Some(receipt.content_hash),
            metadata: Some(serde_json::json!({ "customer_name": customer_name })),
        };

        match self.ledger.record(&record).await? {
            RecordOutcome::Recorded => {}
            RecordOutcome::AlreadyDelivered => {
                // A concurrent processor won the race after our ledger
                // check; the duplicate email is the accepted cost.
                debug!(
                    account_id = %account_id,
                    installment_id = %installment_id,
                    "Delivery raced, ledger already has this receipt"
                );
            }
        }

        self.audit
            .log_attempt(account_id, installment_id, recipient, AttemptStatus::Sent, None)
            .await?;

        info!(
            account_id = %account_id,
            installment_id = %installment_id,
            recipient = %recipient,
            "Receipt delivered"
        );
        Ok(Some(()))
    }
}

fn is_settled(status: Option<&str>) -> bool {
    status
        .map(|s| SETTLED_STATUSES.contains(&s.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

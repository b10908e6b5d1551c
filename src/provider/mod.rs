/// Conta Azul provider integration
///
/// `oauth` handles the authorization-code and refresh-token grants;
/// `client` is the rate-limited financial API client the worker uses;
/// `ssrf` guards attachment URLs; `retry` is the throttling policy.

pub mod client;
pub mod oauth;
pub mod retry;
pub mod ssrf;

use crate::error::PayflowResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use client::{
    Attachment, FinancialClient, InstallmentDetails, Receivable, ReceivableDetails,
};

/// The financial API surface the processor depends on.
///
/// Implemented by `FinancialClient`; fakes implement it in tests.
#[async_trait]
pub trait FinancialApi: Send + Sync {
    /// Settled receivables changed since the given instant, fully paginated.
    async fn search_settled_receivables(
        &self,
        changed_since: DateTime<Utc>,
    ) -> PayflowResult<Vec<Receivable>>;

    /// Full receivable details, including installments.
    async fn receivable_details(&self, receivable_id: &str) -> PayflowResult<ReceivableDetails>;

    /// Installment details, including attachments.
    async fn installment_details(&self, installment_id: &str) -> PayflowResult<InstallmentDetails>;

    /// SSRF-validated, size-bounded attachment fetch.
    async fn download_attachment(&self, url: &str) -> PayflowResult<Vec<u8>>;
}

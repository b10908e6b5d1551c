/// Conta Azul financial API client
///
/// One client per account, holding that account's bearer token. All
/// API calls share a single in-process rate limiter enforcing a
/// minimum spacing between requests, and retry with exponential
/// backoff when the provider answers 429.
use crate::{
    error::{PayflowError, PayflowResult},
    provider::{
        retry::RetryPolicy,
        ssrf::{self, ALLOWED_ATTACHMENT_DOMAINS},
        FinancialApi,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Fixed page size for the receivables search.
pub const PAGE_SIZE: usize = 100;
/// Hard ceiling on pages fetched in one search, against a provider
/// that never returns a short page.
pub const MAX_PAGES: usize = 100;
/// Largest attachment we will buffer.
pub const MAX_DOWNLOAD_BYTES: usize = 100 * 1024 * 1024;

const API_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Timestamp format the search endpoint expects.
const SEARCH_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A settled receivable from the search endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receivable {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub received_date: Option<String>,
}

/// Receivable detail payload, carrying its installments.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivableDetails {
    pub id: String,
    #[serde(default)]
    pub installments: Vec<InstallmentRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentRef {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Installment detail payload, carrying attachments and the
/// per-installment recipient override.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentDetails {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Recipient embedded on the installment by the upstream system
    #[serde(default, rename = "doctorEmail")]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub paid_date: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default, alias = "data")]
    itens: Vec<Receivable>,
}

pub struct FinancialClient {
    http: reqwest::Client,
    download_http: reqwest::Client,
    api_base_url: String,
    access_token: String,
    limiter: Arc<DirectLimiter>,
    retry: RetryPolicy,
}

impl FinancialClient {
    pub fn new(api_base_url: &str, access_token: String) -> PayflowResult<Self> {
        let http = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;

        // Attachment fetches never follow redirects; a redirect off
        // the allow-list would defeat the URL validation.
        let download_http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            download_http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            access_token,
            limiter: Arc::new(RateLimiter::direct(request_quota())),
            retry: RetryPolicy::default(),
        })
    }

    /// Send a GET with rate limiting and 429 backoff. Other error
    /// statuses map to `Provider { status }` immediately.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> PayflowResult<T> {
        for attempt in 0..self.retry.max_attempts {
            self.limiter.until_ready().await;

            let response = self
                .http
                .get(url)
                .bearer_auth(&self.access_token)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let delay = self.retry.delay_for(attempt);
                warn!(
                    url = %url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Provider throttled request, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            if !status.is_success() {
                return Err(PayflowError::Provider {
                    status: status.as_u16(),
                });
            }

            return Ok(response.json().await?);
        }

        Err(PayflowError::RateLimited)
    }

    fn search_params(changed_since: DateTime<Utc>, page: usize) -> Vec<(String, String)> {
        let now = Utc::now();
        // The due-date window brackets anything that could plausibly
        // have settled within the change window.
        let due_from = changed_since - ChronoDuration::days(365);
        let due_to = now + ChronoDuration::days(1);

        vec![
            (
                "data_alteracao_de".to_string(),
                changed_since.format(SEARCH_DATE_FORMAT).to_string(),
            ),
            (
                "data_alteracao_ate".to_string(),
                now.format(SEARCH_DATE_FORMAT).to_string(),
            ),
            (
                "data_vencimento_de".to_string(),
                due_from.format(SEARCH_DATE_FORMAT).to_string(),
            ),
            (
                "data_vencimento_ate".to_string(),
                due_to.format(SEARCH_DATE_FORMAT).to_string(),
            ),
            ("status".to_string(), "RECEBIDO".to_string()),
            ("status".to_string(), "RECEBIDO_PARCIAL".to_string()),
            ("pagina".to_string(), page.to_string()),
            ("tamanho_pagina".to_string(), PAGE_SIZE.to_string()),
        ]
    }
}

fn request_quota() -> Quota {
    // 10/s with burst 1: at most one request every 100ms.
    let rate = NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN);
    Quota::per_second(rate).allow_burst(NonZeroU32::MIN)
}

/// Fetch pages starting at 1 until a short or empty page, with a hard
/// page ceiling. The fetcher returns one page of items per call.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> PayflowResult<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = PayflowResult<Vec<T>>>,
{
    let mut all = Vec::new();

    for page in 1..=MAX_PAGES {
        let items = fetch(page).await?;
        let count = items.len();
        all.extend(items);
        if count < PAGE_SIZE {
            return Ok(all);
        }
    }

    warn!(
        pages = MAX_PAGES,
        "Pagination ceiling reached without a short page"
    );
    Ok(all)
}

#[async_trait]
impl FinancialApi for FinancialClient {
    async fn search_settled_receivables(
        &self,
        changed_since: DateTime<Utc>,
    ) -> PayflowResult<Vec<Receivable>> {
        let url = format!(
            "{}/v1/financeiro/eventos-financeiros/contas-a-receber/buscar",
            self.api_base_url
        );

        let receivables = collect_pages(|page| {
            let url = url.clone();
            let params = Self::search_params(changed_since, page);
            async move {
                let page: SearchPage = self.get_json(&url, &params).await?;
                Ok(page.itens)
            }
        })
        .await?;

        debug!(
            count = receivables.len(),
            changed_since = %changed_since,
            "Fetched settled receivables"
        );
        Ok(receivables)
    }

    async fn receivable_details(&self, receivable_id: &str) -> PayflowResult<ReceivableDetails> {
        let url = format!(
            "{}/v1/financeiro/eventos-financeiros/contas-a-receber/{}",
            self.api_base_url, receivable_id
        );
        self.get_json(&url, &[]).await
    }

    async fn installment_details(&self, installment_id: &str) -> PayflowResult<InstallmentDetails> {
        let url = format!(
            "{}/v1/financeiro/eventos-financeiros/parcelas/{}",
            self.api_base_url, installment_id
        );
        self.get_json(&url, &[]).await
    }

    async fn download_attachment(&self, url: &str) -> PayflowResult<Vec<u8>> {
        ssrf::validate_attachment_url(url, ALLOWED_ATTACHMENT_DOMAINS)?;

        self.limiter.until_ready().await;

        let response = self
            .download_http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PayflowError::Provider {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_DOWNLOAD_BYTES {
            return Err(PayflowError::InvalidReceipt(format!(
                "Attachment too large: {} bytes",
                bytes.len()
            )));
        }

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn pagination_stops_on_short_page() {
        let calls = AtomicUsize::new(0);
        let items = collect_pages(|page| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if page < 3 {
                    Ok(vec![0u32; PAGE_SIZE])
                } else {
                    Ok(vec![0u32; 7])
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 2 * PAGE_SIZE + 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pagination_stops_on_empty_first_page() {
        let items: Vec<u32> = collect_pages(|_| async { Ok(vec![]) }).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn pagination_propagates_fetch_errors() {
        let result: PayflowResult<Vec<u32>> = collect_pages(|page| async move {
            if page == 1 {
                Ok(vec![0u32; PAGE_SIZE])
            } else {
                Err(PayflowError::Provider { status: 500 })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(PayflowError::Provider { status: 500 })
        ));
    }

    #[tokio::test]
    async fn pagination_honors_page_ceiling() {
        let calls = AtomicUsize::new(0);
        let items = collect_pages(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![0u32; PAGE_SIZE]) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), MAX_PAGES);
        assert_eq!(items.len(), MAX_PAGES * PAGE_SIZE);
    }

    #[test]
    fn search_page_accepts_both_payload_shapes() {
        let canonical: SearchPage =
            serde_json::from_str(r#"{"itens": [{"id": "r1"}]}"#).unwrap();
        assert_eq!(canonical.itens.len(), 1);

        let aliased: SearchPage =
            serde_json::from_str(r#"{"data": [{"id": "r1"}, {"id": "r2"}]}"#).unwrap();
        assert_eq!(aliased.itens.len(), 2);

        let empty: SearchPage = serde_json::from_str("{}").unwrap();
        assert!(empty.itens.is_empty());
    }

    #[test]
    fn installment_reads_recipient_override() {
        let detail: InstallmentDetails = serde_json::from_str(
            r#"{
                "id": "inst-1",
                "status": "RECEBIDO",
                "doctorEmail": "doc@example.com",
                "amount": 150.0,
                "paidDate": "2026-02-10",
                "attachments": [{"id": "att-1", "url": "https://cdn.contaazul.com/r.pdf"}]
            }"#,
        )
        .unwrap();

        assert_eq!(detail.recipient_email.as_deref(), Some("doc@example.com"));
        assert_eq!(detail.amount, Some(150.0));
        assert_eq!(detail.attachments.len(), 1);
        assert_eq!(detail.attachments[0].url, "https://cdn.contaazul.com/r.pdf");
    }

    #[test]
    fn receivable_reads_customer_fields() {
        let receivable: Receivable = serde_json::from_str(
            r#"{
                "id": "rec-1",
                "status": "RECEBIDO",
                "customerName": "Acme Corp",
                "totalAmount": 300.0,
                "receivedDate": "2026-02-09"
            }"#,
        )
        .unwrap();

        assert_eq!(receivable.customer_name.as_deref(), Some("Acme Corp"));
        assert_eq!(receivable.total_amount, Some(300.0));
    }

    #[test]
    fn search_params_cover_both_windows() {
        let since = Utc::now() - ChronoDuration::days(3);
        let params = FinancialClient::search_params(since, 2);

        let keys: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"data_alteracao_de"));
        assert!(keys.contains(&"data_alteracao_ate"));
        assert!(keys.contains(&"data_vencimento_de"));
        assert!(keys.contains(&"data_vencimento_ate"));

        let statuses: Vec<&str> = params
            .iter()
            .filter(|(k, _)| k == "status")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(statuses, vec!["RECEBIDO", "RECEBIDO_PARCIAL"]);

        let page = params.iter().find(|(k, _)| k == "pagina").unwrap();
        assert_eq!(page.1, "2");
    }

    #[test]
    fn download_rejects_disallowed_urls_before_any_io() {
        // Validation happens before the request is built, so this is
        // purely synchronous.
        assert!(
            ssrf::validate_attachment_url("https://169.254.169.254/x", ALLOWED_ATTACHMENT_DOMAINS)
                .is_err()
        );
    }
}

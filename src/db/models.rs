/// Database row types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connected Conta Azul account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub company_name: Option<String>,
    pub is_active: bool,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Encrypted OAuth token pair, one per account
///
/// `access_token` and `refresh_token` are ciphertext; only the token
/// service decrypts them, transiently, for a single request.
#[derive(Debug, Clone)]
pub struct Credential {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Strict expiry check against the current UTC instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Per-account polling watermark
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub account_id: String,
    pub last_processed_changed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// One successful receipt delivery (idempotency ledger entry)
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub account_id: String,
    pub installment_id: String,
    pub attachment_url: String,
    pub recipient_email: String,
    pub sent_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Outcome tag for a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Sent,
    Failed,
    Skipped,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Sent => "sent",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Skipped => "skipped",
        }
    }
}

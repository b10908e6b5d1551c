/// Receipt email delivery
///
/// Fail-closed contract: `send_receipt` returns true only after the
/// SMTP server accepted the message. Any validation or transport
/// failure returns false, the receipt is not recorded as delivered,
/// and the next polling cycle retries it.
use crate::{
    config::SmtpConfig,
    error::{PayflowError, PayflowResult},
};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Body, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info, warn};

/// Largest PDF attached to an outgoing email.
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
const MAX_SUBJECT_CHARS: usize = 100;

/// A receipt ready to be emailed.
#[derive(Debug, Clone)]
pub struct ReceiptEmail {
    pub recipient: String,
    pub customer_name: String,
    pub amount: Option<f64>,
    pub receipt_date: Option<String>,
    pub filename: String,
    pub pdf_bytes: Vec<u8>,
}

/// Delivery seam between the processor and SMTP.
#[async_trait]
pub trait ReceiptMailer: Send + Sync {
    /// True only when the SMTP server accepted the message.
    async fn send_receipt(&self, email: &ReceiptEmail) -> bool;
}

#[derive(Clone)]
pub struct SmtpMailer {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> PayflowResult<Self> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        // Implicit TLS (usually 465), STARTTLS on the submission port
        // (usually 587), or plaintext for local relays.
        let builder = if config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| PayflowError::Config(format!("SMTP setup failed: {}", e)))?
        } else if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| PayflowError::Config(format!("SMTP setup failed: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let transport = builder
            .port(config.port)
            .credentials(credentials)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { config, transport })
    }

    fn build_message(&self, email: &ReceiptEmail) -> PayflowResult<Message> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| PayflowError::Config(format!("Invalid SMTP_FROM: {}", e)))?;
        let to: Mailbox = email
            .recipient
            .parse()
            .map_err(|e| PayflowError::InvalidReceipt(format!("Invalid recipient: {}", e)))?;

        let subject = sanitize_subject(&format!(
            "Recibo de pagamento - {}",
            email.customer_name
        ));
        let body = build_body(email);

        let attachment = Attachment::new(email.filename.clone()).body(
            Body::new(email.pdf_bytes.clone()),
            ContentType::parse("application/pdf")
                .map_err(|e| PayflowError::Internal(format!("Invalid content type: {}", e)))?,
        );

        let mut builder = Message::builder().from(from).to(to).subject(subject);
        if let Some(reply_to) = &self.config.reply_to {
            if let Ok(mailbox) = reply_to.parse::<Mailbox>() {
                builder = builder.reply_to(mailbox);
            }
        }

        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(attachment),
            )
            .map_err(|e| PayflowError::Internal(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl ReceiptMailer for SmtpMailer {
    async fn send_receipt(&self, email: &ReceiptEmail) -> bool {
        if !is_valid_email(&email.recipient) {
            warn!(recipient = %email.recipient, "Skipping send: invalid recipient address");
            return false;
        }
        if let Err(e) = validate_attachment(&email.filename, &email.pdf_bytes) {
            warn!(filename = %email.filename, error = %e, "Skipping send: bad attachment");
            return false;
        }

        let message = match self.build_message(email) {
            Ok(message) => message,
            Err(e) => {
                warn!(recipient = %email.recipient, error = %e, "Failed to build email");
                return false;
            }
        };

        match self.transport.send(message).await {
            Ok(_) => {
                info!(
                    recipient = %email.recipient,
                    filename = %email.filename,
                    "Receipt email sent"
                );
                true
            }
            Err(e) => {
                error!(recipient = %email.recipient, error = %e, "SMTP send failed");
                false
            }
        }
    }
}

impl SmtpMailer {
    /// Send a minimal receipt to verify SMTP configuration.
    pub async fn send_test_email(&self, to: &str) -> bool {
        self.send_receipt(&ReceiptEmail {
            recipient: to.to_string(),
            customer_name: "TESTE".to_string(),
            amount: Some(0.0),
            receipt_date: None,
            filename: "teste.pdf".to_string(),
            pdf_bytes: b"%PDF-1.4\n%%EOF".to_vec(),
        })
        .await
    }
}

/// Plain-text body. Carries only what the recipient already knows.
fn build_body(email: &ReceiptEmail) -> String {
    let mut lines = vec![
        "Prezado(a),".to_string(),
        String::new(),
        "Segue em anexo o recibo referente ao pagamento realizado.".to_string(),
        String::new(),
    ];

    if !email.customer_name.is_empty() {
        lines.push(format!("Cliente: {}", email.customer_name));
    }
    if let Some(amount) = email.amount {
        if amount > 0.0 {
            lines.push(format!("Valor: R$ {:.2}", amount));
        }
    }
    if let Some(date) = &email.receipt_date {
        lines.push(format!("Data: {}", date));
    }

    lines.extend([
        String::new(),
        "Atenciosamente,".to_string(),
        "Sistema de Gestão Financeira".to_string(),
    ]);

    lines.join("\n")
}

/// Minimal structural check; the SMTP server does the real validation.
pub fn is_valid_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !address.contains(char::is_whitespace)
        && address.len() <= 254
}

/// Strip header-injection characters and bound the subject length.
pub fn sanitize_subject(subject: &str) -> String {
    subject
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .take(MAX_SUBJECT_CHARS)
        .collect()
}

/// Attachment sanity checks before the message is built.
pub fn validate_attachment(filename: &str, bytes: &[u8]) -> PayflowResult<()> {
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(PayflowError::InvalidReceipt(format!(
            "Not a PDF filename: {}",
            filename
        )));
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(PayflowError::InvalidReceipt(
            "Attachment is not a PDF".to_string(),
        ));
    }
    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(PayflowError::InvalidReceipt(format!(
            "Attachment too large for email: {} bytes",
            bytes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("doc@example.com"));
        assert!(is_valid_email("a.b+c@sub.example.com.br"));

        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("doc@"));
        assert!(!is_valid_email("doc@localhost"));
        assert!(!is_valid_email("doc @example.com"));
    }

    #[test]
    fn subject_sanitization_strips_injection_and_caps_length() {
        assert_eq!(
            sanitize_subject("Recibo\r\nBcc: attacker@evil.com"),
            "ReciboBcc: attacker@evil.com"
        );

        let long = "x".repeat(500);
        assert_eq!(sanitize_subject(&long).chars().count(), 100);

        assert_eq!(sanitize_subject("Recibo - Acme"), "Recibo - Acme");
    }

    #[test]
    fn body_carries_only_present_fields() {
        let full = build_body(&ReceiptEmail {
            recipient: "doc@example.com".to_string(),
            customer_name: "Acme Corp".to_string(),
            amount: Some(150.5),
            receipt_date: Some("2026-02-10".to_string()),
            filename: "recibo.pdf".to_string(),
            pdf_bytes: vec![],
        });
        assert!(full.contains("Cliente: Acme Corp"));
        assert!(full.contains("Valor: R$ 150.50"));
        assert!(full.contains("Data: 2026-02-10"));

        let sparse = build_body(&ReceiptEmail {
            recipient: "doc@example.com".to_string(),
            customer_name: "Acme Corp".to_string(),
            amount: None,
            receipt_date: None,
            filename: "recibo.pdf".to_string(),
            pdf_bytes: vec![],
        });
        assert!(!sparse.contains("Valor:"));
        assert!(!sparse.contains("Data:"));
        assert!(sparse.contains("Prezado(a),"));
    }

    #[test]
    fn attachment_validation() {
        let pdf = b"%PDF-1.4 rest of file".to_vec();
        validate_attachment("recibo_abc123.pdf", &pdf).unwrap();

        assert!(validate_attachment("recibo.exe", &pdf).is_err());
        assert!(validate_attachment("recibo.pdf", b"<html>not a pdf").is_err());

        let mut huge = b"%PDF".to_vec();
        huge.resize(MAX_ATTACHMENT_BYTES + 1, 0);
        assert!(validate_attachment("recibo.pdf", &huge).is_err());
    }
}

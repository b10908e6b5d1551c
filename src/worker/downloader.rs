/// Receipt download and validation
///
/// Bytes fetched from the provider are validated as PDFs before they
/// get near an email, and hashed so the delivery ledger can carry
/// evidence of exactly what was sent.
use crate::{
    error::{PayflowError, PayflowResult},
    provider::FinancialApi,
};
use sha2::{Digest, Sha256};

/// Smallest plausible receipt PDF.
pub const MIN_RECEIPT_BYTES: usize = 1024;
/// Largest receipt we accept from the provider.
pub const MAX_RECEIPT_BYTES: usize = 100 * 1024 * 1024;

/// A validated receipt with its hash-derived filename.
#[derive(Debug, Clone)]
pub struct DownloadedReceipt {
    pub bytes: Vec<u8>,
    pub content_hash: String,
    pub filename: String,
}

/// Fetch, validate, and hash one receipt attachment.
pub async fn download_receipt(
    api: &dyn FinancialApi,
    url: &str,
) -> PayflowResult<DownloadedReceipt> {
    let bytes = api.download_attachment(url).await?;
    validate_receipt(&bytes)?;

    let content_hash = content_hash(&bytes);
    let filename = receipt_filename(&content_hash);

    Ok(DownloadedReceipt {
        bytes,
        content_hash,
        filename,
    })
}

/// Reject anything that is not a plausibly sized PDF.
pub fn validate_receipt(bytes: &[u8]) -> PayflowResult<()> {
    if !bytes.starts_with(b"%PDF") {
        return Err(PayflowError::InvalidReceipt(
            "Downloaded content is not a PDF".to_string(),
        ));
    }
    if bytes.len() < MIN_RECEIPT_BYTES {
        return Err(PayflowError::InvalidReceipt(format!(
            "Receipt suspiciously small: {} bytes",
            bytes.len()
        )));
    }
    if bytes.len() > MAX_RECEIPT_BYTES {
        return Err(PayflowError::InvalidReceipt(format!(
            "Receipt too large: {} bytes",
            bytes.len()
        )));
    }
    Ok(())
}

/// SHA-256 of the receipt content, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Deterministic attachment filename derived from the content hash.
pub fn receipt_filename(content_hash: &str) -> String {
    let prefix: String = content_hash.chars().take(8).collect();
    format!("recibo_{}.pdf", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_of(len: usize) -> Vec<u8> {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(len, b'a');
        bytes
    }

    #[test]
    fn validation_checks_magic_and_size() {
        validate_receipt(&pdf_of(2048)).unwrap();

        assert!(validate_receipt(b"<html>error page</html>").is_err());
        assert!(validate_receipt(&pdf_of(100)).is_err());
        assert!(validate_receipt(&pdf_of(MAX_RECEIPT_BYTES + 1)).is_err());
        // Boundary sizes are accepted
        validate_receipt(&pdf_of(MIN_RECEIPT_BYTES)).unwrap();
        validate_receipt(&pdf_of(MAX_RECEIPT_BYTES)).unwrap();
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = pdf_of(2048);
        let mut b = pdf_of(2048);
        b[2000] = b'z';

        assert_eq!(content_hash(&a), content_hash(&a));
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn filename_uses_hash_prefix() {
        let hash = content_hash(&pdf_of(2048));
        let name = receipt_filename(&hash);
        assert!(name.starts_with("recibo_"));
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), "recibo_".len() + 8 + ".pdf".len());
        assert!(name.contains(&hash[..8]));
    }
}

/// SSRF validation for attachment URLs
///
/// Every attachment download goes through `validate_attachment_url`
/// first. Only HTTPS, only hosts on (or under) the provider domain
/// allow-list, never IP literals pointing at loopback/private/reserved
/// space. Redirects are disabled separately at the HTTP client.
use crate::error::{PayflowError, PayflowResult};
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Domains receipts may be fetched from.
pub const ALLOWED_ATTACHMENT_DOMAINS: &[&str] = &[
    "api.contaazul.com",
    "attachments.contaazul.com",
    "cdn.contaazul.com",
    "static.contaazul.com",
];

pub fn validate_attachment_url(raw: &str, allowed_domains: &[&str]) -> PayflowResult<()> {
    if raw.is_empty() {
        return Err(PayflowError::Ssrf("empty URL".to_string()));
    }

    let url = Url::parse(raw).map_err(|e| PayflowError::Ssrf(format!("unparseable URL: {}", e)))?;

    if url.scheme() != "https" {
        return Err(PayflowError::Ssrf(format!(
            "non-HTTPS scheme rejected: {}",
            url.scheme()
        )));
    }

    match url.host() {
        None => Err(PayflowError::Ssrf("URL has no hostname".to_string())),
        Some(Host::Ipv4(ip)) => Err(ipv4_rejection(ip)),
        Some(Host::Ipv6(ip)) => Err(ipv6_rejection(ip)),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            let allowed = allowed_domains.iter().any(|allow| {
                domain == *allow || domain.ends_with(&format!(".{}", allow))
            });
            if allowed {
                Ok(())
            } else {
                Err(PayflowError::Ssrf(format!(
                    "domain not on allow-list: {}",
                    domain
                )))
            }
        }
    }
}

fn ipv4_rejection(ip: Ipv4Addr) -> PayflowError {
    let reason = if ip.is_loopback() {
        "loopback"
    } else if ip.is_private() {
        "private"
    } else if ip.is_link_local() {
        "link-local"
    } else if ip.is_multicast() {
        "multicast"
    } else if ip.is_broadcast() || ip.is_unspecified() || ip.octets()[0] >= 240 {
        "reserved"
    } else {
        // Public IP literals still cannot match the domain allow-list.
        "IP literal"
    };
    PayflowError::Ssrf(format!("{} address rejected: {}", reason, ip))
}

fn ipv6_rejection(ip: Ipv6Addr) -> PayflowError {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return ipv4_rejection(mapped);
    }

    let segments = ip.segments();
    let reason = if ip.is_loopback() {
        "loopback"
    } else if ip.is_unspecified() {
        "unspecified"
    } else if ip.is_multicast() {
        "multicast"
    } else if segments[0] & 0xfe00 == 0xfc00 {
        "unique-local"
    } else if segments[0] & 0xffc0 == 0xfe80 {
        "link-local"
    } else {
        "IP literal"
    };
    PayflowError::Ssrf(format!("{} address rejected: {}", reason, ip))
}

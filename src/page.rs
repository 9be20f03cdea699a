//! Page canonicalization
//!
//! Pages are identified by URL under one required prefix. Clients may send
//! a title instead; the URL is derived the way the upstream wiki does it
//! (spaces become underscores, the rest percent-encodes), and titles are
//! derived back from URLs by the inverse mapping.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Result, ServiceError};

// Characters kept verbatim when a title becomes a URL path segment.
const TITLE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'-')
    .remove(b'.')
    .remove(b'*');

/// A page accepted for resolution: its canonical URL plus display title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPage {
    pub url: String,
    pub title: String,
}

/// Derive the canonical URL for a title.
pub fn url_from_title(title: &str, prefix: &str) -> String {
    let underscored = title.replace(' ', "_");
    format!("{prefix}{}", utf8_percent_encode(&underscored, TITLE_ENCODE_SET))
}

/// Derive the display title back out of a canonical URL.
pub fn title_from_url(url: &str, prefix: &str) -> Result<String> {
    let segment = url.strip_prefix(prefix).ok_or_else(|| ServiceError::UrlPrefix {
        url: url.to_string(),
        prefix: prefix.to_string(),
    })?;
    let decoded = percent_decode_str(segment)
        .decode_utf8()
        .map_err(|_| ServiceError::InvalidUrl(url.to_string()))?;
    Ok(decoded.replace('_', " "))
}

/// Canonicalize a client-submitted URL. Enforces the prefix gate.
pub fn from_url(url: &str, prefix: &str) -> Result<CanonicalPage> {
    let url = url.trim();
    let title = title_from_url(url, prefix)?;
    Ok(CanonicalPage {
        url: url.to_string(),
        title,
    })
}

/// Canonicalize a client-submitted title.
pub fn from_title(title: &str, prefix: &str) -> Result<CanonicalPage> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::MissingPage);
    }
    Ok(CanonicalPage {
        url: url_from_title(title, prefix),
        title: title.to_string(),
    })
}

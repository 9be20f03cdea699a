//! Identity canonicalization and deterministic store keys
//!
//! Raw identities never reach the graph store. Every email or phone number
//! is reduced to a canonical form (lowercased address, E.164 number) and
//! hashed; only the hash is stored and indexed.

use blake3::Hasher;
use email_address::EmailAddress;
use phonenumber::{country, Mode};

use crate::error::{Result, ServiceError};

/// A normalized identity and the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalIdentity {
    /// Normalized form echoed back to clients.
    pub canonical: String,
    /// Lowercase hex BLAKE3 of the canonical form. The only identity
    /// material the store ever sees.
    pub key: String,
}

/// Hash a canonical form into its store key.
///
/// # Examples
/// ```
/// use tastegraph::identity::canonical_key;
///
/// let key = canonical_key("max@gmail.com");
/// assert_eq!(key.len(), 64);
/// ```
pub fn canonical_key(canonical: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(canonical.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Canonicalize an email address: trim, validate syntax, lowercase.
pub fn from_email(raw: &str) -> Result<CanonicalIdentity> {
    let email = raw.trim();
    if !EmailAddress::is_valid(email) {
        return Err(ServiceError::InvalidEmail(raw.to_string()));
    }
    let canonical = email.to_ascii_lowercase();
    let key = canonical_key(&canonical);
    Ok(CanonicalIdentity { canonical, key })
}

/// Canonicalize a phone number into E.164 under the given region hint.
/// Numbers submitted in international form ignore the hint.
pub fn from_phone(raw: &str, region: &str) -> Result<CanonicalIdentity> {
    let region_id = region
        .to_ascii_uppercase()
        .parse::<country::Id>()
        .map_err(|_| ServiceError::UnknownRegion(region.to_string()))?;

    let number = phonenumber::parse(Some(region_id), raw.trim())
        .map_err(|_| ServiceError::InvalidPhone(raw.to_string()))?;
    if !phonenumber::is_valid(&number) {
        return Err(ServiceError::InvalidPhone(raw.to_string()));
    }

    let canonical = number.format().mode(Mode::E164).to_string();
    let key = canonical_key(&canonical);
    Ok(CanonicalIdentity { canonical, key })
}

/// Canonicalize an identity taken from a URL path, where the kind is not
/// spelled out: strings containing `@` are emails, everything else is
/// treated as a phone number.
pub fn from_raw(raw: &str, region: &str) -> Result<CanonicalIdentity> {
    if raw.contains('@') {
        from_email(raw)
    } else {
        from_phone(raw, region)
    }
}

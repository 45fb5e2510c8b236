//! Identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable node identifier, assigned by the fleet registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create a node id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Tenant (workspace) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl TenantId {
    /// Create a tenant id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant-{}", self.0)
    }
}

/// Inbound number (DID).
///
/// Whitelist entries are keyed by the canonical E.164 form and compared
/// verbatim after trimming surrounding whitespace. Routed DIDs are converted
/// with `From<CanonicalNumber>` once they have been normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Create a DID from its routed string form.
    #[must_use]
    pub fn new(number: impl AsRef<str>) -> Self {
        Self(number.as_ref().trim().to_string())
    }

    /// String form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Did {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<CanonicalNumber> for Did {
    fn from(value: CanonicalNumber) -> Self {
        Self(value.0)
    }
}

/// Rejected canonical number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not an E.164 number: {0:?}")]
pub struct InvalidNumber(pub String);

/// Phone number in canonical E.164 form (`+` followed by 2 to 15 digits).
///
/// All blocklist and ownership comparisons use this form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalNumber(String);

impl CanonicalNumber {
    /// Accept a string that is already E.164 formatted.
    ///
    /// # Errors
    /// Returns [`InvalidNumber`] when the value is not `+` followed by 2..=15 digits.
    pub fn from_e164(value: impl Into<String>) -> Result<Self, InvalidNumber> {
        let value = value.into();
        let digits = value.strip_prefix('+').unwrap_or_default();
        let well_formed = (2..=15).contains(&digits.len())
            && digits.bytes().all(|b| b.is_ascii_digit())
            && !digits.starts_with('0');
        if well_formed {
            Ok(Self(value))
        } else {
            Err(InvalidNumber(value))
        }
    }

    /// String form, including the leading `+`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CanonicalNumber {
    type Error = InvalidNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_e164(value)
    }
}

impl From<CanonicalNumber> for String {
    fn from(value: CanonicalNumber) -> Self {
        value.0
    }
}

impl fmt::Display for CanonicalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_number_accepts_e164() {
        let number = CanonicalNumber::from_e164("+15551234567").expect("valid");
        assert_eq!(number.as_str(), "+15551234567");
    }

    #[test]
    fn canonical_number_rejects_formatting() {
        assert!(CanonicalNumber::from_e164("15551234567").is_err());
        assert!(CanonicalNumber::from_e164("+1 555 123 4567").is_err());
        assert!(CanonicalNumber::from_e164("+0123").is_err());
        assert!(CanonicalNumber::from_e164("+").is_err());
        assert!(CanonicalNumber::from_e164("+1234567890123456").is_err());
    }

    #[test]
    fn canonical_number_deserialize_validates() {
        let ok: Result<CanonicalNumber, _> = serde_json::from_str("\"+442071838750\"");
        assert!(ok.is_ok());
        let bad: Result<CanonicalNumber, _> = serde_json::from_str("\"(555) 123-4567\"");
        assert!(bad.is_err());
    }

    #[test]
    fn did_trims_whitespace() {
        assert_eq!(Did::new("  +15551234567 ").as_str(), "+15551234567");
    }

    #[test]
    fn did_from_canonical_number_matches_stored_form() {
        let number = CanonicalNumber::from_e164("+15551234567").expect("valid");
        assert_eq!(Did::from(number), Did::new("+15551234567"));
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::new(7).to_string(), "node-7");
        assert_eq!(TenantId::new(3).to_string(), "tenant-3");
    }
}

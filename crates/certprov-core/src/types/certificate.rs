use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length in bytes of a certificate thumbprint (SHA-256)
pub const THUMBPRINT_LEN: usize = 32;

/// SHA-256 digest of a certificate's DER encoding
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Thumbprint([u8; THUMBPRINT_LEN]);

impl Thumbprint {
    /// Wrap a raw digest
    #[must_use]
    pub const fn from_bytes(bytes: [u8; THUMBPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex string (either case)
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; THUMBPRINT_LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Raw digest bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; THUMBPRINT_LEN] {
        &self.0
    }

    /// Uppercase hex, the way certificate tooling usually displays thumbprints
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl std::fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Thumbprint({})", self.to_hex())
    }
}

impl Serialize for Thumbprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Thumbprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid thumbprint: {s}")))
    }
}

/// A certificate found in a certificate container.
///
/// Records are created by the store loader and never mutated afterwards;
/// the certificate set only hands out shared references. Private key
/// material is deliberately not part of the record: `has_private_key` only
/// reports whether the container held a key matching this certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Subject distinguished name (human-readable)
    pub subject: String,

    /// Subject common name, if the subject has one
    #[serde(default)]
    pub common_name: Option<String>,

    /// Issuer distinguished name (human-readable)
    pub issuer: String,

    /// Serial number (hex)
    pub serial: String,

    /// SHA-256 of the DER encoding
    pub thumbprint: Thumbprint,

    /// Not valid before
    pub not_before: DateTime<Utc>,

    /// Not valid after
    pub not_after: DateTime<Utc>,

    /// Whether the container held the private key for this certificate
    pub has_private_key: bool,

    /// DER encoding of the certificate
    #[serde(skip)]
    pub der: Vec<u8>,
}

impl CertificateRecord {
    /// Identifier used when registering with this certificate.
    ///
    /// X.509 individual enrollments are keyed by the subject common name;
    /// certificates without one fall back to the full subject.
    #[must_use]
    pub fn registration_id(&self) -> &str {
        self.common_name.as_deref().unwrap_or(&self.subject)
    }

    /// Returns true if `at` falls outside the validity window
    #[must_use]
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at < self.not_before || at > self.not_after
    }

    /// Returns true if the certificate is outside its validity window now
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Raw DER bytes
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

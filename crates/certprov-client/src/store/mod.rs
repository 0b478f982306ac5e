//! Certificate store loading.
//!
//! A store is a single container file: either a PKCS#12 archive (`.pfx`,
//! `.p12`) or a PEM bundle. The format is detected from the content, not
//! the file extension. Every certificate found becomes a
//! [`CertificateRecord`] in container order; private keys are matched to
//! certificates by public key and kept aside as zeroizing key material.

mod pem_bundle;
mod pkcs12;
mod x509;

use certprov_core::{CertificateRecord, StoreError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::identity::PrivateKey;

pub(crate) use x509::{parse_certificate, subject_public_key};

/// Container formats understood by [`load_store`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    /// PKCS#12 / PFX archive (DER)
    Pkcs12,
    /// PEM armored certificates and PKCS#8 keys
    Pem,
}

impl StoreFormat {
    /// Guess the format from the first bytes of the file
    #[must_use]
    pub fn detect(bytes: &[u8]) -> Self {
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        if bytes[start..].starts_with(b"-----BEGIN") {
            Self::Pem
        } else {
            Self::Pkcs12
        }
    }
}

struct StoreEntry {
    record: CertificateRecord,
    key: Option<PrivateKey>,
}

/// Ordered certificates loaded from one container.
///
/// Order is the order in which certificates appear in the container. Records
/// are only handed out by shared reference; the private key for each entry
/// stays inside the set until [`select_identity`](crate::select_identity)
/// takes it.
pub struct CertificateSet {
    origin: PathBuf,
    entries: Vec<StoreEntry>,
}

impl CertificateSet {
    /// Create an empty set for certificates loaded from `origin`
    #[must_use]
    pub fn new(origin: impl Into<PathBuf>) -> Self {
        Self {
            origin: origin.into(),
            entries: Vec::new(),
        }
    }

    /// Append a certificate. `has_private_key` is derived from `key`.
    pub fn push(&mut self, mut record: CertificateRecord, key: Option<PrivateKey>) {
        record.has_private_key = key.is_some();
        self.entries.push(StoreEntry { record, key });
    }

    /// Where the certificates came from
    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Number of certificates
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the container held no certificates
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Certificate at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CertificateRecord> {
        self.entries.get(index).map(|e| &e.record)
    }

    /// Certificates in container order
    pub fn iter(&self) -> impl Iterator<Item = &CertificateRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub(crate) fn into_parts(self) -> (PathBuf, Vec<(CertificateRecord, Option<PrivateKey>)>) {
        let entries = self.entries.into_iter().map(|e| (e.record, e.key)).collect();
        (self.origin, entries)
    }
}

impl std::fmt::Debug for CertificateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateSet")
            .field("origin", &self.origin)
            .field("records", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

/// Load a certificate container from disk.
///
/// An absent passphrase is treated as the empty password, which is how
/// password-less PKCS#12 files are written.
///
/// # Errors
///
/// - [`StoreError::NotFound`] if `path` does not exist
/// - [`StoreError::Unreadable`] if the bytes are not a valid container
/// - [`StoreError::DecryptionFailed`] if the passphrase is missing or wrong
pub async fn load_store(
    path: impl AsRef<Path>,
    passphrase: Option<&str>,
) -> Result<CertificateSet, StoreError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            StoreError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;

    parse_store(path, &bytes, passphrase)
}

/// Parse container bytes already read from `origin`.
pub fn parse_store(
    origin: &Path,
    bytes: &[u8],
    passphrase: Option<&str>,
) -> Result<CertificateSet, StoreError> {
    let format = StoreFormat::detect(bytes);
    debug!(path = %origin.display(), ?format, size = bytes.len(), "parsing certificate store");

    let set = match format {
        StoreFormat::Pkcs12 => pkcs12::parse(origin, bytes, passphrase.unwrap_or(""))?,
        StoreFormat::Pem => pem_bundle::parse(origin, bytes)?,
    };

    for record in set.iter() {
        info!(
            thumbprint = %record.thumbprint,
            subject = %record.subject,
            private_key = record.has_private_key,
            "found certificate"
        );
    }

    Ok(set)
}

/// Decode PKCS#8 keys, skipping (with a warning) any the signer cannot use.
///
/// The certificate a skipped key belongs to is then reported without a
/// private key, so selection moves on to the next usable certificate.
fn decode_keys(origin: &Path, keys: Vec<Zeroizing<Vec<u8>>>) -> Vec<PrivateKey> {
    keys.into_iter()
        .enumerate()
        .filter_map(|(index, der)| match PrivateKey::from_pkcs8(&der) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(path = %origin.display(), index, error = %err, "ignoring unusable private key");
                None
            }
        })
        .collect()
}

/// Build a set from parsed certificates and decoded keys, pairing each
/// certificate with the first unused key whose public key it certifies.
fn assemble(
    origin: &Path,
    certificates: Vec<Vec<u8>>,
    keys: Vec<PrivateKey>,
) -> Result<CertificateSet, StoreError> {
    let mut keys: Vec<Option<PrivateKey>> = keys.into_iter().map(Some).collect();
    let mut set = CertificateSet::new(origin);

    for der in certificates {
        let key = keys
            .iter_mut()
            .find(|slot| matches!(slot, Some(k) if k.matches_certificate(&der)))
            .and_then(Option::take);
        let record = parse_certificate(der, key.is_some()).map_err(|e| StoreError::Unreadable {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        set.push(record, key);
    }

    let orphaned = keys.iter().filter(|k| k.is_some()).count();
    if orphaned > 0 {
        debug!(path = %origin.display(), orphaned, "private keys without a matching certificate discarded");
    }

    Ok(set)
}

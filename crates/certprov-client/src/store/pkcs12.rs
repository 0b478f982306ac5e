//! PKCS#12 (PFX) containers.
//!
//! Both the PBES2 / AES-256 containers with an HMAC-SHA256 integrity check
//! written by current tooling and the legacy 3DES / RC2 containers with a
//! SHA-1 MAC are accepted.

use certprov_core::StoreError;
use p12_keystore::{KeyStore, KeyStoreEntry};
use std::path::Path;
use tracing::debug;
use x509_parser::der_parser;
use zeroize::Zeroizing;

use super::{assemble, decode_keys, CertificateSet};

/// PFX `version` field (RFC 7292)
const PFX_VERSION: u32 = 3;

pub(super) fn parse(origin: &Path, bytes: &[u8], password: &str) -> Result<CertificateSet, StoreError> {
    if !looks_like_pfx(bytes) {
        return Err(StoreError::Unreadable {
            path: origin.to_path_buf(),
            reason: "not a PKCS#12 container".into(),
        });
    }

    // The structure is a PFX, so a failure past this point is the MAC or a
    // bag that would not decrypt with this passphrase.
    let keystore = KeyStore::from_pkcs12(bytes, password).map_err(|e| StoreError::DecryptionFailed {
        path: origin.to_path_buf(),
        reason: if password.is_empty() {
            format!("{e}; a passphrase is probably required")
        } else {
            format!("{e}; the passphrase is probably incorrect")
        },
    })?;

    let mut entries: Vec<_> = keystore.entries().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut certificates: Vec<Vec<u8>> = Vec::new();
    let mut keys = Vec::new();
    let mut add = |der: &[u8]| {
        if !certificates.iter().any(|c| c.as_slice() == der) {
            certificates.push(der.to_vec());
        }
    };

    for (alias, entry) in entries {
        match entry {
            KeyStoreEntry::PrivateKeyChain(chain) => {
                debug!(path = %origin.display(), alias = %alias, certificates = chain.chain().len(), "key entry");
                keys.push(Zeroizing::new(chain.key().to_vec()));
                for cert in chain.chain() {
                    add(cert.as_der());
                }
            }
            KeyStoreEntry::Certificate(cert) => add(cert.as_der()),
            #[allow(unreachable_patterns)]
            _ => debug!(path = %origin.display(), alias = %alias, "skipping non-certificate entry"),
        }
    }

    if certificates.is_empty() {
        return Err(StoreError::Unreadable {
            path: origin.to_path_buf(),
            reason: "container holds no X.509 certificates".into(),
        });
    }

    assemble(origin, certificates, decode_keys(origin, keys))
}

/// Structural check: an outer SEQUENCE whose first element is INTEGER 3.
fn looks_like_pfx(bytes: &[u8]) -> bool {
    let Ok((_, pfx)) = der_parser::parse_ber(bytes) else {
        return false;
    };
    pfx.as_sequence()
        .ok()
        .and_then(|items| items.first())
        .and_then(|version| version.as_u32().ok())
        == Some(PFX_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pfx_shape_detection() {
        assert!(looks_like_pfx(include_bytes!("../../testdata/modern.pfx")));
        assert!(looks_like_pfx(include_bytes!("../../testdata/legacy.pfx")));
        assert!(!looks_like_pfx(&[0xde, 0xad, 0xbe, 0xef]));
        // SEQUENCE { INTEGER 1 }
        assert!(!looks_like_pfx(&[0x30, 0x03, 0x02, 0x01, 0x01]));
    }
}

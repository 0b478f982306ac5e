//! PEM bundles: `CERTIFICATE` blocks plus optional unencrypted PKCS#8 keys.

use certprov_core::StoreError;
use std::path::Path;
use tracing::debug;
use zeroize::Zeroizing;

use super::{assemble, decode_keys, CertificateSet};

pub(super) fn parse(origin: &Path, bytes: &[u8]) -> Result<CertificateSet, StoreError> {
    let unreadable = |reason: String| StoreError::Unreadable {
        path: origin.to_path_buf(),
        reason,
    };

    let blocks = pem::parse_many(bytes).map_err(|e| unreadable(e.to_string()))?;

    let mut certificates = Vec::new();
    let mut keys = Vec::new();

    for block in blocks {
        let tag = block.tag().to_string();
        match tag.as_str() {
            "CERTIFICATE" => certificates.push(block.into_contents()),
            "PRIVATE KEY" => keys.push(Zeroizing::new(block.into_contents())),
            "ENCRYPTED PRIVATE KEY" => {
                return Err(StoreError::DecryptionFailed {
                    path: origin.to_path_buf(),
                    reason: "encrypted PEM keys are not supported; use a PKCS#12 container".into(),
                });
            }
            other => debug!(path = %origin.display(), tag = other, "skipping PEM block"),
        }
    }

    if certificates.is_empty() {
        return Err(unreadable("no CERTIFICATE blocks found".into()));
    }

    assemble(origin, certificates, decode_keys(origin, keys))
}

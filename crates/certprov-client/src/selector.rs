//! Certificate selection: the first certificate, in container order, that
//! carries a private key.

use certprov_core::{CertificateRecord, ProvisionError, Result};
use tracing::{debug, info};

use crate::identity::IdentityHandle;
use crate::store::CertificateSet;

/// Find the first certificate with a private key without touching the set.
///
/// Position is the only tie-break, so the choice is deterministic for a given
/// container.
pub fn select_first_with_key(set: &CertificateSet) -> Result<(usize, &CertificateRecord)> {
    set.iter()
        .enumerate()
        .find(|(_, record)| record.has_private_key)
        .ok_or_else(|| no_usable_certificate(set))
}

/// Consume the set and build an identity from its first keyed certificate.
///
/// Private keys of every other certificate are dropped (and zeroized) before
/// this returns. The remaining certificates become the identity's chain, in
/// container order.
pub fn select_identity(set: CertificateSet) -> Result<IdentityHandle> {
    let (index, _) = select_first_with_key(&set)?;
    let (origin, entries) = set.into_parts();

    let mut selected = None;
    let mut chain = Vec::with_capacity(entries.len().saturating_sub(1));

    for (position, (record, key)) in entries.into_iter().enumerate() {
        if position == index {
            selected = Some((record, key));
        } else {
            if key.is_some() {
                debug!(thumbprint = %record.thumbprint, "discarding unselected private key");
            }
            drop(key);
            chain.push(record.der);
        }
    }

    let (record, key) = match selected {
        Some((record, Some(key))) => (record, key),
        _ => {
            return Err(ProvisionError::NoUsableCertificate {
                origin: origin.display().to_string(),
            })
        }
    };

    info!(
        thumbprint = %record.thumbprint,
        subject = %record.subject,
        "using certificate"
    );

    IdentityHandle::new(record, key, chain)
}

fn no_usable_certificate(set: &CertificateSet) -> ProvisionError {
    ProvisionError::NoUsableCertificate {
        origin: set.origin().display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_support::generate;
    use crate::identity::PrivateKey;
    use crate::store::parse_certificate;

    /// Build a set from (common name, has key) pairs.
    fn set_of(specs: &[(&str, bool)]) -> CertificateSet {
        let mut set = CertificateSet::new("test.pfx");
        for (name, with_key) in specs {
            let (der, key) = generate(name);
            let record = parse_certificate(der, *with_key).unwrap();
            let key = with_key.then(|| PrivateKey::from_pkcs8(&key).unwrap());
            set.push(record, key);
        }
        set
    }

    #[test]
    fn test_selects_first_keyed_record() {
        let set = set_of(&[("ca", false), ("device-a", true), ("device-b", true)]);
        let (index, record) = select_first_with_key(&set).unwrap();
        assert_eq!(index, 1);
        assert_eq!(record.registration_id(), "device-a");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let set = set_of(&[("ca", false), ("device-a", true), ("device-b", true)]);
        let first = select_first_with_key(&set).unwrap().1.thumbprint;
        for _ in 0..10 {
            assert_eq!(select_first_with_key(&set).unwrap().1.thumbprint, first);
        }
    }

    #[test]
    fn test_no_keyed_record_fails_and_leaves_set_untouched() {
        let set = set_of(&[("ca", false), ("intermediate", false)]);
        let before: Vec<_> = set.iter().cloned().collect();

        let err = select_first_with_key(&set).unwrap_err();
        assert!(matches!(err, ProvisionError::NoUsableCertificate { .. }));
        assert_eq!(err.to_string(), "test.pfx did not contain any certificate with a private key");

        let after: Vec<_> = set.iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_set_has_no_usable_certificate() {
        let set = CertificateSet::new("empty.pem");
        assert!(select_first_with_key(&set).is_err());
        assert!(matches!(
            select_identity(set),
            Err(ProvisionError::NoUsableCertificate { .. })
        ));
    }

    #[test]
    fn test_select_identity_builds_chain_from_the_rest() {
        let set = set_of(&[("ca", false), ("device-a", true), ("device-b", true)]);
        let ca_der = set.get(0).unwrap().der.clone();
        let other_der = set.get(2).unwrap().der.clone();

        let identity = select_identity(set).unwrap();
        assert_eq!(identity.registration_id(), "device-a");

        let chain = identity.certificate_chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[1], ca_der.as_slice());
        assert_eq!(chain[2], other_der.as_slice());
        assert!(identity.sign(b"challenge").is_ok());
    }
}

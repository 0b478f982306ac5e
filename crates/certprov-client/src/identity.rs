//! Device identity: a selected certificate plus the private key proving it.
//!
//! Key material lives in [`PrivateKey`], which zeroizes its PKCS#8 bytes on
//! drop. An [`IdentityHandle`] owns exactly one key for the duration of a
//! provisioning attempt and can be released explicitly; after release every
//! signing attempt fails with [`ProvisionError::HandleReleased`].

use certprov_core::{CertificateRecord, ProvisionError, Result};
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::store::subject_public_key;

/// Signature scheme used to answer an attestation challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// ECDSA over P-256 with SHA-256, ASN.1 DER signature
    #[serde(rename = "ECDSA_P256_SHA256")]
    EcdsaP256Sha256,
    /// ECDSA over P-384 with SHA-384, ASN.1 DER signature
    #[serde(rename = "ECDSA_P384_SHA384")]
    EcdsaP384Sha384,
    /// RSA PKCS#1 v1.5 with SHA-256
    #[serde(rename = "RSA_PKCS1_SHA256")]
    RsaPkcs1Sha256,
    /// Ed25519
    #[serde(rename = "ED25519")]
    Ed25519,
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EcdsaP256Sha256 => write!(f, "ECDSA_P256_SHA256"),
            Self::EcdsaP384Sha384 => write!(f, "ECDSA_P384_SHA384"),
            Self::RsaPkcs1Sha256 => write!(f, "RSA_PKCS1_SHA256"),
            Self::Ed25519 => write!(f, "ED25519"),
        }
    }
}

/// A PKCS#8 private key, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    pkcs8: Vec<u8>,
    #[zeroize(skip)]
    algorithm: SignatureAlgorithm,
    #[zeroize(skip)]
    public_key: Vec<u8>,
}

impl PrivateKey {
    /// Decode an unencrypted PKCS#8 key and detect its algorithm.
    pub fn from_pkcs8(der: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();

        let (algorithm, public_key) = if let Ok(kp) =
            EcdsaKeyPair::from_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, der, &rng)
        {
            (SignatureAlgorithm::EcdsaP256Sha256, kp.public_key().as_ref().to_vec())
        } else if let Ok(kp) =
            EcdsaKeyPair::from_pkcs8(&signature::ECDSA_P384_SHA384_ASN1_SIGNING, der, &rng)
        {
            (SignatureAlgorithm::EcdsaP384Sha384, kp.public_key().as_ref().to_vec())
        } else if let Ok(kp) = RsaKeyPair::from_pkcs8(der) {
            (SignatureAlgorithm::RsaPkcs1Sha256, kp.public_key().as_ref().to_vec())
        } else if let Ok(kp) = Ed25519KeyPair::from_pkcs8_maybe_unchecked(der) {
            (SignatureAlgorithm::Ed25519, kp.public_key().as_ref().to_vec())
        } else {
            return Err(ProvisionError::Crypto(
                "unsupported or malformed PKCS#8 private key".into(),
            ));
        };

        Ok(Self {
            pkcs8: der.to_vec(),
            algorithm,
            public_key,
        })
    }

    /// Signature scheme this key signs with
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Raw public key, in the same encoding as a certificate's subject public key
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Returns true if `cert_der` certifies this key's public key
    #[must_use]
    pub fn matches_certificate(&self, cert_der: &[u8]) -> bool {
        subject_public_key(cert_der).is_some_and(|spki| spki == self.public_key)
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let crypto = |what: &str| ProvisionError::Crypto(format!("{what} ({})", self.algorithm));

        match self.algorithm {
            SignatureAlgorithm::EcdsaP256Sha256 | SignatureAlgorithm::EcdsaP384Sha384 => {
                let alg = if self.algorithm == SignatureAlgorithm::EcdsaP256Sha256 {
                    &signature::ECDSA_P256_SHA256_ASN1_SIGNING
                } else {
                    &signature::ECDSA_P384_SHA384_ASN1_SIGNING
                };
                let kp = EcdsaKeyPair::from_pkcs8(alg, &self.pkcs8, &rng)
                    .map_err(|_| crypto("key rejected"))?;
                let sig = kp.sign(&rng, message).map_err(|_| crypto("signing failed"))?;
                Ok(sig.as_ref().to_vec())
            }
            SignatureAlgorithm::RsaPkcs1Sha256 => {
                let kp = RsaKeyPair::from_pkcs8(&self.pkcs8).map_err(|_| crypto("key rejected"))?;
                let mut sig = vec![0u8; kp.public().modulus_len()];
                kp.sign(&signature::RSA_PKCS1_SHA256, &rng, message, &mut sig)
                    .map_err(|_| crypto("signing failed"))?;
                Ok(sig)
            }
            SignatureAlgorithm::Ed25519 => {
                let kp = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&self.pkcs8)
                    .map_err(|_| crypto("key rejected"))?;
                Ok(kp.sign(message).as_ref().to_vec())
            }
        }
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .field("pkcs8", &"<redacted>")
            .finish()
    }
}

/// The selected certificate and its private key, scoped to one provisioning attempt.
///
/// Clones share the same key; releasing through any clone releases it for all.
/// Signing is serialized per handle.
#[derive(Clone)]
pub struct IdentityHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    record: CertificateRecord,
    chain: Vec<Vec<u8>>,
    algorithm: SignatureAlgorithm,
    key: Mutex<Option<PrivateKey>>,
}

impl IdentityHandle {
    /// Bind `key` to `record`.
    ///
    /// `chain` holds the other certificates from the same container (public
    /// material only), presented after the leaf. Fails if the key does not
    /// belong to the certificate.
    pub fn new(record: CertificateRecord, key: PrivateKey, chain: Vec<Vec<u8>>) -> Result<Self> {
        if !key.matches_certificate(&record.der) {
            return Err(ProvisionError::Crypto(format!(
                "private key does not match certificate {}",
                record.thumbprint
            )));
        }

        Ok(Self {
            inner: Arc::new(HandleInner {
                algorithm: key.algorithm(),
                record,
                chain,
                key: Mutex::new(Some(key)),
            }),
        })
    }

    /// The selected certificate
    #[must_use]
    pub fn record(&self) -> &CertificateRecord {
        &self.inner.record
    }

    /// DER certificate presented during the handshake
    #[must_use]
    pub fn public_material(&self) -> &[u8] {
        &self.inner.record.der
    }

    /// Leaf certificate followed by the rest of the container's certificates
    #[must_use]
    pub fn certificate_chain(&self) -> Vec<&[u8]> {
        std::iter::once(self.public_material())
            .chain(self.inner.chain.iter().map(Vec::as_slice))
            .collect()
    }

    /// Identifier this device registers under
    #[must_use]
    pub fn registration_id(&self) -> &str {
        self.inner.record.registration_id()
    }

    /// Signature scheme used by [`sign`](Self::sign)
    #[must_use]
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.inner.algorithm
    }

    /// Sign a challenge with the private key.
    pub fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        let guard = self.lock_key();
        let key = guard.as_ref().ok_or(ProvisionError::HandleReleased)?;
        key.sign(challenge)
    }

    /// Drop (and zeroize) the private key now. Idempotent.
    pub fn release(&self) {
        if self.lock_key().take().is_some() {
            debug!(thumbprint = %self.inner.record.thumbprint, "identity key released");
        }
    }

    /// Returns true once the key has been released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lock_key().is_none()
    }

    /// Number of live clones of this handle (including `self`)
    #[must_use]
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn lock_key(&self) -> MutexGuard<'_, Option<PrivateKey>> {
        // A panic while signing leaves the Option intact, so poisoning is ignored.
        self.inner.key.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for IdentityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHandle")
            .field("registration_id", &self.registration_id())
            .field("thumbprint", &self.inner.record.thumbprint)
            .field("algorithm", &self.inner.algorithm)
            .field("released", &self.is_released())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{generate, handle};
    use super::*;
    use crate::store::parse_certificate;
    use ring::signature::UnparsedPublicKey;

    #[test]
    fn test_detects_p256_key() {
        let (_, key) = generate("device-1");
        let key = PrivateKey::from_pkcs8(&key).unwrap();
        assert_eq!(key.algorithm(), SignatureAlgorithm::EcdsaP256Sha256);
        assert_eq!(key.public_key().len(), 65);
    }

    #[test]
    fn test_rejects_garbage_key() {
        let err = PrivateKey::from_pkcs8(b"not a key").unwrap_err();
        assert_eq!(err.kind(), certprov_core::ErrorKind::Crypto);
    }

    #[test]
    fn test_signature_verifies_against_certificate_key() {
        let identity = handle("device-1");
        let challenge = b"nonce-1234";
        let sig = identity.sign(challenge).unwrap();

        let spki = subject_public_key(identity.public_material()).unwrap();
        UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, spki)
            .verify(challenge, &sig)
            .expect("signature verifies");
    }

    #[test]
    fn test_mismatched_key_is_refused() {
        let (der, _) = generate("device-1");
        let (_, other_key) = generate("device-2");
        let record = parse_certificate(der, true).unwrap();
        let err = IdentityHandle::new(record, PrivateKey::from_pkcs8(&other_key).unwrap(), vec![])
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_released_handle_cannot_sign() {
        let identity = handle("device-1");
        let clone = identity.clone();
        assert_eq!(identity.holders(), 2);

        identity.release();
        assert!(clone.is_released());
        assert!(matches!(clone.sign(b"x"), Err(ProvisionError::HandleReleased)));

        // Releasing twice is harmless.
        clone.release();
    }

    #[test]
    fn test_registration_id_and_chain() {
        let identity = handle("iothubx509device1");
        assert_eq!(identity.registration_id(), "iothubx509device1");
        assert_eq!(identity.certificate_chain().len(), 1);
        assert_eq!(identity.certificate_chain()[0], identity.public_material());
    }

    #[test]
    fn test_debug_redacts_key() {
        let (_, key) = generate("device-1");
        let key = PrivateKey::from_pkcs8(&key).unwrap();
        let shown = format!("{key:?}");
        assert!(shown.contains("redacted"));
    }
}

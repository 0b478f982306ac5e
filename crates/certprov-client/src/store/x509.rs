//! X.509 parsing into [`CertificateRecord`]s.

use certprov_core::{CertificateRecord, ProvisionError, Result, Thumbprint, THUMBPRINT_LEN};
use chrono::{DateTime, TimeZone, Utc};
use ring::digest::{digest, SHA256};

/// Parse a single DER-encoded X.509 certificate.
pub(crate) fn parse_certificate(der: Vec<u8>, has_private_key: bool) -> Result<CertificateRecord> {
    let mut record = {
        let (_, cert) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| ProvisionError::Crypto(format!("invalid X.509 certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(String::from);

        CertificateRecord {
            subject: cert.subject().to_string(),
            common_name,
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            thumbprint: thumbprint(&der),
            not_before: asn1_to_utc(cert.validity().not_before)?,
            not_after: asn1_to_utc(cert.validity().not_after)?,
            has_private_key,
            der: Vec::new(),
        }
    };

    record.der = der;
    Ok(record)
}

/// Raw subject public key (the BIT STRING contents) of a DER certificate.
pub(crate) fn subject_public_key(der: &[u8]) -> Option<Vec<u8>> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let key: &[u8] = cert.public_key().subject_public_key.data.as_ref();
    Some(key.to_vec())
}

/// SHA-256 thumbprint of DER bytes.
pub(crate) fn thumbprint(der: &[u8]) -> Thumbprint {
    let mut bytes = [0u8; THUMBPRINT_LEN];
    bytes.copy_from_slice(digest(&SHA256, der).as_ref());
    Thumbprint::from_bytes(bytes)
}

/// Convert an ASN.1 `GeneralizedTime` / `UTCTime` to `DateTime<Utc>`.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> Result<DateTime<Utc>> {
    let dt = t.to_datetime();
    Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond())
        .single()
        .ok_or_else(|| ProvisionError::Crypto(format!("certificate validity time out of range: {t}")))
}

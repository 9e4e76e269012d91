//! X.509 certificate inspection: fingerprint, subject, and expiry.

use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::der::asn1::BitString;
use x509_cert::der::oid::ObjectIdentifier;
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// ecdsa-with-SHA256
const ECDSA_SHA256: &str = "1.2.840.10045.4.3.2";

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("invalid certificate encoding: {0}")]
    Der(#[from] x509_cert::der::Error),
    #[error("invalid subject name: {0}")]
    Subject(String),
    #[error("certificate validity is outside the representable range")]
    Validity,
}

/// The parts of a certificate the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub fingerprint: Fingerprint,
    pub subject: String,
    pub not_after: DateTime<Utc>,
}

pub fn parse_der(der: &[u8]) -> Result<CertificateInfo, CertificateError> {
    let cert = Certificate::from_der(der)?;
    describe(&cert, Fingerprint::of_der(der))
}

pub fn parse_pem(pem: &str) -> Result<CertificateInfo, CertificateError> {
    let cert = Certificate::from_pem(pem.as_bytes())?;
    let der = cert.to_der()?;
    describe(&cert, Fingerprint::of_der(&der))
}

/// Split concatenated PEM output (as printed by keychain tools) into its
/// certificate blocks. Text outside the blocks is ignored.
pub fn split_pem_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(PEM_BEGIN) {
        let tail = &rest[start..];
        let Some(end) = tail.find(PEM_END) else {
            break;
        };
        let stop = end + PEM_END.len();
        blocks.push(format!("{}\n", &tail[..stop]));
        rest = &tail[stop..];
    }
    blocks
}

fn describe(cert: &Certificate, fingerprint: Fingerprint) -> Result<CertificateInfo, CertificateError> {
    let secs = cert
        .tbs_certificate
        .validity
        .not_after
        .to_unix_duration()
        .as_secs();
    let not_after = i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .ok_or(CertificateError::Validity)?;
    Ok(CertificateInfo {
        fingerprint,
        subject: cert.tbs_certificate.subject.to_string(),
        not_after,
    })
}

/// Encode a structurally valid certificate carrying a placeholder key and
/// signature. Nothing here verifies signatures, so this is enough for the
/// mock trust store and for fixtures.
pub fn build_unsigned_der(
    common_name: &str,
    not_after: DateTime<Utc>,
) -> Result<Vec<u8>, CertificateError> {
    let subject = Name::from_str(&format!("CN={}", escape_rdn(common_name)))
        .map_err(|e| CertificateError::Subject(e.to_string()))?;
    let algorithm = AlgorithmIdentifierOwned {
        oid: ObjectIdentifier::new_unwrap(ECDSA_SHA256),
        parameters: None,
    };
    let validity = Validity {
        not_before: Time::try_from(SystemTime::UNIX_EPOCH + Duration::from_secs(946_684_800))?,
        not_after: Time::try_from(to_system_time(not_after)?)?,
    };
    // Serial derived from the name keeps fixtures with different names distinct.
    let serial = serial_from(common_name);

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&serial)?,
        signature: algorithm.clone(),
        issuer: subject.clone(),
        validity,
        subject,
        subject_public_key_info: SubjectPublicKeyInfoOwned {
            algorithm: algorithm.clone(),
            subject_public_key: BitString::from_bytes(&[0x04; 65])?,
        },
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };
    let cert = Certificate {
        tbs_certificate,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&[0u8; 8])?,
    };
    Ok(cert.to_der()?)
}

fn to_system_time(at: DateTime<Utc>) -> Result<SystemTime, CertificateError> {
    let secs = u64::try_from(at.timestamp()).map_err(|_| CertificateError::Validity)?;
    Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
}

fn escape_rdn(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn serial_from(seed: &str) -> [u8; 8] {
    let digest = Fingerprint::of_der(seed.as_bytes());
    let mut serial = [0u8; 8];
    if let Ok(bytes) = hex::decode(&digest.as_str()[..16]) {
        serial.copy_from_slice(&bytes);
    }
    // Positive INTEGER, first byte non-zero.
    serial[0] = (serial[0] & 0x7f) | 0x01;
    serial
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn synthetic_certificate_parses_back() {
        let der = build_unsigned_der("Apple Distribution: Example Corp (ABCDE12345)", expiry())
            .unwrap();
        let info = parse_der(&der).unwrap();
        assert_eq!(info.fingerprint, Fingerprint::of_der(&der));
        assert_eq!(info.not_after, expiry());
        assert!(info.subject.contains("Apple Distribution: Example Corp"));
    }

    #[test]
    fn pem_and_der_agree_on_fingerprint() {
        use x509_cert::der::pem::LineEnding;
        use x509_cert::der::EncodePem;

        let der = build_unsigned_der("Apple Development: Dev One (ABCDE12345)", expiry()).unwrap();
        let pem = Certificate::from_der(&der)
            .unwrap()
            .to_pem(LineEnding::LF)
            .unwrap();
        let blocks = split_pem_blocks(&format!("keychain: login\n{pem}"));
        assert_eq!(blocks.len(), 1);
        let info = parse_pem(&blocks[0]).unwrap();
        assert_eq!(info.fingerprint, Fingerprint::of_der(&der));
    }

    #[test]
    fn distinct_names_give_distinct_fingerprints() {
        let a = build_unsigned_der("Apple Distribution: A", expiry()).unwrap();
        let b = build_unsigned_der("Apple Distribution: B", expiry()).unwrap();
        assert_ne!(Fingerprint::of_der(&a), Fingerprint::of_der(&b));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_der(b"definitely not a certificate").is_err());
        assert!(parse_der(&[]).is_err());
    }

    #[test]
    fn split_pem_blocks_ignores_surrounding_text() {
        let text = "SHA-1 hash: 00\n-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\nnoise\n-----BEGIN CERTIFICATE-----\nBBBB\n-----END CERTIFICATE-----\n-----BEGIN CERTIFICATE-----\ntruncated";
        let blocks = split_pem_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("AAAA"));
        assert!(blocks[1].contains("BBBB"));
        assert!(blocks.iter().all(|b| b.ends_with("-----END CERTIFICATE-----\n")));
    }

    #[test]
    fn escape_rdn_escapes_specials() {
        assert_eq!(escape_rdn("a,b=c"), "a\\,b\\=c");
        assert_eq!(escape_rdn("Plain: Name (T)"), "Plain: Name (T)");
    }
}

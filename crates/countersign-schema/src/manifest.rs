use crate::certificate::parse_der;
use crate::fingerprint::Fingerprint;
use crate::types::{ProfileUuid, TeamId};
use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

pub const KEY_ENTITLEMENTS: &str = "Entitlements";
pub const KEY_DEVELOPER_CERTIFICATES: &str = "DeveloperCertificates";
pub const KEY_NAME: &str = "Name";
pub const KEY_UUID: &str = "UUID";
pub const KEY_TEAM_IDENTIFIER: &str = "TeamIdentifier";
pub const KEY_EXPIRATION_DATE: &str = "ExpirationDate";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest payload is not a property list: {0}")]
    Plist(#[from] plist::Error),
    #[error("manifest payload is not a dictionary")]
    NotADictionary,
    #[error("manifest has no '{KEY_ENTITLEMENTS}' dictionary")]
    EntitlementsMissing,
}

/// Decoded provisioning manifest. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningManifest {
    pub name: Option<String>,
    pub uuid: Option<ProfileUuid>,
    pub team_ids: Vec<TeamId>,
    pub expiration: Option<DateTime<Utc>>,
    /// Entitlements in the order the manifest lists them.
    pub entitlements: Dictionary,
    /// Empty means the manifest does not restrict which identity may sign.
    pub authorized_fingerprints: BTreeSet<Fingerprint>,
}

impl ProvisioningManifest {
    pub fn new(entitlements: Dictionary, authorized_fingerprints: BTreeSet<Fingerprint>) -> Self {
        Self {
            name: None,
            uuid: None,
            team_ids: Vec::new(),
            expiration: None,
            entitlements,
            authorized_fingerprints,
        }
    }

    pub fn restricts_identities(&self) -> bool {
        !self.authorized_fingerprints.is_empty()
    }

    pub fn authorizes(&self, fingerprint: &Fingerprint) -> bool {
        self.authorized_fingerprints.contains(fingerprint)
    }
}

/// Decode the property list carried inside an already-unwrapped manifest
/// envelope. Accepts XML and binary plists.
///
/// Authorized certificates that are not DER data, or that fail to parse,
/// are skipped with a warning: manifests routinely list certificates that
/// have nothing to do with the current signing run.
pub fn decode_payload(payload: &[u8]) -> Result<ProvisioningManifest, ManifestError> {
    let value = Value::from_reader(Cursor::new(payload))?;
    let Value::Dictionary(root) = value else {
        return Err(ManifestError::NotADictionary);
    };

    let entitlements = root
        .get(KEY_ENTITLEMENTS)
        .and_then(Value::as_dictionary)
        .cloned()
        .ok_or(ManifestError::EntitlementsMissing)?;

    let authorized_fingerprints = collect_fingerprints(&root);

    let team_ids = root
        .get(KEY_TEAM_IDENTIFIER)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_string)
                .map(TeamId::from)
                .collect()
        })
        .unwrap_or_default();

    let expiration = root
        .get(KEY_EXPIRATION_DATE)
        .and_then(Value::as_date)
        .map(|d| DateTime::<Utc>::from(SystemTime::from(d)));

    let manifest = ProvisioningManifest {
        name: root
            .get(KEY_NAME)
            .and_then(Value::as_string)
            .map(str::to_owned),
        uuid: root
            .get(KEY_UUID)
            .and_then(Value::as_string)
            .map(ProfileUuid::from),
        team_ids,
        expiration,
        entitlements,
        authorized_fingerprints,
    };
    debug!(
        "decoded manifest {:?}: {} entitlement(s), {} authorized certificate(s)",
        manifest.name,
        manifest.entitlements.len(),
        manifest.authorized_fingerprints.len()
    );
    Ok(manifest)
}

fn collect_fingerprints(root: &Dictionary) -> BTreeSet<Fingerprint> {
    let mut out = BTreeSet::new();
    let Some(certs) = root.get(KEY_DEVELOPER_CERTIFICATES).and_then(Value::as_array) else {
        return out;
    };
    for (index, entry) in certs.iter().enumerate() {
        let Some(der) = entry.as_data() else {
            warn!("skipping authorized certificate #{index}: not a data entry");
            continue;
        };
        match parse_der(der) {
            Ok(info) => {
                debug!("authorized certificate #{index}: {} ({})", info.subject, info.fingerprint.short());
                out.insert(info.fingerprint);
            }
            Err(e) => warn!("skipping authorized certificate #{index}: {e}"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::build_unsigned_der;
    use chrono::TimeZone;

    fn payload(root: Dictionary) -> Vec<u8> {
        let mut buf = Vec::new();
        Value::Dictionary(root).to_writer_xml(&mut buf).unwrap();
        buf
    }

    fn entitlements() -> Dictionary {
        let mut d = Dictionary::new();
        d.insert(
            "application-identifier".to_owned(),
            Value::String("ABCDE12345.org.example.app".to_owned()),
        );
        d.insert("get-task-allow".to_owned(), Value::Boolean(true));
        d
    }

    fn cert(name: &str) -> Vec<u8> {
        build_unsigned_der(name, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()).unwrap()
    }

    #[test]
    fn decodes_full_manifest() {
        let good = cert("Apple Distribution: Example (ABCDE12345)");
        let mut root = Dictionary::new();
        root.insert(KEY_NAME.to_owned(), Value::String("Example Store".to_owned()));
        root.insert(KEY_UUID.to_owned(), Value::String("1234-abcd".to_owned()));
        root.insert(
            KEY_TEAM_IDENTIFIER.to_owned(),
            Value::Array(vec![Value::String("ABCDE12345".to_owned())]),
        );
        root.insert(KEY_ENTITLEMENTS.to_owned(), Value::Dictionary(entitlements()));
        root.insert(
            KEY_DEVELOPER_CERTIFICATES.to_owned(),
            Value::Array(vec![Value::Data(good.clone())]),
        );

        let m = decode_payload(&payload(root)).unwrap();
        assert_eq!(m.name.as_deref(), Some("Example Store"));
        assert_eq!(m.uuid.as_ref().map(ProfileUuid::as_str), Some("1234-abcd"));
        assert_eq!(m.team_ids, vec![TeamId::new("ABCDE12345")]);
        assert_eq!(m.entitlements.len(), 2);
        assert!(m.authorizes(&Fingerprint::of_der(&good)));
        assert!(m.restricts_identities());
    }

    #[test]
    fn entitlement_order_is_preserved() {
        let mut root = Dictionary::new();
        root.insert(KEY_ENTITLEMENTS.to_owned(), Value::Dictionary(entitlements()));
        let m = decode_payload(&payload(root)).unwrap();
        let keys: Vec<&String> = m.entitlements.keys().collect();
        assert_eq!(keys, ["application-identifier", "get-task-allow"]);
    }

    #[test]
    fn missing_entitlements_is_an_error() {
        let mut root = Dictionary::new();
        root.insert(KEY_NAME.to_owned(), Value::String("x".to_owned()));
        assert!(matches!(
            decode_payload(&payload(root)),
            Err(ManifestError::EntitlementsMissing)
        ));
    }

    #[test]
    fn entitlements_of_wrong_type_count_as_missing() {
        let mut root = Dictionary::new();
        root.insert(KEY_ENTITLEMENTS.to_owned(), Value::String("nope".to_owned()));
        assert!(matches!(
            decode_payload(&payload(root)),
            Err(ManifestError::EntitlementsMissing)
        ));
    }

    #[test]
    fn unparsable_certificates_are_skipped() {
        let good = cert("Apple Distribution: Good");
        let mut root = Dictionary::new();
        root.insert(KEY_ENTITLEMENTS.to_owned(), Value::Dictionary(Dictionary::new()));
        root.insert(
            KEY_DEVELOPER_CERTIFICATES.to_owned(),
            Value::Array(vec![
                Value::Data(b"garbage".to_vec()),
                Value::String("not data".to_owned()),
                Value::Data(good.clone()),
            ]),
        );
        let m = decode_payload(&payload(root)).unwrap();
        assert_eq!(m.authorized_fingerprints.len(), 1);
        assert!(m.authorizes(&Fingerprint::of_der(&good)));
    }

    #[test]
    fn no_certificates_means_unrestricted() {
        let mut root = Dictionary::new();
        root.insert(KEY_ENTITLEMENTS.to_owned(), Value::Dictionary(Dictionary::new()));
        let m = decode_payload(&payload(root)).unwrap();
        assert!(!m.restricts_identities());
    }

    #[test]
    fn non_plist_and_non_dictionary_payloads_fail() {
        assert!(matches!(
            decode_payload(b"\x00\x01 not a plist"),
            Err(ManifestError::Plist(_))
        ));
        let mut buf = Vec::new();
        Value::Array(Vec::new()).to_writer_xml(&mut buf).unwrap();
        assert!(matches!(
            decode_payload(&buf),
            Err(ManifestError::NotADictionary)
        ));
    }

    #[test]
    fn decoding_is_idempotent() {
        let mut root = Dictionary::new();
        root.insert(KEY_ENTITLEMENTS.to_owned(), Value::Dictionary(entitlements()));
        let bytes = payload(root);
        assert_eq!(decode_payload(&bytes).unwrap(), decode_payload(&bytes).unwrap());
    }
}

//! macOS backend: `security` for the keychain and manifest envelopes,
//! `codesign` for signing and verification.

use crate::backend::{SignRequest, SigningBackend};
use crate::command::run_capture;
use crate::ToolchainError;
use countersign_schema::{
    dedup_by_fingerprint, parse_pem, split_pem_blocks, Fingerprint, Identity,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const SECURITY: &str = "security";
const CODESIGN: &str = "codesign";

static FIND_IDENTITY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\d+\)\s+([0-9A-Fa-f]{40})\s+"(.+)"\s*(?:\(.*\))?\s*$"#)
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

#[derive(Debug, Default)]
pub struct SecurityBackend;

impl SecurityBackend {
    pub fn new() -> Self {
        Self
    }

    /// Expiry of every certificate the keychain holds under `name`, keyed by
    /// fingerprint. Best-effort: any failure just yields fewer entries.
    fn expiries_for(name: &str) -> HashMap<Fingerprint, DateTime<Utc>> {
        let mut out = HashMap::new();
        let pem = match run_capture(SECURITY, ["find-certificate", "-a", "-p", "-c", name]) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!("no certificate export for '{name}': {e}");
                return out;
            }
        };
        for block in split_pem_blocks(&pem) {
            match parse_pem(&block) {
                Ok(info) => {
                    out.insert(info.fingerprint, info.not_after);
                }
                Err(e) => debug!("unreadable certificate for '{name}': {e}"),
            }
        }
        out
    }
}

/// Parse `security find-identity -v -p codesigning` output into identities
/// without expiry, deduplicated by fingerprint.
pub fn parse_find_identity(output: &str) -> Vec<Identity> {
    let identities = output
        .lines()
        .filter_map(|line| FIND_IDENTITY_LINE.captures(line))
        .filter_map(|caps| {
            let fingerprint = Fingerprint::parse(&caps[1]).ok()?;
            Some(Identity::new(&caps[2], fingerprint))
        })
        .collect();
    dedup_by_fingerprint(identities)
}

/// Arguments for one `codesign` invocation.
pub fn codesign_args(request: &SignRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--force".into(),
        "--sign".into(),
        request.fingerprint.as_str().into(),
    ];
    if let Some(ent) = request.entitlements {
        args.push("--entitlements".into());
        args.push(ent.into());
    }
    if request.hardened_runtime {
        args.push("--options".into());
        args.push("runtime".into());
    }
    args.push(if request.timestamp {
        "--timestamp".into()
    } else {
        "--timestamp=none".into()
    });
    args.push(request.target.into());
    args
}

impl SigningBackend for SecurityBackend {
    fn name(&self) -> &'static str {
        "security"
    }

    fn available(&self) -> bool {
        crate::check_signing_prereqs().is_empty()
    }

    fn list_identities(&self) -> Result<Vec<Identity>, ToolchainError> {
        let raw = run_capture(SECURITY, ["find-identity", "-v", "-p", "codesigning"])?;
        let text = String::from_utf8_lossy(&raw);
        let mut identities = parse_find_identity(&text);

        let mut cache: HashMap<String, HashMap<Fingerprint, DateTime<Utc>>> = HashMap::new();
        for identity in &mut identities {
            let expiries = cache
                .entry(identity.name.clone())
                .or_insert_with(|| Self::expiries_for(&identity.name));
            identity.not_after = expiries.get(&identity.fingerprint).copied();
            if identity.not_after.is_none() {
                warn!(
                    "expiry unknown for '{}' ({})",
                    identity.name,
                    identity.fingerprint.short()
                );
            }
        }
        Ok(identities)
    }

    fn unwrap_manifest(&self, envelope: &[u8]) -> Result<Vec<u8>, ToolchainError> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(envelope)?;
        tmp.flush()?;
        let mut args: Vec<OsString> = vec!["cms".into(), "-D".into(), "-i".into()];
        args.push(tmp.path().into());
        run_capture(SECURITY, args)
    }

    fn sign(&self, request: &SignRequest<'_>) -> Result<(), ToolchainError> {
        run_capture(CODESIGN, codesign_args(request)).map(|_| ())
    }

    fn verify(&self, bundle: &Path) -> Result<(), ToolchainError> {
        let mut args: Vec<OsString> = vec![
            "--verify".into(),
            "--deep".into(),
            "--strict".into(),
            "--verbose=2".into(),
        ];
        args.push(bundle.into());
        run_capture(CODESIGN, args).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIND_IDENTITY: &str = r#"
Policy: Code Signing
  Matching identities
  1) 1111111111111111111111111111111111111111 "Apple Development: Dev One (ABCDE12345)"
  2) aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa "Apple Distribution: Example Corp (ABCDE12345)"
  3) AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA "Apple Distribution: Example Corp (ABCDE12345)"
  4) 2222222222222222222222222222222222222222 "Developer ID Application: "Quoted" Name (ZZZZZ99999)" (CSSMERR_TP_CERT_EXPIRED)
     4 valid identities found
"#;

    #[test]
    fn parses_and_normalizes_identities() {
        let ids = parse_find_identity(FIND_IDENTITY);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0].name, "Apple Development: Dev One (ABCDE12345)");
        assert_eq!(ids[1].fingerprint.as_str(), "A".repeat(40));
        assert_eq!(ids[2].name, "Developer ID Application: \"Quoted\" Name (ZZZZZ99999)");
        assert!(ids.iter().all(|i| i.not_after.is_none()));
    }

    #[test]
    fn ignores_noise_and_short_hashes() {
        let ids = parse_find_identity("  1) ABCD \"short\"\nrandom line\n     0 valid identities found\n");
        assert!(ids.is_empty());
    }

    #[test]
    fn codesign_args_with_timestamp_and_entitlements() {
        let hex = "B".repeat(40);
        let fp = Fingerprint::parse(&hex).unwrap();
        let req = SignRequest::new(Path::new("/tmp/App.app"), &fp)
            .with_entitlements(Some(Path::new("/tmp/ent.plist")))
            .with_hardened_runtime(true);
        let args: Vec<String> = codesign_args(&req)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "--force",
                "--sign",
                hex.as_str(),
                "--entitlements",
                "/tmp/ent.plist",
                "--options",
                "runtime",
                "--timestamp",
                "/tmp/App.app",
            ]
        );
    }

    #[test]
    fn codesign_args_without_timestamp() {
        let fp = Fingerprint::parse(&"C".repeat(40)).unwrap();
        let req = SignRequest::new(Path::new("/tmp/lib.dylib"), &fp).with_timestamp(false);
        let args: Vec<String> = codesign_args(&req)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"--timestamp=none".to_owned()));
        assert!(!args.contains(&"--entitlements".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/lib.dylib"));
    }
}

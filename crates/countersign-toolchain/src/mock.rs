//! In-process backend for tests.
//!
//! Signatures are seal files holding a blake3 digest of the signed object:
//! `_CodeSignature/mock-seal` inside a directory target, `<file>.mock-seal`
//! beside a file target. A directory digest covers every byte beneath it
//! except its own seal, nested seals included, so signing a container before
//! its nested objects fails verification the same way it does for real.

use crate::backend::{SignRequest, SigningBackend};
use crate::ToolchainError;
use countersign_schema::{Fingerprint, Identity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub const MOCK_TRUST_STORE_ENV: &str = "COUNTERSIGN_MOCK_TRUST_STORE";
pub const MOCK_ENVELOPE_MAGIC: &[u8] = b"COUNTERSIGN-MOCK-CMS\n";

const SEAL_DIR: &str = "_CodeSignature";
const SEAL_FILE: &str = "mock-seal";
const SEAL_SUFFIX: &str = ".mock-seal";

/// Where `codesign --deep` looks for nested code, and what counts as code there.
const NESTED_CODE_DIRS: &[&str] = &[
    "Frameworks",
    "PlugIns",
    "Extensions",
    "Contents/Frameworks",
    "Contents/PlugIns",
];
const NESTED_CODE_EXTENSIONS: &[&str] = &["framework", "dylib", "appex"];

/// Trust store and failure knobs, loadable from JSON.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MockTrustStore {
    pub identities: Vec<Identity>,
    /// Every trust-store query fails.
    pub unavailable: bool,
    /// Signing with a timestamp request fails; without one it succeeds.
    pub timestamp_offline: bool,
    /// File names whose signing always fails.
    pub fail_signing: Vec<String>,
    /// Path relative to the container that gets modified right after the
    /// container is signed.
    pub tamper_after_container_sign: Option<PathBuf>,
}

/// One recorded call to [`SigningBackend::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignCall {
    pub target: PathBuf,
    pub timestamp: bool,
    pub entitled: bool,
    pub succeeded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Seal {
    fingerprint: Fingerprint,
    digest: String,
    timestamped: bool,
    entitled: bool,
}

/// Wrap a plist payload the way the mock unwrapper expects it.
pub fn wrap_envelope(payload: &[u8]) -> Vec<u8> {
    let mut out = MOCK_ENVELOPE_MAGIC.to_vec();
    out.extend_from_slice(payload);
    out
}

pub struct MockBackend {
    store: MockTrustStore,
    calls: Mutex<Vec<SignCall>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_store(MockTrustStore::default())
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: MockTrustStore) -> Self {
        Self {
            store,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Load the store named by `COUNTERSIGN_MOCK_TRUST_STORE`, or start empty.
    pub fn from_env() -> Result<Self, ToolchainError> {
        match std::env::var_os(MOCK_TRUST_STORE_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ToolchainError> {
        let content = fs::read_to_string(path)?;
        let store = serde_json::from_str(&content).map_err(|e| ToolchainError::Parse {
            tool: "mock".to_owned(),
            reason: format!("{}: {e}", path.display()),
        })?;
        Ok(Self::with_store(store))
    }

    #[must_use]
    pub fn with_identities(mut self, identities: Vec<Identity>) -> Self {
        self.store.identities = identities;
        self
    }

    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.store.unavailable = true;
        self
    }

    #[must_use]
    pub fn timestamp_offline(mut self) -> Self {
        self.store.timestamp_offline = true;
        self
    }

    #[must_use]
    pub fn fail_signing_of(mut self, file_name: impl Into<String>) -> Self {
        self.store.fail_signing.push(file_name.into());
        self
    }

    #[must_use]
    pub fn tamper_on_entitled_sign(mut self, relative: impl Into<PathBuf>) -> Self {
        self.store.tamper_after_container_sign = Some(relative.into());
        self
    }

    /// Every sign call so far, in the order they were made.
    pub fn calls(&self) -> Vec<SignCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, request: &SignRequest<'_>, succeeded: bool) -> Result<(), ToolchainError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|e| failure("mock", format!("mutex poisoned: {e}")))?;
        calls.push(SignCall {
            target: request.target.to_path_buf(),
            timestamp: request.timestamp,
            entitled: request.entitlements.is_some(),
            succeeded,
        });
        Ok(())
    }

    fn check_sign(&self, request: &SignRequest<'_>) -> Result<(), ToolchainError> {
        if !request.target.exists() {
            return Err(failure(
                "codesign",
                format!("{}: No such file or directory", request.target.display()),
            ));
        }
        if !self
            .store
            .identities
            .iter()
            .any(|id| &id.fingerprint == request.fingerprint)
        {
            return Err(failure(
                "codesign",
                format!("{}: no identity found", request.fingerprint),
            ));
        }
        let file_name = request
            .target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.store.fail_signing.contains(&file_name) {
            return Err(failure(
                "codesign",
                format!("{}: internal error in Code Signing subsystem", request.target.display()),
            ));
        }
        if request.timestamp && self.store.timestamp_offline {
            return Err(failure(
                "codesign",
                format!("{}: The timestamp service is not available.", request.target.display()),
            ));
        }
        if let Some(ent) = request.entitlements {
            if !ent.is_file() {
                return Err(failure(
                    "codesign",
                    format!("{}: cannot read entitlement data", ent.display()),
                ));
            }
        }
        Ok(())
    }
}

fn failure(tool: &str, stderr: String) -> ToolchainError {
    ToolchainError::CommandFailed {
        tool: format!("{tool} (mock)"),
        status: "exit status: 1".to_owned(),
        stderr,
    }
}

fn seal_path(target: &Path) -> PathBuf {
    if target.is_dir() {
        target.join(SEAL_DIR).join(SEAL_FILE)
    } else {
        let mut name = target.as_os_str().to_owned();
        name.push(SEAL_SUFFIX);
        PathBuf::from(name)
    }
}

/// Digest of a file, or of a directory tree in sorted path order with the
/// directory's own `_CodeSignature` left out.
fn digest(target: &Path) -> Result<String, ToolchainError> {
    let mut hasher = blake3::Hasher::new();
    if target.is_dir() {
        let mut entries = Vec::new();
        collect_entries(target, target, &mut entries)?;
        entries.sort();
        for rel in entries {
            if rel.starts_with(SEAL_DIR) {
                continue;
            }
            let full = target.join(&rel);
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            let meta = fs::symlink_metadata(&full)?;
            if meta.file_type().is_symlink() {
                hasher.update(fs::read_link(&full)?.to_string_lossy().as_bytes());
            } else if meta.is_file() {
                hasher.update(&fs::read(&full)?);
            }
            hasher.update(&[0]);
        }
    } else {
        hasher.update(&fs::read(target)?);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ToolchainError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry.file_type()?;
        out.push(rel);
        if file_type.is_dir() {
            collect_entries(root, &path, out)?;
        }
    }
    Ok(())
}

/// Every seal under `root` paired with the object it covers.
fn find_seals(root: &Path, out: &mut Vec<(PathBuf, PathBuf)>) -> Result<(), ToolchainError> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            if name == SEAL_DIR {
                let seal = path.join(SEAL_FILE);
                if seal.is_file() {
                    out.push((root.to_path_buf(), seal));
                }
            } else {
                find_seals(&path, out)?;
            }
        } else if let Some(covered) = name.strip_suffix(SEAL_SUFFIX) {
            out.push((root.join(covered), path));
        }
    }
    Ok(())
}

/// Nested code objects under `bundle` that carry no seal.
fn unsealed_nested(bundle: &Path) -> Result<Vec<PathBuf>, ToolchainError> {
    let mut unsealed = Vec::new();
    for dir in NESTED_CODE_DIRS {
        let code_dir = bundle.join(dir);
        if !code_dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&code_dir)? {
            let path = entry?.path();
            let is_code = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| NESTED_CODE_EXTENSIONS.contains(&e));
            if is_code && !seal_path(&path).is_file() {
                unsealed.push(path);
            }
        }
    }
    unsealed.sort();
    Ok(unsealed)
}

fn check_seal(target: &Path, seal: &Path) -> Result<(), ToolchainError> {
    let content = fs::read_to_string(seal)?;
    let recorded: Seal = serde_json::from_str(&content)
        .map_err(|e| failure("codesign", format!("{}: malformed seal: {e}", seal.display())))?;
    if !target.exists() {
        return Err(failure(
            "codesign",
            format!("{}: sealed object is missing", target.display()),
        ));
    }
    let actual = digest(target)?;
    if actual != recorded.digest {
        return Err(failure(
            "codesign",
            format!("{}: a sealed resource is missing or invalid", target.display()),
        ));
    }
    Ok(())
}

impl SigningBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn list_identities(&self) -> Result<Vec<Identity>, ToolchainError> {
        if self.store.unavailable {
            return Err(failure(
                "security",
                "SecKeychainSearchCopyNext: The specified keychain could not be found.".to_owned(),
            ));
        }
        Ok(self.store.identities.clone())
    }

    fn unwrap_manifest(&self, envelope: &[u8]) -> Result<Vec<u8>, ToolchainError> {
        envelope
            .strip_prefix(MOCK_ENVELOPE_MAGIC)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| failure("security", "security: failed to decode message".to_owned()))
    }

    fn sign(&self, request: &SignRequest<'_>) -> Result<(), ToolchainError> {
        if let Err(e) = self.check_sign(request) {
            self.record(request, false)?;
            return Err(e);
        }

        let seal = Seal {
            fingerprint: request.fingerprint.clone(),
            digest: digest(request.target)?,
            timestamped: request.timestamp,
            entitled: request.entitlements.is_some(),
        };
        let path = seal_path(request.target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&seal).map_err(|e| failure("codesign", e.to_string()))?;
        fs::write(&path, body)?;
        debug!("mock-signed {}", request.target.display());
        self.record(request, true)?;

        if request.entitlements.is_some() {
            if let Some(rel) = &self.store.tamper_after_container_sign {
                let victim = request.target.join(rel);
                let mut file = fs::OpenOptions::new().append(true).open(&victim)?;
                file.write_all(b"tampered")?;
                debug!("mock tampered with {}", victim.display());
            }
        }
        Ok(())
    }

    fn verify(&self, bundle: &Path) -> Result<(), ToolchainError> {
        if !seal_path(bundle).is_file() {
            return Err(failure(
                "codesign",
                format!("{}: code object is not signed at all", bundle.display()),
            ));
        }
        if let Some(unsigned) = unsealed_nested(bundle)?.first() {
            return Err(failure(
                "codesign",
                format!("{}: code object is not signed at all", unsigned.display()),
            ));
        }
        let mut seals = Vec::new();
        find_seals(bundle, &mut seals)?;
        seals.sort();
        for (target, seal) in &seals {
            check_seal(target, seal)?;
        }
        debug!("mock-verified {} seal(s) under {}", seals.len(), bundle.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new(
            "Apple Distribution: Mock (ABCDE12345)",
            Fingerprint::of_der(b"mock-identity"),
        )
    }

    fn bundle(dir: &Path) -> PathBuf {
        let app = dir.join("Demo.app");
        fs::create_dir_all(app.join("Frameworks/Kit.framework")).unwrap();
        fs::write(app.join("Demo"), b"main binary").unwrap();
        fs::write(app.join("Frameworks/Kit.framework/Kit"), b"kit binary").unwrap();
        fs::write(app.join("Frameworks/libz.dylib"), b"dylib").unwrap();
        app
    }

    fn entitlements(dir: &Path) -> PathBuf {
        let path = dir.join("ent.plist");
        fs::write(&path, b"<plist/>").unwrap();
        path
    }

    #[test]
    fn envelope_roundtrip_and_rejection() {
        let backend = MockBackend::new();
        let wrapped = wrap_envelope(b"<plist/>");
        assert_eq!(backend.unwrap_manifest(&wrapped).unwrap(), b"<plist/>");
        assert!(backend.unwrap_manifest(b"garbage").is_err());
    }

    #[test]
    fn unavailable_store_fails_listing() {
        let backend = MockBackend::new().unavailable();
        assert!(backend.list_identities().is_err());
        assert!(MockBackend::new().list_identities().unwrap().is_empty());
    }

    #[test]
    fn leaves_then_root_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let ent = entitlements(dir.path());
        let id = identity();
        let backend = MockBackend::new().with_identities(vec![id.clone()]);

        let kit = app.join("Frameworks/Kit.framework");
        let dylib = app.join("Frameworks/libz.dylib");
        backend.sign(&SignRequest::new(&kit, &id.fingerprint)).unwrap();
        backend.sign(&SignRequest::new(&dylib, &id.fingerprint)).unwrap();
        backend
            .sign(&SignRequest::new(&app, &id.fingerprint).with_entitlements(Some(&ent)))
            .unwrap();

        assert!(kit.join("_CodeSignature/mock-seal").is_file());
        assert!(app.join("Frameworks/libz.dylib.mock-seal").is_file());
        backend.verify(&app).unwrap();
        assert_eq!(backend.calls().len(), 3);
    }

    #[test]
    fn root_before_leaves_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let id = identity();
        let backend = MockBackend::new().with_identities(vec![id.clone()]);

        backend.sign(&SignRequest::new(&app, &id.fingerprint)).unwrap();
        backend
            .sign(&SignRequest::new(&app.join("Frameworks/Kit.framework"), &id.fingerprint))
            .unwrap();
        assert!(backend.verify(&app).is_err());
    }

    #[test]
    fn unsigned_nested_object_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let ent = entitlements(dir.path());
        let id = identity();
        let backend = MockBackend::new().with_identities(vec![id.clone()]);

        // Kit is signed, libz is skipped, then the container.
        backend
            .sign(&SignRequest::new(&app.join("Frameworks/Kit.framework"), &id.fingerprint))
            .unwrap();
        backend
            .sign(&SignRequest::new(&app, &id.fingerprint).with_entitlements(Some(&ent)))
            .unwrap();

        let err = backend.verify(&app).unwrap_err();
        assert!(err.to_string().contains("libz.dylib"), "{err}");
    }

    #[test]
    fn unsigned_bundle_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        assert!(MockBackend::new().verify(&app).is_err());
    }

    #[test]
    fn unknown_fingerprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let stranger = Fingerprint::of_der(b"stranger");
        let backend = MockBackend::new().with_identities(vec![identity()]);
        assert!(backend.sign(&SignRequest::new(&app, &stranger)).is_err());
        assert!(!backend.calls()[0].succeeded);
    }

    #[test]
    fn offline_timestamp_only_fails_timestamped_requests() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let id = identity();
        let backend = MockBackend::new()
            .with_identities(vec![id.clone()])
            .timestamp_offline();
        let req = SignRequest::new(&app, &id.fingerprint);
        assert!(backend.sign(&req).is_err());
        backend.sign(&req.with_timestamp(false)).unwrap();
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].timestamp && !calls[0].succeeded);
        assert!(!calls[1].timestamp && calls[1].succeeded);
    }

    #[test]
    fn tamper_after_container_sign_breaks_verification() {
        let dir = tempfile::tempdir().unwrap();
        let app = bundle(dir.path());
        let ent = entitlements(dir.path());
        let id = identity();
        let backend = MockBackend::new()
            .with_identities(vec![id.clone()])
            .tamper_on_entitled_sign("Frameworks/Kit.framework/Kit");
        let kit = app.join("Frameworks/Kit.framework");
        backend.sign(&SignRequest::new(&kit, &id.fingerprint)).unwrap();
        backend
            .sign(&SignRequest::new(&app, &id.fingerprint).with_entitlements(Some(&ent)))
            .unwrap();
        assert!(backend.verify(&app).is_err());
    }

    #[test]
    fn store_loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MockTrustStore {
            identities: vec![identity()],
            fail_signing: vec!["libz.dylib".to_owned()],
            ..MockTrustStore::default()
        };
        fs::write(&path, serde_json::to_string(&store).unwrap()).unwrap();
        let backend = MockBackend::from_file(&path).unwrap();
        assert_eq!(backend.list_identities().unwrap(), vec![identity()]);

        fs::write(&path, r#"{"bogus": true}"#).unwrap();
        assert!(matches!(
            MockBackend::from_file(&path),
            Err(ToolchainError::Parse { .. })
        ));
    }
}

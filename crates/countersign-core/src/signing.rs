//! The bundle signing state machine.
//!
//! Nested code objects are signed first, the container second, and the
//! whole tree is verified last. Each signing step asks for a timestamp and,
//! if that fails, retries exactly once without one.

use crate::bundle::Bundle;
use crate::lifecycle::{validate_transition, BundleState};
use crate::CoreError;
use countersign_schema::Identity;
use countersign_toolchain::{SignRequest, SigningBackend};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SigningOptions {
    /// Request a timestamp on the first attempt of every signing step.
    pub timestamp: bool,
    pub hardened_runtime: bool,
    /// Sign nested objects on scoped threads.
    pub parallel_nested: bool,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            timestamp: true,
            hardened_runtime: false,
            parallel_nested: false,
        }
    }
}

/// What the pipeline did, for the run report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SigningReport {
    pub nested_signed: Vec<PathBuf>,
    /// Targets that were signed only after dropping the timestamp request.
    pub timestamp_fallbacks: Vec<PathBuf>,
}

pub struct SigningPipeline<'a> {
    backend: &'a dyn SigningBackend,
    identity: &'a Identity,
    bundle: &'a Bundle,
    options: SigningOptions,
    state: BundleState,
    report: SigningReport,
}

/// Outcome of one signing step after the fallback policy ran.
struct Signed {
    fell_back: bool,
}

fn sign_step(
    backend: &dyn SigningBackend,
    request: SignRequest<'_>,
    try_timestamp: bool,
) -> Result<Signed, CoreError> {
    let target = request.target;
    if try_timestamp {
        match backend.sign(&request.with_timestamp(true)) {
            Ok(()) => return Ok(Signed { fell_back: false }),
            Err(e) => warn!(
                "timestamped signing of {} failed ({e}); retrying without timestamp",
                target.display()
            ),
        }
    }
    backend
        .sign(&request.with_timestamp(false))
        .map(|()| Signed {
            fell_back: try_timestamp,
        })
        .map_err(|e| CoreError::SigningFailed {
            target: target.to_path_buf(),
            reason: e.to_string(),
        })
}

impl<'a> SigningPipeline<'a> {
    pub fn new(
        backend: &'a dyn SigningBackend,
        identity: &'a Identity,
        bundle: &'a Bundle,
        options: SigningOptions,
    ) -> Self {
        Self {
            backend,
            identity,
            bundle,
            options,
            state: BundleState::Unsigned,
            report: SigningReport::default(),
        }
    }

    pub fn state(&self) -> BundleState {
        self.state
    }

    pub fn report(&self) -> &SigningReport {
        &self.report
    }

    pub fn into_report(self) -> SigningReport {
        self.report
    }

    fn advance(&mut self, to: BundleState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!("{}: {} -> {to}", self.bundle.root().display(), self.state);
        self.state = to;
        Ok(())
    }

    fn request(&self, target: &'a Path) -> SignRequest<'a> {
        SignRequest::new(target, &self.identity.fingerprint)
            .with_hardened_runtime(self.options.hardened_runtime)
    }

    /// Sign every nested code object. The transition happens only once all
    /// of them succeeded; the first failure aborts the run.
    pub fn sign_nested(&mut self) -> Result<(), CoreError> {
        validate_transition(self.state, BundleState::NestedSigned)?;
        let nested = self.bundle.nested();
        let try_timestamp = self.options.timestamp;

        let outcomes: Vec<Result<Signed, CoreError>> =
            if self.options.parallel_nested && nested.len() > 1 {
                let backend = self.backend;
                let requests: Vec<SignRequest<'a>> =
                    nested.iter().map(|n| self.request(&n.path)).collect();
                std::thread::scope(|scope| {
                    let handles: Vec<_> = requests
                        .into_iter()
                        .map(|req| scope.spawn(move || sign_step(backend, req, try_timestamp)))
                        .collect();
                    handles
                        .into_iter()
                        .zip(nested)
                        .map(|(handle, object)| {
                            handle.join().unwrap_or_else(|_| {
                                Err(CoreError::SigningFailed {
                                    target: object.path.clone(),
                                    reason: "signing thread panicked".to_owned(),
                                })
                            })
                        })
                        .collect()
                })
            } else {
                let mut out = Vec::with_capacity(nested.len());
                for object in nested {
                    let outcome = sign_step(self.backend, self.request(&object.path), try_timestamp);
                    let failed = outcome.is_err();
                    out.push(outcome);
                    if failed {
                        break;
                    }
                }
                out
            };

        for (object, outcome) in nested.iter().zip(outcomes) {
            let signed = outcome?;
            if signed.fell_back {
                self.report.timestamp_fallbacks.push(object.relative.clone());
            }
            self.report.nested_signed.push(object.relative.clone());
        }
        info!("signed {} nested code object(s)", nested.len());
        self.advance(BundleState::NestedSigned)
    }

    /// Sign the container with the materialized entitlements descriptor.
    pub fn sign_container(&mut self, entitlements: &Path) -> Result<(), CoreError> {
        validate_transition(self.state, BundleState::ContainerSigned)?;
        let root = self.bundle.root();
        let request = self.request(root).with_entitlements(Some(entitlements));
        let signed = sign_step(self.backend, request, self.options.timestamp)?;
        if signed.fell_back {
            self.report.timestamp_fallbacks.push(PathBuf::from("."));
        }
        info!("signed container {}", root.display());
        self.advance(BundleState::ContainerSigned)
    }

    /// Strict recursive verification of the signed tree.
    pub fn verify(&mut self) -> Result<(), CoreError> {
        validate_transition(self.state, BundleState::Verified)?;
        let root = self.bundle.root();
        self.backend
            .verify(root)
            .map_err(|e| CoreError::VerificationFailed {
                bundle: root.to_path_buf(),
                reason: e.to_string(),
            })?;
        info!("verified {}", root.display());
        self.advance(BundleState::Verified)
    }

    /// Record that the verified bundle has been archived.
    pub fn mark_packaged(&mut self) -> Result<(), CoreError> {
        self.advance(BundleState::Packaged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use countersign_schema::Fingerprint;
    use countersign_toolchain::mock::MockBackend;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        bundle: Bundle,
        entitlements: PathBuf,
        identity: Identity,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("Demo.app");
        fs::create_dir_all(app.join("Frameworks/Kit.framework")).unwrap();
        fs::write(app.join("Frameworks/Kit.framework/Kit"), b"kit").unwrap();
        fs::write(app.join("Frameworks/libz.dylib"), b"z").unwrap();
        fs::write(app.join("Demo"), b"main").unwrap();
        let entitlements = dir.path().join("ent.plist");
        fs::write(&entitlements, b"<plist/>").unwrap();
        Fixture {
            bundle: Bundle::open(&app).unwrap(),
            entitlements,
            identity: Identity::new("Apple Distribution: T", Fingerprint::of_der(b"t")),
            _dir: dir,
        }
    }

    #[test]
    fn container_before_nested_is_rejected() {
        let fx = fixture();
        let backend = MockBackend::new().with_identities(vec![fx.identity.clone()]);
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, SigningOptions::default());
        assert!(matches!(
            p.sign_container(&fx.entitlements),
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(matches!(p.verify(), Err(CoreError::InvalidTransition { .. })));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn full_sequence_reaches_verified() {
        let fx = fixture();
        let backend = MockBackend::new().with_identities(vec![fx.identity.clone()]);
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, SigningOptions::default());
        p.sign_nested().unwrap();
        p.sign_container(&fx.entitlements).unwrap();
        p.verify().unwrap();
        assert_eq!(p.state(), BundleState::Verified);

        let calls = backend.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[..2].iter().all(|c| !c.entitled));
        assert!(calls[2].entitled);
        assert_eq!(calls[2].target, fx.bundle.root());
        assert!(p.report().timestamp_fallbacks.is_empty());
    }

    #[test]
    fn nested_failure_stops_before_container() {
        let fx = fixture();
        let backend = MockBackend::new()
            .with_identities(vec![fx.identity.clone()])
            .fail_signing_of("Kit.framework");
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, SigningOptions::default());
        let err = p.sign_nested().unwrap_err();
        assert!(matches!(err, CoreError::SigningFailed { ref target, .. } if target.ends_with("Kit.framework")));
        assert_eq!(p.state(), BundleState::Unsigned);
        assert!(backend.calls().iter().all(|c| !c.entitled));
    }

    #[test]
    fn timestamp_failure_falls_back_once() {
        let fx = fixture();
        let backend = MockBackend::new()
            .with_identities(vec![fx.identity.clone()])
            .timestamp_offline();
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, SigningOptions::default());
        p.sign_nested().unwrap();
        p.sign_container(&fx.entitlements).unwrap();
        p.verify().unwrap();

        // two attempts per step: timestamped then plain
        let calls = backend.calls();
        assert_eq!(calls.len(), 6);
        for pair in calls.chunks(2) {
            assert!(pair[0].timestamp && !pair[0].succeeded);
            assert!(!pair[1].timestamp && pair[1].succeeded);
        }
        assert_eq!(p.report().timestamp_fallbacks.len(), 3);
    }

    #[test]
    fn second_failure_is_fatal_without_more_retries() {
        let fx = fixture();
        let backend = MockBackend::new()
            .with_identities(vec![fx.identity.clone()])
            .fail_signing_of("libz.dylib");
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, SigningOptions::default());
        assert!(p.sign_nested().is_err());
        let attempts = backend
            .calls()
            .iter()
            .filter(|c| c.target.ends_with("libz.dylib"))
            .count();
        assert_eq!(attempts, 2);
    }

    #[test]
    fn no_timestamp_option_makes_single_attempt() {
        let fx = fixture();
        let backend = MockBackend::new()
            .with_identities(vec![fx.identity.clone()])
            .fail_signing_of("Kit.framework");
        let opts = SigningOptions {
            timestamp: false,
            ..SigningOptions::default()
        };
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, opts);
        assert!(p.sign_nested().is_err());
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn parallel_nested_signing_completes_before_container() {
        let fx = fixture();
        let backend = MockBackend::new().with_identities(vec![fx.identity.clone()]);
        let opts = SigningOptions {
            parallel_nested: true,
            ..SigningOptions::default()
        };
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, opts);
        p.sign_nested().unwrap();
        p.sign_container(&fx.entitlements).unwrap();
        p.verify().unwrap();
        let calls = backend.calls();
        assert_eq!(calls.last().map(|c| c.entitled), Some(true));
        assert_eq!(p.report().nested_signed.len(), 2);
    }

    #[test]
    fn parallel_failure_is_fatal() {
        let fx = fixture();
        let backend = MockBackend::new()
            .with_identities(vec![fx.identity.clone()])
            .fail_signing_of("libz.dylib");
        let opts = SigningOptions {
            parallel_nested: true,
            ..SigningOptions::default()
        };
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, opts);
        assert!(p.sign_nested().is_err());
        assert_eq!(p.state(), BundleState::Unsigned);
    }

    #[test]
    fn tampered_bundle_fails_verification() {
        let fx = fixture();
        let backend = MockBackend::new()
            .with_identities(vec![fx.identity.clone()])
            .tamper_on_entitled_sign("Frameworks/libz.dylib");
        let mut p = SigningPipeline::new(&backend, &fx.identity, &fx.bundle, SigningOptions::default());
        p.sign_nested().unwrap();
        p.sign_container(&fx.entitlements).unwrap();
        assert!(matches!(p.verify(), Err(CoreError::VerificationFailed { .. })));
        assert_eq!(p.state(), BundleState::ContainerSigned);
        assert!(matches!(p.mark_packaged(), Err(CoreError::InvalidTransition { .. })));
    }
}

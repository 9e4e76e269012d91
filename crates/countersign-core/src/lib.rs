//! Orchestration for Countersign signing runs.
//!
//! This crate ties the pure data model in `countersign-schema` to the external
//! tools behind `countersign-toolchain`: it enumerates and selects one signing
//! identity, decodes the provisioning manifest, walks a bundle through the
//! `Unsigned -> NestedSigned -> ContainerSigned -> Verified -> Packaged`
//! state machine, and writes the distributable archive. The [`Engine`] is the
//! single dispatcher that maps any component failure onto [`CoreError`].

pub mod bundle;
pub mod concurrency;
pub mod decode;
pub mod engine;
pub mod enumerate;
pub mod lifecycle;
pub mod package;
pub mod select;
pub mod signing;
pub mod workdir;

pub use bundle::{Bundle, NestedCodeObject, NestedKind};
pub use concurrency::{check_interrupt, install_signal_handler, shutdown_requested};
pub use decode::{decode_manifest, read_manifest, DecodedManifest};
pub use engine::{Engine, SignOptions, SignResult};
pub use enumerate::enumerate_identities;
pub use lifecycle::{validate_transition, BundleState};
pub use package::{package_bundle, SignedArtifact, PAYLOAD_DIR};
pub use select::{select_identity, select_identity_at};
pub use signing::{SigningOptions, SigningPipeline, SigningReport};
pub use workdir::WorkDir;

use countersign_schema::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("trust store unavailable: {reason}")]
    TrustStoreUnavailable { reason: String },
    #[error("cannot read manifest {}: {source}", path.display())]
    ManifestUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("manifest {} has an invalid signature envelope: {reason}", path.display())]
    ManifestSignatureInvalid { path: PathBuf, reason: String },
    #[error("manifest {} carries no entitlements", path.display())]
    EntitlementsMissing { path: PathBuf },
    #[error(
        "no identity matches '{pattern}' ({enumerated} enumerated, {authorized} authorized by manifest)"
    )]
    NoMatchingIdentity {
        pattern: String,
        enumerated: usize,
        authorized: usize,
    },
    #[error("signing {} failed: {reason}", target.display())]
    SigningFailed { target: PathBuf, reason: String },
    #[error("verification of {} failed: {reason}", bundle.display())]
    VerificationFailed { bundle: PathBuf, reason: String },
    #[error("packaging {} failed: {reason}", output.display())]
    PackagingFailed { output: PathBuf, reason: String },
    #[error("bundle {} is not usable: {reason}", path.display())]
    BundleInvalid { path: PathBuf, reason: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("interrupted")]
    Interrupted,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Pipeline stage the error belongs to, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::TrustStoreUnavailable { .. } => "enumerate",
            Self::ManifestUnreadable { .. }
            | Self::ManifestSignatureInvalid { .. }
            | Self::EntitlementsMissing { .. } => "decode",
            Self::NoMatchingIdentity { .. } => "select",
            Self::SigningFailed { .. } => "sign",
            Self::VerificationFailed { .. } => "verify",
            Self::PackagingFailed { .. } => "package",
            Self::BundleInvalid { .. } => "bundle",
            Self::InvalidTransition { .. } => "pipeline",
            Self::Interrupted => "interrupt",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_follow_pipeline_order() {
        let sign = CoreError::SigningFailed {
            target: PathBuf::from("/b/App.app"),
            reason: "boom".into(),
        };
        assert_eq!(sign.stage(), "sign");
        assert!(sign.to_string().contains("/b/App.app"));
        assert_eq!(
            CoreError::EntitlementsMissing {
                path: PathBuf::from("m")
            }
            .stage(),
            "decode"
        );
        assert_eq!(CoreError::Interrupted.stage(), "interrupt");
    }
}

//! Data model for Countersign: fingerprints, identities, certificates,
//! provisioning manifests, entitlements, signing policy, and configuration.
//!
//! Everything in this crate is pure. Talking to the trust store, the manifest
//! envelope verifier, or the signing tools lives in `countersign-toolchain`;
//! ordering and error policy live in `countersign-core`.

pub mod certificate;
pub mod config;
pub mod entitlements;
pub mod fingerprint;
pub mod identity;
pub mod manifest;
pub mod policy;
pub mod types;

pub use certificate::{
    build_unsigned_der, parse_der, parse_pem, split_pem_blocks, CertificateError, CertificateInfo,
};
pub use config::{
    load_config, parse_config_file, parse_config_str, ArchiveFormat, ConfigError, ConfigFile,
    PackageSection, PolicyOverrides, PolicySection, SigningSection, DEFAULT_CONFIG_FILE,
};
pub use entitlements::{materialize, write_descriptor, DEBUG_ALLOW_KEY};
pub use fingerprint::{Fingerprint, FingerprintError};
pub use identity::{dedup_by_fingerprint, Identity};
pub use manifest::{decode_payload, ManifestError, ProvisioningManifest};
pub use policy::{SignKind, SigningPolicy, TieBreak};
pub use types::{ProfileUuid, TeamId};

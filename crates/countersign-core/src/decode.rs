use crate::CoreError;
use countersign_schema::{decode_payload, ManifestError, ProvisioningManifest};
use countersign_toolchain::SigningBackend;
use std::path::Path;
use tracing::info;

/// A decoded manifest together with the unwrapped plist it came from.
#[derive(Debug, Clone)]
pub struct DecodedManifest {
    pub manifest: ProvisioningManifest,
    pub payload: Vec<u8>,
}

/// Unwrap the signed envelope, then decode the payload.
///
/// `origin` only labels errors. A payload that does not parse as a plist
/// dictionary is reported as an invalid envelope: whatever the verifier
/// handed back is not a manifest.
pub fn decode_manifest(
    backend: &dyn SigningBackend,
    envelope: &[u8],
    origin: &Path,
) -> Result<DecodedManifest, CoreError> {
    let payload =
        backend
            .unwrap_manifest(envelope)
            .map_err(|e| CoreError::ManifestSignatureInvalid {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;

    let manifest = decode_payload(&payload).map_err(|e| match e {
        ManifestError::EntitlementsMissing => CoreError::EntitlementsMissing {
            path: origin.to_path_buf(),
        },
        other => CoreError::ManifestSignatureInvalid {
            path: origin.to_path_buf(),
            reason: other.to_string(),
        },
    })?;

    info!(
        "manifest {}: {} entitlement(s), {} authorized certificate(s)",
        manifest.name.as_deref().unwrap_or("(unnamed)"),
        manifest.entitlements.len(),
        manifest.authorized_fingerprints.len()
    );
    Ok(DecodedManifest { manifest, payload })
}

pub fn read_manifest(backend: &dyn SigningBackend, path: &Path) -> Result<DecodedManifest, CoreError> {
    let envelope = std::fs::read(path).map_err(|source| CoreError::ManifestUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    decode_manifest(backend, &envelope, path)
}

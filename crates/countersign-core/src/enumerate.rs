use crate::CoreError;
use countersign_schema::{dedup_by_fingerprint, Identity};
use countersign_toolchain::SigningBackend;
use tracing::{debug, info};

/// Snapshot every signing identity the trust store currently offers.
///
/// An empty store is a valid answer. Only a failed query is an error.
pub fn enumerate_identities(backend: &dyn SigningBackend) -> Result<Vec<Identity>, CoreError> {
    let raw = backend
        .list_identities()
        .map_err(|e| CoreError::TrustStoreUnavailable {
            reason: e.to_string(),
        })?;
    let identities = dedup_by_fingerprint(raw);
    for id in &identities {
        debug!(
            "identity {} '{}' expires {}",
            id.fingerprint.short(),
            id.name,
            id.not_after
                .map_or_else(|| "unknown".to_owned(), |t| t.to_rfc3339())
        );
    }
    info!(
        "{} identit{} available from {} trust store",
        identities.len(),
        if identities.len() == 1 { "y" } else { "ies" },
        backend.name()
    );
    Ok(identities)
}

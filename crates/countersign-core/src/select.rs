//! Identity selection: name filter, manifest authorization, tie-break.

use crate::CoreError;
use chrono::{DateTime, Utc};
use countersign_schema::{Identity, ProvisioningManifest, SigningPolicy, TieBreak};
use tracing::{debug, info, warn};

/// Pick exactly one identity for this run. See [`select_identity_at`].
pub fn select_identity(
    identities: &[Identity],
    manifest: &ProvisioningManifest,
    policy: &SigningPolicy,
) -> Result<Identity, CoreError> {
    select_identity_at(identities, manifest, policy, Utc::now())
}

/// Pick exactly one identity, judging expiry against `now`.
///
/// Candidates must pass the policy's name filter and, when the manifest lists
/// any authorized certificates, be one of them. Expired identities stay
/// eligible; choosing one only logs a warning.
pub fn select_identity_at(
    identities: &[Identity],
    manifest: &ProvisioningManifest,
    policy: &SigningPolicy,
    now: DateTime<Utc>,
) -> Result<Identity, CoreError> {
    let named: Vec<&Identity> = identities
        .iter()
        .filter(|id| policy.admits_name(&id.name))
        .collect();
    debug!("{} of {} identities match by name", named.len(), identities.len());

    let candidates: Vec<&Identity> = if manifest.restricts_identities() {
        named
            .into_iter()
            .filter(|id| {
                let ok = manifest.authorizes(&id.fingerprint);
                if !ok {
                    debug!(
                        "'{}' ({}) is not authorized by the manifest",
                        id.name,
                        id.fingerprint.short()
                    );
                }
                ok
            })
            .collect()
    } else {
        named
    };

    let chosen = match policy.tie_break {
        TieBreak::First => candidates.first().copied(),
        TieBreak::Newest => newest(&candidates),
    }
    .ok_or_else(|| CoreError::NoMatchingIdentity {
        pattern: policy.name_pattern.as_str().to_owned(),
        enumerated: identities.len(),
        authorized: manifest.authorized_fingerprints.len(),
    })?;

    if chosen.is_expired_at(now) {
        warn!(
            "selected identity '{}' ({}) expired on {}",
            chosen.name,
            chosen.fingerprint.short(),
            chosen.not_after.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
    }
    info!(
        "selected '{}' ({}) from {} candidate(s) by {}",
        chosen.name,
        chosen.fingerprint.short(),
        candidates.len(),
        policy.tie_break
    );
    Ok(chosen.clone())
}

/// Latest `not_after` wins; unknown expiry ranks below every known one, and
/// equal keys keep the earliest candidate.
fn newest<'a>(candidates: &[&'a Identity]) -> Option<&'a Identity> {
    let mut best: Option<&'a Identity> = None;
    for &candidate in candidates {
        if candidate.not_after.is_none() {
            warn!(
                "expiry of '{}' ({}) is unknown; ranking it last",
                candidate.name,
                candidate.fingerprint.short()
            );
        }
        match best {
            Some(current) if candidate.not_after <= current.not_after => {}
            _ => best = Some(candidate),
        }
    }
    best
}

use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one signing identity from the trust store.
///
/// Uniqueness is by fingerprint; names are free text and may collide.
/// `not_after` is `None` when the store could not tell us the expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub not_after: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(name: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            name: name.into(),
            fingerprint,
            not_after: None,
        }
    }

    #[must_use]
    pub fn expiring(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after.is_some_and(|t| t <= now)
    }
}

/// Drop later entries whose fingerprint was already seen, keeping first-seen order.
pub fn dedup_by_fingerprint(identities: Vec<Identity>) -> Vec<Identity> {
    let mut seen = std::collections::HashSet::new();
    identities
        .into_iter()
        .filter(|id| seen.insert(id.fingerprint.clone()))
        .collect()
}

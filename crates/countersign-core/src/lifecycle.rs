use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Signature state of a bundle during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleState {
    Unsigned,
    NestedSigned,
    ContainerSigned,
    Verified,
    Packaged,
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BundleState::Unsigned => "unsigned",
            BundleState::NestedSigned => "nested-signed",
            BundleState::ContainerSigned => "container-signed",
            BundleState::Verified => "verified",
            BundleState::Packaged => "packaged",
        })
    }
}

pub fn validate_transition(from: BundleState, to: BundleState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (BundleState::Unsigned, BundleState::NestedSigned)
            | (BundleState::NestedSigned, BundleState::ContainerSigned)
            | (BundleState::ContainerSigned, BundleState::Verified)
            | (BundleState::Verified, BundleState::Packaged)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(BundleState::Unsigned, BundleState::NestedSigned).is_ok());
        assert!(
            validate_transition(BundleState::NestedSigned, BundleState::ContainerSigned).is_ok()
        );
        assert!(validate_transition(BundleState::ContainerSigned, BundleState::Verified).is_ok());
        assert!(validate_transition(BundleState::Verified, BundleState::Packaged).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        // container before nested
        assert!(validate_transition(BundleState::Unsigned, BundleState::ContainerSigned).is_err());
        // packaging an unverified bundle
        assert!(validate_transition(BundleState::ContainerSigned, BundleState::Packaged).is_err());
        assert!(validate_transition(BundleState::Verified, BundleState::Unsigned).is_err());
        assert!(validate_transition(BundleState::Packaged, BundleState::Packaged).is_err());
    }

    #[test]
    fn display_is_kebab_case() {
        assert_eq!(BundleState::NestedSigned.to_string(), "nested-signed");
        assert_eq!(
            serde_json::to_string(&BundleState::ContainerSigned).unwrap(),
            "\"container-signed\""
        );
    }
}

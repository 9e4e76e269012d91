use crate::ToolchainError;
use countersign_schema::{Fingerprint, Identity};
use std::path::Path;

/// One invocation of the signing primitive.
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    pub target: &'a Path,
    pub fingerprint: &'a Fingerprint,
    /// Entitlements descriptor; only the container signature carries one.
    pub entitlements: Option<&'a Path>,
    /// Ask the timestamp authority to countersign.
    pub timestamp: bool,
    pub hardened_runtime: bool,
}

impl<'a> SignRequest<'a> {
    pub fn new(target: &'a Path, fingerprint: &'a Fingerprint) -> Self {
        Self {
            target,
            fingerprint,
            entitlements: None,
            timestamp: true,
            hardened_runtime: false,
        }
    }

    #[must_use]
    pub fn with_entitlements(mut self, path: Option<&'a Path>) -> Self {
        self.entitlements = path;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_hardened_runtime(mut self, on: bool) -> Self {
        self.hardened_runtime = on;
        self
    }
}

pub trait SigningBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Every signing identity currently installed. An empty list is a valid
    /// answer; an error means the store could not be queried at all.
    fn list_identities(&self) -> Result<Vec<Identity>, ToolchainError>;

    /// Verify and strip the signed envelope around a provisioning manifest,
    /// returning the inner property list bytes.
    fn unwrap_manifest(&self, envelope: &[u8]) -> Result<Vec<u8>, ToolchainError>;

    fn sign(&self, request: &SignRequest<'_>) -> Result<(), ToolchainError>;

    /// Strict, recursive signature check over the whole bundle tree.
    fn verify(&self, bundle: &Path) -> Result<(), ToolchainError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn SigningBackend>, ToolchainError> {
    match name {
        "security" => Ok(Box::new(crate::security::SecurityBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::from_env()?)),
        other => Err(ToolchainError::UnknownBackend(other.to_owned())),
    }
}

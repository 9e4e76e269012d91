use crate::bundle::Bundle;
use crate::concurrency::check_interrupt;
use crate::decode::read_manifest;
use crate::enumerate::enumerate_identities;
use crate::lifecycle::BundleState;
use crate::package::{package_bundle, SignedArtifact};
use crate::select::select_identity;
use crate::signing::{SigningOptions, SigningPipeline};
use crate::workdir::WorkDir;
use crate::CoreError;
use countersign_schema::{materialize, ArchiveFormat, Identity, ProvisioningManifest, SigningPolicy};
use countersign_toolchain::SigningBackend;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a `sign` run needs besides its three paths.
#[derive(Debug, Clone)]
pub struct SignOptions {
    pub policy: SigningPolicy,
    pub signing: SigningOptions,
    pub format: ArchiveFormat,
}

/// Result of a successful signing run.
#[derive(Debug, Clone, Serialize)]
pub struct SignResult {
    pub identity: Identity,
    pub manifest_name: Option<String>,
    pub entitlement_count: usize,
    pub nested_signed: Vec<PathBuf>,
    pub timestamp_fallbacks: Vec<PathBuf>,
    pub state: BundleState,
    pub artifact: SignedArtifact,
}

/// Single dispatcher for Countersign runs.
///
/// Stages run in a fixed order and the first failure ends the run; scratch
/// files live in a [`WorkDir`] that is gone by the time this returns.
pub struct Engine {
    backend: Arc<dyn SigningBackend>,
}

impl Engine {
    pub fn new(backend: Arc<dyn SigningBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn SigningBackend {
        self.backend.as_ref()
    }

    pub fn identities(&self) -> Result<Vec<Identity>, CoreError> {
        enumerate_identities(self.backend())
    }

    pub fn inspect_manifest(&self, path: &Path) -> Result<ProvisioningManifest, CoreError> {
        Ok(read_manifest(self.backend(), path)?.manifest)
    }

    pub fn sign(
        &self,
        bundle: &Path,
        manifest: &Path,
        output: &Path,
        options: &SignOptions,
    ) -> Result<SignResult, CoreError> {
        self.sign_with_progress(bundle, manifest, output, options, &mut |_: &'static str| {})
    }

    /// Like [`Engine::sign`], reporting each stage name as it starts.
    pub fn sign_with_progress(
        &self,
        bundle_path: &Path,
        manifest_path: &Path,
        output: &Path,
        options: &SignOptions,
        progress: &mut dyn FnMut(&'static str),
    ) -> Result<SignResult, CoreError> {
        info!(
            "signing {} with {} into {}",
            bundle_path.display(),
            manifest_path.display(),
            output.display()
        );
        let backend = self.backend();
        check_interrupt()?;

        progress("decoding manifest");
        let decoded = read_manifest(backend, manifest_path)?;
        let workdir = WorkDir::new()?;
        workdir.write_manifest(&decoded.payload)?;
        check_interrupt()?;

        progress("selecting identity");
        let identities = enumerate_identities(backend)?;
        let identity = select_identity(&identities, &decoded.manifest, &options.policy)?;
        check_interrupt()?;

        let entitlements = materialize(&decoded.manifest.entitlements);
        let entitlements_path = workdir.write_entitlements(&entitlements)?;
        debug!("entitlements descriptor at {}", entitlements_path.display());

        let bundle = Bundle::open(bundle_path)?;
        let mut pipeline = SigningPipeline::new(backend, &identity, &bundle, options.signing);

        progress("signing nested code");
        pipeline.sign_nested()?;
        check_interrupt()?;

        progress("signing container");
        pipeline.sign_container(&entitlements_path)?;
        check_interrupt()?;

        progress("verifying");
        pipeline.verify()?;
        check_interrupt()?;

        progress("packaging");
        let artifact = package_bundle(&bundle, output, options.format)?;
        pipeline.mark_packaged()?;

        let state = pipeline.state();
        let report = pipeline.into_report();
        info!(
            "signed {} as '{}' -> {}",
            bundle_path.display(),
            identity.name,
            artifact.path.display()
        );
        Ok(SignResult {
            manifest_name: decoded.manifest.name.clone(),
            entitlement_count: entitlements.len(),
            nested_signed: report.nested_signed,
            timestamp_fallbacks: report.timestamp_fallbacks,
            state,
            artifact,
            identity,
        })
    }
}

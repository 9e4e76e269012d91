use crate::concurrency::ScratchGuard;
use countersign_schema::write_descriptor;
use plist::Dictionary;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const MANIFEST_FILE: &str = "manifest.plist";
const ENTITLEMENTS_FILE: &str = "entitlements.plist";

/// Per-run scratch directory for decoded artifacts. Deleted on drop,
/// whichever way the run ends.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
    _guard: ScratchGuard,
}

impl WorkDir {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("countersign-").tempdir()?;
        let guard = ScratchGuard::register(dir.path());
        debug!("work directory {}", dir.path().display());
        Ok(Self { dir, _guard: guard })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path().join(MANIFEST_FILE)
    }

    pub fn entitlements_path(&self) -> PathBuf {
        self.path().join(ENTITLEMENTS_FILE)
    }

    pub fn write_manifest(&self, payload: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.manifest_path();
        std::fs::write(&path, payload)?;
        Ok(path)
    }

    pub fn write_entitlements(&self, entitlements: &Dictionary) -> std::io::Result<PathBuf> {
        let path = self.entitlements_path();
        write_descriptor(entitlements, &path)?;
        Ok(path)
    }
}

use crate::command::run_capture;
use crate::ToolchainError;
use std::ffi::OsStr;
use std::path::Path;

const DITTO: &str = "ditto";

/// Zip `source` into `dest` with `ditto`, keeping `source`'s own directory
/// name as the archive root. Resource forks and extended attributes are
/// sequestered under `__MACOSX`, matching Xcode exports.
pub fn ditto_zip(source: &Path, dest: &Path) -> Result<(), ToolchainError> {
    run_capture(
        DITTO,
        [
            OsStr::new("-c"),
            OsStr::new("-k"),
            OsStr::new("--sequesterRsrc"),
            OsStr::new("--keepParent"),
            source.as_os_str(),
            dest.as_os_str(),
        ],
    )
    .map(|_| ())
}

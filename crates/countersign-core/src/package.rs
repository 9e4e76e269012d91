//! Distributable archives: the verified bundle under a fixed `Payload/` root.

use crate::bundle::Bundle;
use crate::concurrency::ScratchGuard;
use crate::CoreError;
use countersign_schema::ArchiveFormat;
use countersign_toolchain::archive::ditto_zip;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

/// Top-level directory every archive places the bundle under.
pub const PAYLOAD_DIR: &str = "Payload";

const ZSTD_LEVEL: i32 = 19;

#[derive(Debug, Clone, Serialize)]
pub struct SignedArtifact {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub size: u64,
    pub blake3: String,
}

/// Write `bundle` into a new archive at `output`, replacing whatever is there.
///
/// The archive is built in a temporary file beside `output` and only moved
/// into place once it is complete and non-empty.
pub fn package_bundle(
    bundle: &Bundle,
    output: &Path,
    format: ArchiveFormat,
) -> Result<SignedArtifact, CoreError> {
    let fail = |reason: String| CoreError::PackagingFailed {
        output: output.to_path_buf(),
        reason,
    };

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if output.is_dir() {
        return Err(fail("output path is a directory".to_owned()));
    }
    if inside_bundle(bundle, &parent) {
        return Err(fail(format!(
            "output must not be inside the bundle {}",
            bundle.root().display()
        )));
    }
    let (mut staged, staged_guard) = stage_archive(&parent)
        .map_err(|e| fail(format!("creating temporary archive in {}: {e}", parent.display())))?;

    match format {
        ArchiveFormat::TarZst => write_tar_zst(bundle, &mut staged),
        ArchiveFormat::Ipa => write_ipa(bundle, &staged),
    }
    .map_err(|e| fail(e.to_string()))?;

    let size = staged.as_file().metadata().map_err(|e| fail(e.to_string()))?.len();
    if size == 0 {
        return Err(fail("archive writer produced an empty file".to_owned()));
    }
    let blake3 = digest_file(staged.path()).map_err(|e| fail(e.to_string()))?;

    staged
        .persist(output)
        .map_err(|e| fail(format!("moving archive into place: {}", e.error)))?;
    drop(staged_guard);
    info!("wrote {format} archive {} ({size} bytes)", output.display());

    Ok(SignedArtifact {
        path: output.to_path_buf(),
        format,
        size,
        blake3,
    })
}

fn inside_bundle(bundle: &Bundle, dir: &Path) -> bool {
    let Ok(dir) = dir.canonicalize() else {
        return false;
    };
    let root = bundle
        .root()
        .canonicalize()
        .unwrap_or_else(|_| bundle.root().to_path_buf());
    dir.starts_with(root)
}

/// Temporary archive beside the destination, registered for signal cleanup.
fn stage_archive(parent: &Path) -> io::Result<(NamedTempFile, ScratchGuard)> {
    let staged = tempfile::Builder::new()
        .prefix(".countersign-")
        .suffix(".partial")
        .tempfile_in(parent)?;
    let guard = ScratchGuard::register(staged.path());
    Ok((staged, guard))
}

fn ipa_staging_dir() -> io::Result<(TempDir, ScratchGuard)> {
    let staging = tempfile::Builder::new().prefix("countersign-ipa-").tempdir()?;
    let guard = ScratchGuard::register(staging.path());
    Ok((staging, guard))
}

fn digest_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Archive-relative name of `rel` inside the bundle.
fn entry_name(bundle_name: &str, rel: &str) -> String {
    if rel.is_empty() {
        format!("{PAYLOAD_DIR}/{bundle_name}")
    } else {
        format!("{PAYLOAD_DIR}/{bundle_name}/{rel}")
    }
}

fn write_tar_zst(bundle: &Bundle, staged: &mut NamedTempFile) -> io::Result<()> {
    let tar = pack_tree(bundle)?;
    let mut encoder = zstd::Encoder::new(staged.as_file_mut(), ZSTD_LEVEL)?;
    encoder.write_all(&tar)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Deterministic tar of the bundle: sorted entries, zero mtimes, root
/// ownership, permissions and symlinks preserved.
pub fn pack_tree(bundle: &Bundle) -> io::Result<Vec<u8>> {
    let bundle_name = bundle.dir_name().to_string_lossy().into_owned();
    let root = bundle.root();
    let mut entries = collect_entries(root, root)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut ar = tar::Builder::new(Vec::new());
    ar.follow_symlinks(false);

    let mut payload = tar::Header::new_gnu();
    payload.set_entry_type(tar::EntryType::Directory);
    payload.set_mtime(0);
    payload.set_uid(0);
    payload.set_gid(0);
    payload.set_mode(0o755);
    payload.set_size(0);
    payload.set_cksum();
    ar.append_data(&mut payload, format!("{PAYLOAD_DIR}/"), io::empty())?;
    append_dir(&mut ar, &entry_name(&bundle_name, ""), root)?;

    for (rel, full) in &entries {
        let name = entry_name(&bundle_name, rel);
        let ft = match full.symlink_metadata() {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("skipping {rel}: metadata error: {e}");
                continue;
            }
        };
        if ft.is_file() {
            append_file(&mut ar, &name, full)?;
        } else if ft.is_dir() {
            append_dir(&mut ar, &name, full)?;
        } else if ft.is_symlink() {
            append_symlink(&mut ar, &name, full)?;
        } else {
            warn!("skipping unsupported file type: {rel}");
        }
    }
    debug!("packed {} entries from {}", entries.len(), root.display());
    ar.into_inner()
}

/// Recursively collect (relative_path, full_path) pairs from a directory tree.
fn collect_entries(root: &Path, current: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut result = Vec::new();
    for entry in fs::read_dir(current)? {
        let full = entry?.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| io::Error::other(format!("path strip: {e}")))?
            .to_string_lossy()
            .into_owned();
        if full.symlink_metadata()?.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> io::Result<tar::Header> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file(ar: &mut tar::Builder<Vec<u8>>, name: &str, full_path: &Path) -> io::Result<()> {
    let data = fs::read(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, name, data.as_slice())
}

fn append_dir(ar: &mut tar::Builder<Vec<u8>>, name: &str, full_path: &Path) -> io::Result<()> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_data(&mut header, format!("{name}/"), io::empty())
}

fn append_symlink(ar: &mut tar::Builder<Vec<u8>>, name: &str, full_path: &Path) -> io::Result<()> {
    let target = fs::read_link(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, name, &target)
}

/// Stage `Payload/<bundle>` in a scoped directory and zip it with `ditto`.
fn write_ipa(bundle: &Bundle, staged: &NamedTempFile) -> io::Result<()> {
    let (staging, _guard) = ipa_staging_dir()?;
    let payload = staging.path().join(PAYLOAD_DIR);
    copy_tree(bundle.root(), &payload.join(bundle.dir_name()))?;
    ditto_zip(&payload, staged.path()).map_err(io::Error::other)
}

/// Copy a directory tree, recreating symlinks instead of following them.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    fs::set_permissions(dst, src.metadata()?.permissions())?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let ft = entry.file_type()?;
        if ft.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(&from)?, &to)?;
        } else if ft.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

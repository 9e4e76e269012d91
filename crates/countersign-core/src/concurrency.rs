use crate::CoreError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Scratch files and directories alive right now; the second signal removes
/// them before exiting.
static LIVE_SCRATCH: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Exit status for a run killed by a second interrupt (128 + SIGINT).
pub const INTERRUPTED_EXIT: i32 = 130;

/// Handles SIGINT and SIGTERM. The first signal asks the run to stop after
/// the current step; the second removes live scratch paths and exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            remove_live_scratch();
            std::process::exit(INTERRUPTED_EXIT);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt received, stopping after the current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// `Err(Interrupted)` once a shutdown has been requested.
pub fn check_interrupt() -> Result<(), CoreError> {
    if shutdown_requested() {
        Err(CoreError::Interrupted)
    } else {
        Ok(())
    }
}

/// Keeps a scratch path in the cleanup registry until dropped.
#[derive(Debug)]
pub(crate) struct ScratchGuard {
    path: PathBuf,
}

impl ScratchGuard {
    pub(crate) fn register(path: &Path) -> Self {
        if let Ok(mut live) = LIVE_SCRATCH.lock() {
            live.push(path.to_path_buf());
        }
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Ok(mut live) = LIVE_SCRATCH.lock() {
            live.retain(|p| p != &self.path);
        }
    }
}

pub fn live_scratch_paths() -> Vec<PathBuf> {
    LIVE_SCRATCH
        .lock()
        .map(|live| live.clone())
        .unwrap_or_default()
}

fn remove_live_scratch() {
    remove_scratch(&live_scratch_paths());
}

fn remove_scratch(paths: &[PathBuf]) {
    for path in paths {
        let _ = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn registry_tracks_and_forgets() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ScratchGuard::register(dir.path());
        assert!(live_scratch_paths().iter().any(|p| p == dir.path()));
        drop(guard);
        assert!(!live_scratch_paths().iter().any(|p| p == dir.path()));
    }

    #[test]
    fn cleanup_removes_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("stage");
        fs::create_dir_all(staged.join("Payload")).unwrap();
        let partial = dir.path().join("out.partial");
        fs::write(&partial, b"half").unwrap();
        let _a = ScratchGuard::register(&staged);
        let _b = ScratchGuard::register(&partial);
        let ours: Vec<PathBuf> = live_scratch_paths()
            .into_iter()
            .filter(|p| p.starts_with(dir.path()))
            .collect();
        assert_eq!(ours.len(), 2);

        remove_scratch(&ours);
        assert!(!staged.exists());
        assert!(!partial.exists());
    }

    #[test]
    fn no_interrupt_by_default() {
        assert!(!shutdown_requested());
        assert!(check_interrupt().is_ok());
    }
}

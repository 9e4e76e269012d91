//! External collaborators for the signing pipeline.
//!
//! Everything that leaves the process goes through the [`SigningBackend`]
//! trait: enumerating trust-store identities, unwrapping a signed manifest
//! envelope, invoking the signing primitive, and strict verification. The
//! `security` backend drives the macOS `security` and `codesign` tools; the
//! `mock` backend keeps everything in-process for tests. The archive writer
//! and prerequisite checks live here too.

pub mod archive;
pub mod backend;
pub mod command;
pub mod mock;
pub mod prereq;
pub mod security;

pub use backend::{select_backend, SignRequest, SigningBackend};
pub use prereq::{check_archive_prereqs, check_signing_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("toolchain I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("required tool '{0}' is not installed or not on PATH")]
    ToolUnavailable(String),
    #[error("{tool} exited with {status}: {stderr}")]
    CommandFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected output from {tool}: {reason}")]
    Parse { tool: String, reason: String },
    #[error("unknown backend '{0}', expected 'security' or 'mock'")]
    UnknownBackend(String),
}

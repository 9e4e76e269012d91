pub mod completions;
pub mod doctor;
pub mod identities;
pub mod manifest;
pub mod sign;

use chrono::{DateTime, Utc};
use countersign_core::CoreError;
use countersign_schema::ConfigError;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_TRUST_STORE: u8 = 10;
pub const EXIT_MANIFEST: u8 = 11;
pub const EXIT_ENTITLEMENTS: u8 = 12;
pub const EXIT_NO_IDENTITY: u8 = 13;
pub const EXIT_SIGNING: u8 = 14;
pub const EXIT_VERIFICATION: u8 = 15;
pub const EXIT_PACKAGING: u8 = 16;
pub const EXIT_INTERRUPTED: u8 = 130;

/// A command failure: the message for stderr and the process exit code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::TrustStoreUnavailable { .. } => EXIT_TRUST_STORE,
        CoreError::ManifestUnreadable { .. } | CoreError::ManifestSignatureInvalid { .. } => {
            EXIT_MANIFEST
        }
        CoreError::EntitlementsMissing { .. } => EXIT_ENTITLEMENTS,
        CoreError::NoMatchingIdentity { .. } => EXIT_NO_IDENTITY,
        CoreError::SigningFailed { .. } => EXIT_SIGNING,
        CoreError::VerificationFailed { .. } => EXIT_VERIFICATION,
        CoreError::PackagingFailed { .. } => EXIT_PACKAGING,
        CoreError::Interrupted => EXIT_INTERRUPTED,
        CoreError::Config(_) => EXIT_CONFIG,
        CoreError::BundleInvalid { .. } | CoreError::InvalidTransition { .. } | CoreError::Io(_) => {
            EXIT_FAILURE
        }
    }
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        Self::new(exit_code_for(&err), format!("[{}] {err}", err.stage()))
    }
}

impl From<ConfigError> for Failure {
    fn from(err: ConfigError) -> Self {
        Self::new(EXIT_CONFIG, format!("[config] {err}"))
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(EXIT_FAILURE, message)
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, Failure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Failure::new(EXIT_FAILURE, format!("JSON serialization failed: {e}")))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Expiry rendered for terminals: red once expired, yellow within 30 days.
pub fn colorize_expiry(not_after: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    use console::Style;
    let Some(at) = not_after else {
        return Style::new().dim().apply_to("unknown").to_string();
    };
    let text = at.format("%Y-%m-%d").to_string();
    if at <= now {
        Style::new().red().apply_to(format!("{text} (expired)")).to_string()
    } else if at - now < chrono::Duration::days(30) {
        Style::new().yellow().apply_to(text).to_string()
    } else {
        Style::new().green().apply_to(text).to_string()
    }
}

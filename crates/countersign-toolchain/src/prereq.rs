use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

const XCODE_HINT: &str = "xcode-select --install (macOS only)";

/// Tools the `security` backend shells out to.
pub fn check_signing_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("security") {
        missing.push(MissingPrereq {
            name: "security",
            purpose: "keychain identity listing and manifest envelope decoding",
            install_hint: "ships with macOS",
        });
    }

    if !command_exists("codesign") {
        missing.push(MissingPrereq {
            name: "codesign",
            purpose: "signing and strict verification of bundles",
            install_hint: XCODE_HINT,
        });
    }

    missing
}

/// Tools needed to write `ipa` archives. `tar-zst` output needs none.
pub fn check_archive_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if !command_exists("ditto") {
        missing.push(MissingPrereq {
            name: "ditto",
            purpose: "zip archives with macOS metadata (ipa output)",
            install_hint: "ships with macOS; use --format tar-zst elsewhere",
        });
    }
    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nThe security backend signs with the macOS toolchain; use --backend mock for dry runs.");
    msg
}

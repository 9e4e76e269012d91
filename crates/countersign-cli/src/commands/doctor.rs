use super::{json_pretty, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use chrono::Utc;
use countersign_core::Engine;
use countersign_schema::{load_config, PolicyOverrides};
use serde::Serialize;
use std::path::Path;

pub fn run(engine: &Engine, config: Option<&Path>, json: bool) -> Result<u8, Failure> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    // The mock backend doesn't need the host toolchain.
    if engine.backend().name() == "security" {
        check_prereqs(&mut checks, &mut all_pass);
    }
    check_trust_store(engine, &mut checks, &mut all_pass);
    check_config(config, &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = countersign_toolchain::check_signing_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("signing_tools", "security and codesign found"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "signing_tools",
            countersign_toolchain::format_missing(&missing),
        ));
    }

    if countersign_toolchain::check_archive_prereqs().is_empty() {
        checks.push(Check::pass("archive_tools", "ditto found (ipa output available)"));
    } else {
        checks.push(Check::warn(
            "archive_tools",
            "ditto not found; only tar.zst output is available",
        ));
    }
}

fn check_trust_store(engine: &Engine, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match engine.identities() {
        Ok(ids) if ids.is_empty() => checks.push(Check::warn(
            "trust_store",
            "trust store is readable but holds no signing identities",
        )),
        Ok(ids) => {
            let now = Utc::now();
            let expired = ids.iter().filter(|i| i.is_expired_at(now)).count();
            let message = format!("{} signing identities ({expired} expired)", ids.len());
            if expired > 0 {
                checks.push(Check::warn("trust_store", message));
            } else {
                checks.push(Check::pass("trust_store", message));
            }
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("trust_store", e.to_string()));
        }
    }
}

fn check_config(config: Option<&Path>, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            checks.push(Check::warn("config", format!("cannot determine working directory: {e}")));
            return;
        }
    };
    let resolved = load_config(config, &cwd).and_then(|file| {
        let env = PolicyOverrides::from_env()?;
        file.resolve_policy(&PolicyOverrides::default(), &env)
    });
    match resolved {
        Ok(policy) => checks.push(Check::info(
            "config",
            format!(
                "policy: pattern '{}', tie-break {}",
                policy.name_pattern.as_str(),
                policy.tie_break
            ),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("config", e.to_string()));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json: bool) -> Result<u8, Failure> {
    if json {
        let payload = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("countersign doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: message.into(),
        }
    }

    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: impl Into<String>) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: impl Into<String>) -> Self {
        Self::new(name, "info", message)
    }
}

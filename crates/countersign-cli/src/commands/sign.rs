use super::{json_pretty, spin_fail, spin_ok, spinner, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use countersign_core::{Engine, SignOptions, SigningOptions};
use countersign_schema::{load_config, ArchiveFormat, PolicyOverrides};
use std::path::Path;
use tracing::debug;

pub struct SignArgs<'a> {
    pub bundle: &'a Path,
    pub manifest: &'a Path,
    pub output: &'a Path,
    pub flags: PolicyOverrides,
    pub format: Option<ArchiveFormat>,
    pub no_timestamp: bool,
    pub hardened_runtime: bool,
    pub parallel: bool,
}

pub fn run(
    engine: &Engine,
    args: &SignArgs<'_>,
    config: Option<&Path>,
    json: bool,
) -> Result<u8, Failure> {
    let cwd = std::env::current_dir()
        .map_err(|e| Failure::new(EXIT_FAILURE, format!("cannot determine working directory: {e}")))?;
    let file = load_config(config, &cwd)?;
    let env = PolicyOverrides::from_env()?;
    let policy = file.resolve_policy(&args.flags, &env)?;
    debug!(
        "policy: pattern '{}', team {:?}, tie-break {}",
        policy.name_pattern, policy.team_filter, policy.tie_break
    );

    let options = SignOptions {
        policy,
        signing: SigningOptions {
            timestamp: file.signing.timestamp && !args.no_timestamp,
            hardened_runtime: args.hardened_runtime || file.signing.hardened_runtime,
            parallel_nested: args.parallel || file.signing.parallel_nested,
        },
        format: args
            .format
            .or(file.package.format)
            .unwrap_or_else(|| ArchiveFormat::for_output(args.output)),
    };

    let pb = if json {
        None
    } else {
        Some(spinner("starting..."))
    };
    let outcome = engine.sign_with_progress(
        args.bundle,
        args.manifest,
        args.output,
        &options,
        &mut |stage: &'static str| {
            if let Some(pb) = &pb {
                pb.set_message(format!("{stage}..."));
            }
        },
    );
    let result = match outcome {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "bundle signed and packaged");
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "signing run failed");
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", json_pretty(&result)?);
    } else {
        println!(
            "signed {} as '{}' ({})",
            args.bundle.display(),
            result.identity.name,
            result.identity.fingerprint
        );
        println!(
            "  nested objects: {}, timestamp fallbacks: {}",
            result.nested_signed.len(),
            result.timestamp_fallbacks.len()
        );
        println!(
            "  wrote {} ({}, {} bytes, blake3 {})",
            result.artifact.path.display(),
            result.artifact.format,
            result.artifact.size,
            &result.artifact.blake3[..12]
        );
    }
    Ok(EXIT_SUCCESS)
}

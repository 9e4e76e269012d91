mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Failure, EXIT_CONFIG, EXIT_FAILURE};
use countersign_core::{install_signal_handler, Engine};
use countersign_schema::{ArchiveFormat, PolicyOverrides, SignKind, TieBreak};
use countersign_toolchain::{check_signing_prereqs, format_missing, select_backend};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "countersign",
    version,
    about = "Sign application bundles with a provisioned identity and package them for distribution"
)]
struct Cli {
    /// Signing backend: `security` (macOS keychain + codesign) or `mock`.
    #[arg(long, default_value = "security", global = true)]
    backend: String,

    /// Configuration file (defaults to ./countersign.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sign a bundle against a provisioning manifest and package it.
    Sign {
        /// Application bundle directory (e.g. Demo.app).
        bundle: PathBuf,
        /// Signed provisioning manifest (e.g. embedded.mobileprovision).
        manifest: PathBuf,
        /// Archive to write; replaced if it exists.
        output: PathBuf,
        /// Regex an identity name must match (env: CERT_REGEX).
        #[arg(long)]
        name_pattern: Option<String>,
        /// Literal team token the identity name must contain (env: CERT_TEAM).
        #[arg(long)]
        team: Option<String>,
        /// newest or first (env: CERT_PICK).
        #[arg(long)]
        tie_break: Option<TieBreak>,
        /// Certificate class used for the default name pattern.
        #[arg(long)]
        kind: Option<SignKind>,
        /// ipa or tar-zst; inferred from the output name when omitted.
        #[arg(long)]
        format: Option<ArchiveFormat>,
        /// Never ask the timestamp authority.
        #[arg(long, default_value_t = false)]
        no_timestamp: bool,
        /// Sign with the hardened runtime option.
        #[arg(long, default_value_t = false)]
        hardened_runtime: bool,
        /// Sign nested code objects concurrently.
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
    /// List signing identities in the trust store.
    Identities {
        /// Only show identities whose name matches this regex.
        #[arg(long)]
        name_pattern: Option<String>,
    },
    /// Decode a provisioning manifest and print what it grants.
    Manifest {
        /// Signed provisioning manifest.
        path: PathBuf,
    },
    /// Run diagnostic checks on the signing toolchain and configuration.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn make_engine(backend: &str) -> Result<Engine, Failure> {
    let backend = select_backend(backend).map_err(|e| Failure::new(EXIT_CONFIG, e.to_string()))?;
    Ok(Engine::new(Arc::from(backend)))
}

#[allow(clippy::too_many_lines)]
fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("COUNTERSIGN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let needs_toolchain = matches!(
        cli.command,
        Commands::Sign { .. } | Commands::Identities { .. } | Commands::Manifest { .. }
    );
    if needs_toolchain
        && cli.backend == "security"
        && std::env::var("COUNTERSIGN_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = check_signing_prereqs();
        if !missing.is_empty() {
            eprintln!("error: {}", format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let result = match cli.command {
        Commands::Sign {
            bundle,
            manifest,
            output,
            name_pattern,
            team,
            tie_break,
            kind,
            format,
            no_timestamp,
            hardened_runtime,
            parallel,
        } => make_engine(&cli.backend).and_then(|engine| {
            let args = commands::sign::SignArgs {
                bundle: &bundle,
                manifest: &manifest,
                output: &output,
                flags: PolicyOverrides {
                    name_pattern,
                    team,
                    tie_break,
                    kind,
                },
                format,
                no_timestamp,
                hardened_runtime,
                parallel,
            };
            commands::sign::run(&engine, &args, cli.config.as_deref(), json_output)
        }),
        Commands::Identities { name_pattern } => make_engine(&cli.backend).and_then(|engine| {
            commands::identities::run(&engine, name_pattern.as_deref(), json_output)
        }),
        Commands::Manifest { path } => make_engine(&cli.backend)
            .and_then(|engine| commands::manifest::run(&engine, &path, json_output)),
        Commands::Doctor => make_engine(&cli.backend)
            .and_then(|engine| commands::doctor::run(&engine, cli.config.as_deref(), json_output)),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {failure}");
            ExitCode::from(failure.code)
        }
    }
}

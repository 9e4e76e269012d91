//! `countersign.toml` parsing and layered resolution (flags, environment, file, defaults).

use crate::policy::{SignKind, SigningPolicy, TieBreak};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "countersign.toml";

pub const ENV_NAME_PATTERN: &str = "CERT_REGEX";
pub const ENV_TIE_BREAK: &str = "CERT_PICK";
pub const ENV_TEAM: &str = "CERT_TEAM";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid name pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Distributable container format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    /// Zip container (`.ipa`) written by the platform archiver.
    #[default]
    Ipa,
    /// Deterministic tar compressed with zstd.
    TarZst,
}

impl ArchiveFormat {
    /// Infer the format from the output file name; unknown extensions get the default.
    pub fn for_output(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Self::TarZst
        } else {
            Self::Ipa
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipa" | "zip" => Ok(Self::Ipa),
            "tar-zst" | "tzst" => Ok(Self::TarZst),
            other => Err(format!("unknown archive format '{other}', expected ipa or tar-zst")),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ipa => "ipa",
            Self::TarZst => "tar-zst",
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub signing: SigningSection,
    #[serde(default)]
    pub package: PackageSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    #[serde(default)]
    pub name_pattern: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub tie_break: Option<TieBreak>,
    #[serde(default)]
    pub kind: Option<SignKind>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SigningSection {
    #[serde(default = "default_true")]
    pub timestamp: bool,
    #[serde(default)]
    pub hardened_runtime: bool,
    #[serde(default)]
    pub parallel_nested: bool,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            timestamp: true,
            hardened_runtime: false,
            parallel_nested: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    #[serde(default)]
    pub format: Option<ArchiveFormat>,
}

fn default_true() -> bool {
    true
}

pub fn parse_config_str(input: &str) -> Result<ConfigFile, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<ConfigFile, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Load an explicit config file, or `countersign.toml` in `dir` when it exists.
pub fn load_config(explicit: Option<&Path>, dir: &Path) -> Result<ConfigFile, ConfigError> {
    if let Some(path) = explicit {
        return parse_config_file(path);
    }
    let fallback = dir.join(DEFAULT_CONFIG_FILE);
    if fallback.is_file() {
        parse_config_file(fallback)
    } else {
        Ok(ConfigFile::default())
    }
}

/// One layer of policy settings. Unset fields defer to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    pub name_pattern: Option<String>,
    pub team: Option<String>,
    pub tie_break: Option<TieBreak>,
    pub kind: Option<SignKind>,
}

impl PolicyOverrides {
    /// Read `CERT_REGEX`, `CERT_PICK`, and `CERT_TEAM` through `lookup`.
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let tie_break = get(ENV_TIE_BREAK)
            .map(|v| {
                v.parse::<TieBreak>().map_err(|reason| ConfigError::InvalidValue {
                    field: ENV_TIE_BREAK,
                    reason,
                })
            })
            .transpose()?;
        Ok(Self {
            name_pattern: get(ENV_NAME_PATTERN),
            team: get(ENV_TEAM),
            tie_break,
            kind: None,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl ConfigFile {
    /// Resolve the effective policy. Precedence: `flags`, then `env`, then
    /// this file, then the default pattern for the resolved [`SignKind`].
    pub fn resolve_policy(
        &self,
        flags: &PolicyOverrides,
        env: &PolicyOverrides,
    ) -> Result<SigningPolicy, ConfigError> {
        let kind = flags
            .kind
            .or(env.kind)
            .or(self.policy.kind)
            .unwrap_or_default();
        let pattern = flags
            .name_pattern
            .clone()
            .or_else(|| env.name_pattern.clone())
            .or_else(|| self.policy.name_pattern.clone())
            .unwrap_or_else(|| kind.default_name_pattern().to_owned());
        let tie_break = flags
            .tie_break
            .or(env.tie_break)
            .or(self.policy.tie_break)
            .unwrap_or_default();
        let team = flags
            .team
            .clone()
            .or_else(|| env.team.clone())
            .or_else(|| self.policy.team.clone());

        let mut policy = SigningPolicy::new(&pattern, tie_break)
            .map_err(|source| ConfigError::InvalidPattern { pattern, source })?;
        if let Some(team) = team {
            policy = policy.with_team(team);
        }
        Ok(policy)
    }
}

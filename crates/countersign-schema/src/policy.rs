use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How to choose among several identities that all pass filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Latest expiry wins; equal expiries fall back to enumeration order.
    #[default]
    Newest,
    /// First candidate in enumeration order, expiry ignored.
    First,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "first" => Ok(Self::First),
            other => Err(format!("unknown tie-break '{other}', expected 'newest' or 'first'")),
        }
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Newest => "newest",
            Self::First => "first",
        })
    }
}

/// Certificate class, used only to pick a default name pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignKind {
    Development,
    #[default]
    Distribution,
    DeveloperId,
}

impl SignKind {
    pub fn default_name_pattern(self) -> &'static str {
        match self {
            Self::Development => r"^Apple Development:",
            Self::Distribution => r"^Apple Distribution:",
            Self::DeveloperId => r"^Developer ID Application:",
        }
    }
}

impl FromStr for SignKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "distribution" => Ok(Self::Distribution),
            "developer-id" => Ok(Self::DeveloperId),
            other => Err(format!(
                "unknown signing kind '{other}', expected development, distribution, or developer-id"
            )),
        }
    }
}

/// Caller-supplied identity selection policy.
#[derive(Debug, Clone)]
pub struct SigningPolicy {
    pub name_pattern: Regex,
    pub team_filter: Option<String>,
    pub tie_break: TieBreak,
}

impl SigningPolicy {
    pub fn new(name_pattern: &str, tie_break: TieBreak) -> Result<Self, regex::Error> {
        Ok(Self {
            name_pattern: Regex::new(name_pattern)?,
            team_filter: None,
            tie_break,
        })
    }

    #[must_use]
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team_filter = Some(team.into());
        self
    }

    /// Name-based admission: regex search plus the optional literal team token.
    pub fn admits_name(&self, name: &str) -> bool {
        self.name_pattern.is_match(name)
            && self
                .team_filter
                .as_deref()
                .is_none_or(|team| name.contains(team))
    }
}

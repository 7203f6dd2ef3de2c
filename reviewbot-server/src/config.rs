use anyhow::{bail, Result};
use std::env;
use std::path::PathBuf;

/// File name of the SQLite document database inside the state directory.
pub const STATE_DB_FILE: &str = "reviewbot-state.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Repository path of the CODEOWNERS document.
    pub codeowners_path: String,
    /// Repository path of the high-risk prefix list.
    pub high_risk_path: String,
    /// Prefix that addresses chat commands to the bot.
    pub command_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            codeowners_path: "CODEOWNERS".to_string(),
            high_risk_path: "highrisk.txt".to_string(),
            command_prefix: "/reviewbot".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset and blank
    /// variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| non_blank(lookup(name));
        let defaults = Self::default();

        let command_prefix = var("REVIEWBOT_COMMAND_PREFIX").unwrap_or(defaults.command_prefix);
        if command_prefix.contains(char::is_whitespace) {
            bail!(
                "REVIEWBOT_COMMAND_PREFIX must not contain whitespace, got {:?}",
                command_prefix
            );
        }

        Ok(Config {
            state_dir: var("REVIEWBOT_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            codeowners_path: var("REVIEWBOT_CODEOWNERS_PATH").unwrap_or(defaults.codeowners_path),
            high_risk_path: var("REVIEWBOT_HIGH_RISK_PATH").unwrap_or(defaults.high_risk_path),
            command_prefix,
        })
    }

    /// Location of the SQLite document database.
    pub fn state_db_path(&self) -> PathBuf {
        self.state_dir.join(STATE_DB_FILE)
    }
}

/// Treat missing, empty and whitespace-only values alike.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

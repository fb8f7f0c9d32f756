// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

/// Environment variable holding the path to the ledger database.
pub const DB_ENV_VAR: &str = "BLUECOV_DB";

/// Environment variable that, when `true`, disables memory-mapped I/O on the
/// ledger database so no mapped handles outlive a close.
pub const DB_USE_CLEANER_HACK: &str = "DB_USE_CLEANER_HACK";

pub const DEFAULT_DB_FILE: &str = "blueCov.db";

/// Where and how the ledger database is opened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerConfig {
    pub path: PathBuf,

    /// Disable memory-mapped I/O on the store.
    pub cleaner_hack: bool,
}

impl LedgerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cleaner_hack: false,
        }
    }

    pub fn cleaner_hack(mut self, enabled: bool) -> Self {
        self.cleaner_hack = enabled;
        self
    }

    /// Build a config from `BLUECOV_DB` and `DB_USE_CLEANER_HACK`.
    pub fn from_env() -> Self {
        let path = match std::env::var_os(DB_ENV_VAR) {
            Some(path) => PathBuf::from(path),
            None => {
                warn!("{DB_ENV_VAR} is not set, falling back to {DEFAULT_DB_FILE} as database");
                PathBuf::from(DEFAULT_DB_FILE)
            }
        };

        Self {
            path,
            cleaner_hack: cleaner_hack_from_env(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_FILE)
    }
}

/// True if `DB_USE_CLEANER_HACK` is set to `true`.
pub fn cleaner_hack_from_env() -> bool {
    std::env::var(DB_USE_CLEANER_HACK)
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

/// Only a case-insensitive `true` enables a flag.
pub fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = LedgerConfig::default();
        assert_eq!(config.path, PathBuf::from("blueCov.db"));
        assert!(!config.cleaner_hack);
    }

    #[test]
    fn test_builder() {
        let config = LedgerConfig::new("/tmp/cov.db").cleaner_hack(true);
        assert_eq!(config.path, PathBuf::from("/tmp/cov.db"));
        assert!(config.cleaner_hack);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" True "));
        assert!(!parse_flag("1"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag(""));
    }
}

// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading.
//!
//! The config lives in `wrun.json` (or a path given with `--file`):
//!
//! ```json
//! {
//!   "delayToKill": 1000,
//!   "fatalIfErr": false,
//!   "cmds": [
//!     { "terms": ["cargo", "test"], "fatalIfErr": true }
//!   ],
//!   "ignoreRegExps": ["\\.log$"]
//! }
//! ```
//!
//! Top-level `delayToKill` and `fatalIfErr` are per-command defaults.
//! `ignoreRegExps` extends the built-in ignore set, which covers hidden
//! files and directories plus the config file itself.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file, and the name `init` writes.
pub const DEFAULT_CONFIG_FILE: &str = "wrun.json";

/// Every name the config file has gone by; all of them stay ignored and
/// `init` refuses to shadow any of them.
const CONFIG_FILE_NAMES: [&str; 3] = ["wrun.json", "wrun.yaml", "wrun.yml"];

/// Milliseconds between SIGINT and SIGKILL when unset.
const DEFAULT_DELAY_TO_KILL_MS: u64 = 1000;

/// Patterns every run ignores: the config file itself, and hidden files
/// and directories anywhere in the tree.
const BUILT_IN_IGNORE_PATTERNS: [&str; 2] =
    [r"wrun\.(?:(?:ya?ml)|(?:json))$", r"(?:^\..*)|(?:/\.)"];

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("file doesn't exist")]
    NotFound,
    #[error("reading config file: {0}")]
    Read(std::io::Error),
    #[error("parsing config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing cmds field")]
    MissingCmds,
    #[error("cmds field is empty")]
    EmptyCmds,
    #[error("missing terms field in cmds[{0}]")]
    MissingTerms(usize),
    #[error("terms field in cmds[{0}] is empty")]
    EmptyTerms(usize),
    #[error("{pattern} regexp is invalid: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
    #[error("there's already a config file")]
    AlreadyExists,
    #[error("writing config file: {0}")]
    Write(std::io::Error),
}

// =============================================================================
// File Schema
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileCmd {
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_to_kill: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fatal_if_err: Option<bool>,
    terms: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
struct FileData {
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_to_kill: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fatal_if_err: Option<bool>,
    cmds: Option<Vec<FileCmd>>,
    ignore_reg_exps: Option<Vec<String>>,
}

// =============================================================================
// Resolved Config
// =============================================================================

/// A command from the config file with all defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Argv of the command; never empty.
    pub terms: Vec<String>,
    /// Grace period between SIGINT and SIGKILL under cancellation.
    pub delay_to_kill: Duration,
    /// Whether a failure skips the remaining commands of the generation.
    pub fatal_if_err: bool,
}

/// Fully resolved configuration.
#[derive(Debug)]
pub struct Config {
    pub cmds: Vec<Command>,
    /// Built-in ignores followed by the user's `ignoreRegExps`.
    pub ignore_reg_exps: Vec<Regex>,
}

impl Config {
    /// Loads and resolves the config file. Without an explicit path the
    /// default `wrun.json` in the working directory is used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ConfigError::NotFound),
            Err(e) => return Err(ConfigError::Read(e)),
        };

        let file_data: FileData = serde_json::from_str(&data)?;
        Self::resolve(file_data)
    }

    /// Applies top-level defaults to every command and compiles the ignore
    /// expressions. No other validation happens here.
    fn resolve(file_data: FileData) -> Result<Self, ConfigError> {
        let file_cmds = file_data.cmds.ok_or(ConfigError::MissingCmds)?;
        if file_cmds.is_empty() {
            return Err(ConfigError::EmptyCmds);
        }

        let global_delay_to_kill = file_data.delay_to_kill.unwrap_or(DEFAULT_DELAY_TO_KILL_MS);
        let global_fatal_if_err = file_data.fatal_if_err.unwrap_or(false);

        let mut cmds = Vec::with_capacity(file_cmds.len());
        for (i, file_cmd) in file_cmds.into_iter().enumerate() {
            let terms = file_cmd.terms.ok_or(ConfigError::MissingTerms(i))?;
            if terms.is_empty() {
                return Err(ConfigError::EmptyTerms(i));
            }

            cmds.push(Command {
                terms,
                delay_to_kill: Duration::from_millis(
                    file_cmd.delay_to_kill.unwrap_or(global_delay_to_kill),
                ),
                fatal_if_err: file_cmd.fatal_if_err.unwrap_or(global_fatal_if_err),
            });
        }

        let mut ignore_reg_exps = Vec::new();
        for pattern in BUILT_IN_IGNORE_PATTERNS {
            ignore_reg_exps.push(compile(pattern)?);
        }
        for pattern in file_data.ignore_reg_exps.unwrap_or_default() {
            ignore_reg_exps.push(compile(&pattern)?);
        }

        Ok(Self {
            cmds,
            ignore_reg_exps,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

// =============================================================================
// Init
// =============================================================================

/// Creates `wrun.json` with default contents in the working directory.
pub fn create_config_file() -> Result<(), ConfigError> {
    create_config_file_in(Path::new("."))
}

fn create_config_file_in(dir: &Path) -> Result<(), ConfigError> {
    for name in CONFIG_FILE_NAMES {
        if dir.join(name).exists() {
            return Err(ConfigError::AlreadyExists);
        }
    }

    let data = FileData {
        delay_to_kill: Some(DEFAULT_DELAY_TO_KILL_MS),
        fatal_if_err: Some(false),
        cmds: Some(vec![FileCmd {
            delay_to_kill: Some(DEFAULT_DELAY_TO_KILL_MS),
            fatal_if_err: Some(false),
            terms: Some(vec![
                "echo".to_string(),
                "hello".to_string(),
                "world".to_string(),
            ]),
        }]),
        ignore_reg_exps: Some(Vec::new()),
    };

    let mut contents = serde_json::to_string_pretty(&data)?;
    contents.push('\n');
    fs::write(dir.join(DEFAULT_CONFIG_FILE), contents).map_err(ConfigError::Write)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn resolve(json: &str) -> Result<Config, ConfigError> {
        Config::resolve(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_full_config() {
        let config = resolve(
            r#"{
                "delayToKill": 250,
                "fatalIfErr": true,
                "cmds": [
                    { "terms": ["cargo", "build"] },
                    { "terms": ["cargo", "test"], "delayToKill": 5000, "fatalIfErr": false }
                ],
                "ignoreRegExps": ["\\.log$"]
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.cmds,
            vec![
                Command {
                    terms: vec!["cargo".to_string(), "build".to_string()],
                    delay_to_kill: Duration::from_millis(250),
                    fatal_if_err: true,
                },
                Command {
                    terms: vec!["cargo".to_string(), "test".to_string()],
                    delay_to_kill: Duration::from_millis(5000),
                    fatal_if_err: false,
                },
            ]
        );
        assert_eq!(
            config.ignore_reg_exps.len(),
            BUILT_IN_IGNORE_PATTERNS.len() + 1
        );
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = resolve(r#"{ "cmds": [{ "terms": ["make"] }] }"#).unwrap();

        assert_eq!(
            config.cmds,
            vec![Command {
                terms: vec!["make".to_string()],
                delay_to_kill: Duration::from_millis(1000),
                fatal_if_err: false,
            }]
        );
    }

    #[test]
    fn test_missing_cmds() {
        assert_matches!(resolve("{}"), Err(ConfigError::MissingCmds));
    }

    #[test]
    fn test_empty_cmds() {
        assert_matches!(resolve(r#"{ "cmds": [] }"#), Err(ConfigError::EmptyCmds));
    }

    #[test]
    fn test_missing_terms() {
        assert_matches!(
            resolve(r#"{ "cmds": [{ "terms": ["ok"] }, {}] }"#),
            Err(ConfigError::MissingTerms(1))
        );
    }

    #[test]
    fn test_empty_terms() {
        assert_matches!(
            resolve(r#"{ "cmds": [{ "terms": [] }] }"#),
            Err(ConfigError::EmptyTerms(0))
        );
    }

    #[test]
    fn test_invalid_regex() {
        let err = resolve(r#"{ "cmds": [{ "terms": ["make"] }], "ignoreRegExps": ["("] }"#)
            .unwrap_err();
        assert!(err.to_string().starts_with("( regexp is invalid"));
    }

    #[test]
    fn test_built_in_ignores() {
        let config = resolve(r#"{ "cmds": [{ "terms": ["make"] }] }"#).unwrap();

        let matches = |path: &str| config.ignore_reg_exps.iter().any(|rx| rx.is_match(path));

        assert!(matches("wrun.json"));
        assert!(matches("wrun.yaml"));
        assert!(matches("wrun.yml"));
        assert!(matches(".git/"));
        assert!(matches("a/.hidden"));
        assert!(matches(".env"));
        assert!(!matches("src/main.rs"));
        assert!(!matches("a/b/c"));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("wrun.json");
        assert_matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::NotFound)
        );
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wrun.json");
        fs::write(&path, r#"{ "cmds": [{ "terms": ["make"] }] }"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.cmds.len(), 1);
    }

    #[test]
    fn test_init_writes_loadable_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        create_config_file_in(tmp.path()).unwrap();

        let config = Config::load(Some(&tmp.path().join(DEFAULT_CONFIG_FILE))).unwrap();
        assert_eq!(
            config.cmds,
            vec![Command {
                terms: vec![
                    "echo".to_string(),
                    "hello".to_string(),
                    "world".to_string()
                ],
                delay_to_kill: Duration::from_millis(1000),
                fatal_if_err: false,
            }]
        );
    }

    #[test]
    fn test_init_refuses_existing_config() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("wrun.yml"), "cmds: []").unwrap();

        assert_matches!(
            create_config_file_in(tmp.path()),
            Err(ConfigError::AlreadyExists)
        );
    }
}

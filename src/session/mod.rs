//! Session state owned by one run of the engine: the view cache, the
//! uncommitted-view tracker, the output writer, and environment config
//! loading.

pub mod flags;

use std::io::Write;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::storage::cache::{UncommittedViews, ViewCache};

pub enum Output {
    Stdout,
    Captured(Vec<u8>),
}

pub struct Session {
    pub cache: ViewCache,
    pub uncommitted: UncommittedViews,
    out: Output,
    /// Stdin content when the shell pipes data in (`calc`, STDIN tables).
    pub stdin_text: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            cache: ViewCache::default(),
            uncommitted: UncommittedViews::default(),
            out: Output::Stdout,
            stdin_text: None,
        }
    }

    /// A session whose output is collected in memory, for tests and
    /// subcommands.
    pub fn captured() -> Self {
        let mut session = Self::new();
        session.out = Output::Captured(Vec::new());
        session
    }

    pub fn write(&mut self, text: &str) {
        match &mut self.out {
            Output::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(text.as_bytes());
                let _ = lock.flush();
            }
            Output::Captured(buffer) => buffer.extend_from_slice(text.as_bytes()),
        }
    }

    pub fn write_line(&mut self, text: &str) {
        self.write(text);
        self.write("\n");
    }

    /// Writes a notice unless the quiet flag is set.
    pub fn notice(&mut self, text: &str) {
        if !flags::with_flags_read(|f| f.quiet) {
            self.write_line(text);
        }
    }

    pub fn captured_output(&self) -> Option<String> {
        match &self.out {
            Output::Captured(buffer) => Some(String::from_utf8_lossy(buffer).into_owned()),
            Output::Stdout => None,
        }
    }

    pub fn take_captured_output(&mut self) -> Option<String> {
        match &mut self.out {
            Output::Captured(buffer) => {
                let text = String::from_utf8_lossy(buffer).into_owned();
                buffer.clear();
                Some(text)
            }
            Output::Stdout => None,
        }
    }
}

/// `csvql_env.json` contents. Every field is optional; later files win
/// field by field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvConfig {
    pub repository: Option<String>,
    pub timezone: Option<String>,
    pub datetime_format: Option<Vec<String>>,
    pub wait_timeout: Option<f64>,
    #[serde(default)]
    pub environment_variables: std::collections::HashMap<String, String>,
}

impl EnvConfig {
    fn merge(&mut self, other: EnvConfig) {
        if other.repository.is_some() {
            self.repository = other.repository;
        }
        if other.timezone.is_some() {
            self.timezone = other.timezone;
        }
        if other.datetime_format.is_some() {
            self.datetime_format = other.datetime_format;
        }
        if other.wait_timeout.is_some() {
            self.wait_timeout = other.wait_timeout;
        }
        self.environment_variables.extend(other.environment_variables);
    }
}

pub const ENV_FILE_NAME: &str = "csvql_env.json";
pub const PRELOAD_FILE_NAME: &str = "csvqlrc";

/// Candidate config directories in merge order: home, home/.csvql,
/// home/.config/csvql, cwd. Later locations override earlier ones.
pub fn config_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.clone());
        dirs.push(home.join(".csvql"));
        dirs.push(home.join(".config").join("csvql"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    dirs
}

/// Loads and merges every `csvql_env.json` found in the canonical
/// locations. A malformed file is an error; a missing one is skipped.
pub fn load_env_config() -> EngineResult<EnvConfig> {
    let mut merged = EnvConfig::default();
    for dir in config_dirs() {
        let path = dir.join(ENV_FILE_NAME);
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::new(
                ErrorKind::ReadFile,
                format!("file {}: {e}", path.display()),
            )
        })?;
        let config: EnvConfig = serde_json::from_str(&text).map_err(|e| {
            EngineError::new(
                ErrorKind::ReadFile,
                format!("file {}: {e}", path.display()),
            )
        })?;
        merged.merge(config);
    }
    Ok(merged)
}

/// Applies a merged config: flags first, then exported variables.
pub fn apply_env_config(config: &EnvConfig) {
    flags::with_flags_write(|flags| {
        if let Some(repository) = &config.repository {
            flags.repository = repository.clone();
        }
        if let Some(timezone) = &config.timezone {
            flags.timezone = timezone.clone();
        }
        if let Some(formats) = &config.datetime_format {
            flags.datetime_format = formats.clone();
        }
        if let Some(timeout) = config.wait_timeout {
            flags.wait_timeout = timeout;
        }
    });
    for (name, value) in &config.environment_variables {
        std::env::set_var(name, value);
    }
}

/// Paths of `csvqlrc` pre-load statement files, in execution order.
pub fn preload_files() -> Vec<PathBuf> {
    config_dirs()
        .into_iter()
        .map(|dir| dir.join(PRELOAD_FILE_NAME))
        .filter(|path| path.is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_session_collects_output() {
        let mut session = Session::captured();
        session.write_line("hello");
        session.write("world");
        assert_eq!(session.captured_output().unwrap(), "hello\nworld");
    }

    #[test]
    fn env_config_merge_is_last_wins() {
        let mut base = EnvConfig {
            repository: Some("/data".into()),
            timezone: Some("UTC".into()),
            ..EnvConfig::default()
        };
        base.merge(EnvConfig {
            timezone: Some("+09:00".into()),
            wait_timeout: Some(5.0),
            ..EnvConfig::default()
        });
        assert_eq!(base.repository.as_deref(), Some("/data"));
        assert_eq!(base.timezone.as_deref(), Some("+09:00"));
        assert_eq!(base.wait_timeout, Some(5.0));
    }

    #[test]
    fn env_config_parses_json() {
        let config: EnvConfig = serde_json::from_str(
            r#"{"timezone": "UTC", "datetime_format": ["%Y%m%d"],
                "environment_variables": {"APP_STAGE": "test"}}"#,
        )
        .unwrap();
        assert_eq!(config.timezone.as_deref(), Some("UTC"));
        assert_eq!(config.datetime_format.as_ref().unwrap().len(), 1);
        assert_eq!(
            config.environment_variables.get("APP_STAGE").map(String::as_str),
            Some("test")
        );
    }
}

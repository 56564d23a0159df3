//! Settings resolution: flags, then environment, then the optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use kitlock_installer::LogLevel;
use serde::Deserialize;

pub const LOG_ENV: &str = "SPEC_KIT_AGENTS_LOG";
pub const CONFIG_ENV: &str = "SPEC_KIT_AGENTS_CONFIG";
pub const NO_COLOR_ENV: &str = "NO_COLOR";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub color: Option<ColorChoice>,
    pub backup_retention_days: Option<u32>,
}

/// Values taken from flags and the environment before the file is consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub verbose: bool,
    pub quiet: bool,
    pub log_file: Option<PathBuf>,
    pub env_log_level: Option<String>,
    pub no_color: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub color: ColorChoice,
    pub backup_retention_days: Option<u32>,
}

pub fn default_config_path(home: &Path) -> PathBuf {
    home.join(".config")
        .join("spec-kit-agents")
        .join("config.toml")
}

/// A missing file yields defaults; a file that exists must parse.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    if !path.is_file() {
        return Ok(FileConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_file_config(&raw).with_context(|| format!("invalid config file: {}", path.display()))
}

pub fn parse_file_config(raw: &str) -> Result<FileConfig> {
    toml::from_str(raw).context("failed to parse config TOML")
}

pub fn resolve_settings(overrides: &Overrides, file: &FileConfig) -> Result<Settings> {
    let log_level = if overrides.verbose {
        LogLevel::Debug
    } else if overrides.quiet {
        LogLevel::Error
    } else if let Some(value) = overrides.env_log_level.as_deref() {
        parse_level(value).with_context(|| format!("invalid {LOG_ENV} value"))?
    } else if let Some(value) = file.log_level.as_deref() {
        parse_level(value).context("invalid log_level in config file")?
    } else {
        LogLevel::Info
    };

    let color = if overrides.no_color {
        ColorChoice::Never
    } else {
        file.color.unwrap_or_default()
    };

    Ok(Settings {
        log_level,
        log_file: overrides.log_file.clone().or_else(|| file.log_file.clone()),
        color,
        backup_retention_days: file.backup_retention_days,
    })
}

fn parse_level(value: &str) -> Result<LogLevel> {
    LogLevel::parse(value).ok_or_else(|| {
        anyhow!("unknown log level '{value}' (expected debug, info, warn, error or fatal)")
    })
}

//! Configuration resolution for Crumb.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/crumb/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete Crumb configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Token issuance and verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// Base64 cookie key (16, 24 or 32 bytes once decoded).
    pub cookie_key: Option<String>,
    pub nonce_max_age_secs: u64,
    /// Zero disables the login token age check.
    pub login_max_age_secs: u64,
    /// Refuse to run without a configured key instead of generating one.
    pub fail_closed: bool,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            cookie_key: None,
            nonce_max_age_secs: 300,
            login_max_age_secs: 14 * 24 * 60 * 60, // matches the login cookie Max-Age
            fail_closed: false,
        }
    }
}

impl TokensConfig {
    pub const fn nonce_max_age(&self) -> Duration {
        Duration::from_secs(self.nonce_max_age_secs)
    }

    pub const fn login_max_age(&self) -> Option<Duration> {
        if self.login_max_age_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.login_max_age_secs))
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One config file layer. Only the fields present in the file are set, so a
/// later layer never resets what an earlier one configured.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    tokens: TokensFile,
    log: LogFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokensFile {
    cookie_key: Option<String>,
    nonce_max_age_secs: Option<u64>,
    login_max_age_secs: Option<u64>,
    fail_closed: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogFile {
    level: Option<String>,
    json: Option<bool>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    resolve_config(
        global_config_path().as_deref(),
        explicit,
        |name| std::env::var(name).ok(),
    )
}

fn resolve_config<F>(global: Option<&Path>, explicit: Option<&Path>, var: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::default();

    if let Some(global_path) = global {
        if global_path.exists() {
            let layer = load_config_file(global_path)?;
            merge_config(&mut config, layer);
        }
    }

    if let Some(path) = explicit {
        let layer = load_config_file(path)?;
        merge_config(&mut config, layer);
    }

    apply_env_overrides(&mut config, var)?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".crumb").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/crumb/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("crumb").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: ConfigFile) {
    let tokens = overlay.tokens;
    if tokens.cookie_key.is_some() {
        base.tokens.cookie_key = tokens.cookie_key;
    }
    if let Some(secs) = tokens.nonce_max_age_secs {
        base.tokens.nonce_max_age_secs = secs;
    }
    if let Some(secs) = tokens.login_max_age_secs {
        base.tokens.login_max_age_secs = secs;
    }
    if let Some(fail_closed) = tokens.fail_closed {
        base.tokens.fail_closed = fail_closed;
    }

    if let Some(level) = overlay.log.level {
        base.log.level = level;
    }
    if let Some(json) = overlay.log.json {
        base.log.json = json;
    }
}

fn apply_env_overrides<F>(config: &mut Config, var: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = var("CRUMB_COOKIE_KEY") {
        config.tokens.cookie_key = Some(val);
    }
    if let Some(val) = var("CRUMB_NONCE_MAX_AGE") {
        config.tokens.nonce_max_age_secs = parse_env("CRUMB_NONCE_MAX_AGE", &val)?;
    }
    if let Some(val) = var("CRUMB_LOGIN_MAX_AGE") {
        config.tokens.login_max_age_secs = parse_env("CRUMB_LOGIN_MAX_AGE", &val)?;
    }
    if let Some(val) = var("CRUMB_FAIL_CLOSED") {
        config.tokens.fail_closed = matches!(val.as_str(), "1" | "true" | "yes");
    }
    if let Some(val) = var("CRUMB_LOG_LEVEL") {
        config.log.level = val;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T> {
    val.parse()
        .map_err(|_| Error::Config(format!("{name} must be a number of seconds, got {val:?}")))
}

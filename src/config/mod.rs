//! Configuration management

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the remote player API (without the `/me/player` suffix)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Name the playback client registers under
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Context (playlist/album) the jukebox plays when nothing better is known
    #[serde(default)]
    pub context_uri: Option<String>,

    /// Static bearer credential
    #[serde(default)]
    pub access_token: Option<String>,

    /// File holding a bearer credential, re-read on every request
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    #[serde(default)]
    pub player: PlayerConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

fn default_port() -> u16 {
    8099
}

fn default_api_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_device_name() -> String {
    "Jukebox".to_string()
}

/// Child process acting as the playback client
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag used to hand the bearer credential to the child (omitted when empty)
    #[serde(default = "default_token_flag")]
    pub token_flag: String,
    /// Flag used to pass the device name to the child
    #[serde(default = "default_name_flag")]
    pub name_flag: String,
}

fn default_player_command() -> String {
    "librespot".to_string()
}

fn default_token_flag() -> String {
    "--access-token".to_string()
}

fn default_name_flag() -> String {
    "--name".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: Vec::new(),
            token_flag: default_token_flag(),
            name_flag: default_name_flag(),
        }
    }
}

/// Recovery orchestrator tuning. All durations in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_success_clear_ms")]
    pub success_clear_ms: u64,
    #[serde(default = "default_error_clear_ms")]
    pub error_clear_ms: u64,
    #[serde(default = "default_create_grace_ms")]
    pub create_grace_ms: u64,
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
    #[serde(default = "default_activation_timeout_ms")]
    pub activation_timeout_ms: u64,
    #[serde(default = "default_device_poll_ms")]
    pub device_poll_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_success_clear_ms() -> u64 {
    3_000
}
fn default_error_clear_ms() -> u64 {
    5_000
}
fn default_create_grace_ms() -> u64 {
    2_000
}
fn default_init_timeout_ms() -> u64 {
    30_000
}
fn default_verify_timeout_ms() -> u64 {
    10_000
}
fn default_registration_timeout_ms() -> u64 {
    15_000
}
fn default_activation_timeout_ms() -> u64 {
    15_000
}
fn default_device_poll_ms() -> u64 {
    500
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            success_clear_ms: default_success_clear_ms(),
            error_clear_ms: default_error_clear_ms(),
            create_grace_ms: default_create_grace_ms(),
            init_timeout_ms: default_init_timeout_ms(),
            verify_timeout_ms: default_verify_timeout_ms(),
            registration_timeout_ms: default_registration_timeout_ms(),
            activation_timeout_ms: default_activation_timeout_ms(),
            device_poll_ms: default_device_poll_ms(),
        }
    }
}

impl RecoveryConfig {
    pub fn success_clear(&self) -> Duration {
        Duration::from_millis(self.success_clear_ms)
    }
    pub fn error_clear(&self) -> Duration {
        Duration::from_millis(self.error_clear_ms)
    }
    pub fn create_grace(&self) -> Duration {
        Duration::from_millis(self.create_grace_ms)
    }
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }
    pub fn device_poll(&self) -> Duration {
        Duration::from_millis(self.device_poll_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Health sampling thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_stall_tolerance_ms")]
    pub stall_tolerance_ms: u64,
    #[serde(default = "default_near_end_window_ms")]
    pub near_end_window_ms: u64,
    #[serde(default = "default_mismatch_threshold")]
    pub mismatch_threshold: u32,
    #[serde(default = "default_resume_staleness_ms")]
    pub resume_staleness_ms: u64,
}

fn default_stall_tolerance_ms() -> u64 {
    100
}
fn default_near_end_window_ms() -> u64 {
    5_000
}
fn default_mismatch_threshold() -> u32 {
    2
}
fn default_resume_staleness_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stall_tolerance_ms: default_stall_tolerance_ms(),
            near_end_window_ms: default_near_end_window_ms(),
            mismatch_threshold: default_mismatch_threshold(),
            resume_staleness_ms: default_resume_staleness_ms(),
        }
    }
}

impl HealthConfig {
    pub fn resume_staleness(&self) -> Duration {
        Duration::from_millis(self.resume_staleness_ms)
    }
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("JUKEBOX_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/jukebox-recovery");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("jukebox-recovery");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config/jukebox-recovery");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("jukebox-recovery");
        }
    }

    PathBuf::from(".")
}

/// Get data directory (XDG_DATA_HOME or platform default)
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("JUKEBOX_DATA_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/jukebox-recovery");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("jukebox-recovery");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/share/jukebox-recovery");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join("jukebox-recovery");
        }
    }

    PathBuf::from("./data")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (JUKEBOX_PORT, JUKEBOX_RECOVERY__MAX_ATTEMPTS, etc.)
        .add_source(
            ::config::Environment::with_prefix("JUKEBOX")
                .separator("__")
                .try_parsing(true),
        );

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_base_url)
            .map_err(|e| anyhow!("invalid api_base_url {}: {}", self.api_base_url, e))?;
        if self.recovery.max_attempts == 0 {
            return Err(anyhow!("recovery.max_attempts must be at least 1"));
        }
        if self.health.mismatch_threshold == 0 {
            return Err(anyhow!("health.mismatch_threshold must be at least 1"));
        }
        Ok(())
    }
}

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const MIN_SECRET_LEN: usize = 32;

/// Top-level config (buhbot.toml + BUHBOT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub platform: PlatformConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub sla: SlaDefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_db_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            timeout_secs: default_db_timeout_secs(),
        }
    }
}

/// Per-queue worker concurrency overrides for the delayed-job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_sla_concurrency")]
    pub sla_timer_concurrency: usize,
    #[serde(default = "default_alert_concurrency")]
    pub alert_dispatch_concurrency: usize,
    #[serde(default = "default_survey_concurrency")]
    pub survey_concurrency: usize,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sla_timer_concurrency: default_sla_concurrency(),
            alert_dispatch_concurrency: default_alert_concurrency(),
            survey_concurrency: default_survey_concurrency(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub bot_token: String,
    #[serde(default = "default_long_poll_timeout_secs")]
    pub long_poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub api_key: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub prometheus_port: Option<u16>,
    #[serde(default)]
    pub prometheus_enabled: bool,
    pub error_tracking_dsn: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            prometheus_port: None,
            prometheus_enabled: false,
            error_tracking_dsn: None,
        }
    }
}

/// Fallback SLA defaults consulted before the first admin-configured
/// `GlobalSettings` row exists — mirrors [`crate::types::GlobalSettings::default`]
/// but kept distinct since one is a boot-time config value and the other a
/// persisted, admin-editable row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaDefaultsConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_threshold_minutes")]
    pub default_threshold_minutes: u32,
    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,
}

impl Default for SlaDefaultsConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            default_threshold_minutes: default_threshold_minutes(),
            max_escalations: default_max_escalations(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.buhbot/buhbot.db", home)
}
fn default_max_connections() -> u32 {
    10
}
fn default_db_timeout_secs() -> u64 {
    if cfg!(debug_assertions) {
        5
    } else {
        15
    }
}
fn default_sla_concurrency() -> usize {
    5
}
fn default_alert_concurrency() -> usize {
    3
}
fn default_survey_concurrency() -> usize {
    5
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_long_poll_timeout_secs() -> u64 {
    30
}
fn default_classifier_model() -> String {
    "default".to_string()
}
fn default_classifier_base_url() -> String {
    "https://classifier.internal".to_string()
}
fn default_classifier_timeout_secs() -> u64 {
    10
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_threshold_minutes() -> u32 {
    60
}
fn default_max_escalations() -> u32 {
    3
}

impl BotConfig {
    /// Load config from a TOML file with `BUHBOT_*` env var overrides, then
    /// validate it. Checks in order:
    ///   1. Explicit path argument
    ///   2. `BUHBOT_CONFIG` env var
    ///   3. `~/.buhbot/buhbot.toml`
    ///
    /// Unlike a dev-local agent runtime, this engine must not silently fall
    /// back to defaults on a load or validation failure — the caller is
    /// expected to exit the process non-zero.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("BUHBOT_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: BotConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BUHBOT_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Boot-time validation: required secrets must be present and at least
    /// [`MIN_SECRET_LEN`] characters, per the external-interfaces contract.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.platform.bot_token.len() < MIN_SECRET_LEN {
            return Err(crate::error::CoreError::Config(format!(
                "platform.bot_token must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if self.classifier.api_key.len() < MIN_SECRET_LEN {
            return Err(crate::error::CoreError::Config(format!(
                "classifier.api_key must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if self.sla.max_escalations == 0 {
            return Err(crate::error::CoreError::Config(
                "sla.max_escalations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.buhbot/buhbot.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BotConfig {
        BotConfig {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            platform: PlatformConfig {
                bot_token: "a".repeat(MIN_SECRET_LEN),
                long_poll_timeout_secs: 30,
            },
            classifier: ClassifierConfig {
                api_key: "b".repeat(MIN_SECRET_LEN),
                model: "default".to_string(),
                base_url: "https://classifier.internal".to_string(),
                timeout_secs: 10,
            },
            observability: ObservabilityConfig::default(),
            sla: SlaDefaultsConfig::default(),
        }
    }

    #[test]
    fn rejects_short_bot_token() {
        let mut cfg = valid_config();
        cfg.platform.bot_token = "short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_short_classifier_key() {
        let mut cfg = valid_config();
        cfg.classifier.api_key = "short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_escalations() {
        let mut cfg = valid_config();
        cfg.sla.max_escalations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }
}

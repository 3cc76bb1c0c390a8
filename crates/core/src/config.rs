use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "bitquote.toml";
const CONFIG_PATH_ENV: &str = "BITQUOTE_CONFIG";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub pricing: PricingConfig,
    pub approval: ApprovalConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingConfig {
    /// Tax charged on (sub_total - discount_total), as a fraction.
    pub tax_rate: Decimal,
}

/// Ceilings for the auto-approval decision on `close_internal`. A quote at
/// or under both goes straight to APPROVED; anything above routes through
/// PENDING_APPROVAL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalConfig {
    pub max_auto_discount_pct: u32,
    pub max_auto_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub tax_rate: Option<Decimal>,
    pub max_auto_discount_pct: Option<u32>,
    pub max_auto_total: Option<Decimal>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://bitquote.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            pricing: PricingConfig { tax_rate: Decimal::new(16, 2) },
            approval: ApprovalConfig {
                max_auto_discount_pct: 10,
                max_auto_total: Decimal::new(250_000_00, 2),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl AppConfig {
    /// Resolution order: built-in defaults, then the TOML file (with
    /// `${VAR}` interpolation), then `BITQUOTE_*` environment variables,
    /// then programmatic overrides. The merged result is validated before
    /// it is handed out.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();

        let path = options
            .config_path
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if path.exists() {
            let raw = read_config_file(&path)?;
            apply_file(&mut config, raw);
        } else if options.require_file {
            return Err(ConfigError::MissingConfigFile(path));
        }

        apply_env(&mut config)?;
        apply_overrides(&mut config, options.overrides);
        validate(&config)?;
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    database: Option<RawDatabase>,
    server: Option<RawServer>,
    pricing: Option<RawPricing>,
    approval: Option<RawApproval>,
    logging: Option<RawLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServer {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPricing {
    tax_rate: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct RawApproval {
    max_auto_discount_pct: Option<u32>,
    max_auto_total: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn read_config_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let text = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let interpolated = interpolate_env(&text)?;
    toml::from_str(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces `${VAR}` occurrences with the value of the named environment
/// variable. An unset variable is an error rather than an empty string.
fn interpolate_env(text: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn apply_file(config: &mut AppConfig, raw: RawConfig) {
    if let Some(database) = raw.database {
        if let Some(url) = database.url {
            config.database.url = url;
        }
        if let Some(max_connections) = database.max_connections {
            config.database.max_connections = max_connections;
        }
        if let Some(timeout_secs) = database.timeout_secs {
            config.database.timeout_secs = timeout_secs;
        }
    }
    if let Some(server) = raw.server {
        if let Some(bind_address) = server.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(port) = server.port {
            config.server.port = port;
        }
        if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
            config.server.graceful_shutdown_secs = graceful_shutdown_secs;
        }
    }
    if let Some(pricing) = raw.pricing {
        if let Some(tax_rate) = pricing.tax_rate {
            config.pricing.tax_rate = tax_rate;
        }
    }
    if let Some(approval) = raw.approval {
        if let Some(max_auto_discount_pct) = approval.max_auto_discount_pct {
            config.approval.max_auto_discount_pct = max_auto_discount_pct;
        }
        if let Some(max_auto_total) = approval.max_auto_total {
            config.approval.max_auto_total = max_auto_total;
        }
    }
    if let Some(logging) = raw.logging {
        if let Some(level) = logging.level {
            config.logging.level = level;
        }
        if let Some(format) = logging.format {
            config.logging.format = format;
        }
    }
}

fn apply_env(config: &mut AppConfig) -> Result<(), ConfigError> {
    if let Ok(url) = env::var("BITQUOTE_DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(level) = env::var("BITQUOTE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(port) = env::var("BITQUOTE_SERVER_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::InvalidEnvOverride {
            key: "BITQUOTE_SERVER_PORT".to_string(),
            value: port.clone(),
        })?;
    }
    if let Ok(rate) = env::var("BITQUOTE_TAX_RATE") {
        config.pricing.tax_rate =
            rate.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "BITQUOTE_TAX_RATE".to_string(),
                value: rate.clone(),
            })?;
    }
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, overrides: ConfigOverrides) {
    if let Some(url) = overrides.database_url {
        config.database.url = url;
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
    if let Some(port) = overrides.server_port {
        config.server.port = port;
    }
    if let Some(tax_rate) = overrides.tax_rate {
        config.pricing.tax_rate = tax_rate;
    }
    if let Some(max_auto_discount_pct) = overrides.max_auto_discount_pct {
        config.approval.max_auto_discount_pct = max_auto_discount_pct;
    }
    if let Some(max_auto_total) = overrides.max_auto_total {
        config.approval.max_auto_total = max_auto_total;
    }
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.database.url.trim().is_empty() {
        return Err(ConfigError::Validation("database.url must not be empty".to_string()));
    }
    if config.database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be at least 1".to_string(),
        ));
    }
    if config.pricing.tax_rate < Decimal::ZERO || config.pricing.tax_rate > Decimal::ONE {
        return Err(ConfigError::Validation(
            "pricing.tax_rate must be a fraction between 0 and 1".to_string(),
        ));
    }
    if config.approval.max_auto_discount_pct > 100 {
        return Err(ConfigError::Validation(
            "approval.max_auto_discount_pct must not exceed 100".to_string(),
        ));
    }
    if config.approval.max_auto_total < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "approval.max_auto_total must not be negative".to_string(),
        ));
    }
    let level = config.logging.level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        return Err(ConfigError::Validation(format!(
            "logging.level `{}` is not a known level",
            config.logging.level
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        interpolate_env, validate, AppConfig, ConfigError, ConfigOverrides, LoadOptions,
    };

    #[test]
    fn defaults_pass_validation() {
        validate(&AppConfig::default()).expect("defaults must be valid");
    }

    #[test]
    fn overrides_take_precedence() {
        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                log_level: Some("debug".to_string()),
                server_port: Some(9000),
                tax_rate: Some(Decimal::ZERO),
                max_auto_discount_pct: Some(5),
                max_auto_total: Some(Decimal::new(1_000_00, 2)),
            },
            ..LoadOptions::default()
        })
        .expect("load with overrides");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.pricing.tax_rate, Decimal::ZERO);
        assert_eq!(config.approval.max_auto_discount_pct, 5);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does/not/exist.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });

        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn interpolation_requires_set_variables() {
        let error =
            interpolate_env("url = \"${BITQUOTE_TEST_UNSET_VAR}\"").expect_err("unset var");
        assert!(matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "BITQUOTE_TEST_UNSET_VAR"));

        let error = interpolate_env("url = \"${BROKEN").expect_err("unterminated expression");
        assert!(matches!(error, ConfigError::UnterminatedInterpolation));
    }

    #[test]
    fn interpolation_replaces_known_variables() {
        std::env::set_var("BITQUOTE_TEST_SET_VAR", "sqlite://interp.db");
        let text = interpolate_env("url = \"${BITQUOTE_TEST_SET_VAR}\"").expect("interpolate");
        assert_eq!(text, "url = \"sqlite://interp.db\"");
        std::env::remove_var("BITQUOTE_TEST_SET_VAR");
    }

    #[test]
    fn out_of_range_tax_rate_fails_validation() {
        let mut config = AppConfig::default();
        config.pricing.tax_rate = Decimal::new(150, 2);
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn unknown_log_level_fails_validation() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }
}

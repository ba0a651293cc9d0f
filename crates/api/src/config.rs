//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use pipeline::PipelineConfig;

const DEV_APPROVAL_SECRET: &str = "dev-approval-secret";
const DEV_WEBHOOK_SECRET: &str = "dev-webhook-secret";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" | "" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
/// - `DATABASE_URL`: Postgres store when set, in-memory otherwise
/// - `APPROVAL_SECRET`, `PAYMENT_WEBHOOK_SECRET`: signing keys
/// - `GENERATION_MAX_STAGE_ATTEMPTS`, `SESSION_MAX_RETRIES`,
///   `PROVIDER_TIMEOUT_MS`, `RECONCILE_INTERVAL_SECS`,
///   `RECONCILE_GRACE_SECS`, `TRACKING_SLA_SECS`,
///   `ORDER_MAX_SUBMISSION_ATTEMPTS`: pipeline tuning
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub approval_secret: String,
    pub payment_webhook_secret: String,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        let defaults = PipelineConfig::default();

        let pipeline = PipelineConfig {
            max_stage_attempts: parsed("GENERATION_MAX_STAGE_ATTEMPTS")
                .map_or(defaults.max_stage_attempts, |v| v as u32),
            max_session_retries: parsed("SESSION_MAX_RETRIES")
                .map_or(defaults.max_session_retries, |v| v as u32),
            provider_timeout: parsed("PROVIDER_TIMEOUT_MS")
                .map_or(defaults.provider_timeout, Duration::from_millis),
            scan_interval: parsed("RECONCILE_INTERVAL_SECS")
                .map_or(defaults.scan_interval, Duration::from_secs),
            grace_period: parsed("RECONCILE_GRACE_SECS")
                .map_or(defaults.grace_period, Duration::from_secs),
            tracking_sla: parsed("TRACKING_SLA_SECS")
                .map_or(defaults.tracking_sla, Duration::from_secs),
            max_submission_attempts: parsed("ORDER_MAX_SUBMISSION_ATTEMPTS")
                .map_or(defaults.max_submission_attempts, |v| v as u32),
            ..defaults
        };

        Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            approval_secret: lookup("APPROVAL_SECRET")
                .unwrap_or_else(|| DEV_APPROVAL_SECRET.to_string()),
            payment_webhook_secret: lookup("PAYMENT_WEBHOOK_SECRET")
                .unwrap_or_else(|| DEV_WEBHOOK_SECRET.to_string()),
            pipeline,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when either signing key is still the built-in development value.
    pub fn uses_dev_secrets(&self) -> bool {
        self.approval_secret == DEV_APPROVAL_SECRET
            || self.payment_webhook_secret == DEV_WEBHOOK_SECRET
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert!(config.uses_dev_secrets());
        assert_eq!(config.pipeline.max_submission_attempts, 5);
    }

    #[test]
    fn test_addr_formatting() {
        let config = from_map(&[("HOST", "127.0.0.1"), ("PORT", "8080")]);
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_pipeline_tuning_from_env() {
        let config = from_map(&[
            ("GENERATION_MAX_STAGE_ATTEMPTS", "7"),
            ("PROVIDER_TIMEOUT_MS", "250"),
            ("RECONCILE_GRACE_SECS", "90"),
            ("TRACKING_SLA_SECS", "3600"),
            ("ORDER_MAX_SUBMISSION_ATTEMPTS", "2"),
        ]);
        assert_eq!(config.pipeline.max_stage_attempts, 7);
        assert_eq!(config.pipeline.provider_timeout, Duration::from_millis(250));
        assert_eq!(config.pipeline.grace_period, Duration::from_secs(90));
        assert_eq!(config.pipeline.tracking_sla, Duration::from_secs(3600));
        assert_eq!(config.pipeline.max_submission_attempts, 2);
        assert_eq!(config.pipeline.max_session_retries, 3);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = from_map(&[("PORT", "not-a-port"), ("SESSION_MAX_RETRIES", "-1")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.pipeline.max_session_retries, 3);
    }

    #[test]
    fn test_json_logging_and_database() {
        let config = from_map(&[
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/pipeline"),
            ("APPROVAL_SECRET", "a"),
            ("PAYMENT_WEBHOOK_SECRET", "b"),
        ]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/pipeline")
        );
        assert!(!config.uses_dev_secrets());
    }
}

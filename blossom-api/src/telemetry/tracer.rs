//! Tracing Subscriber Initialization
//!
//! Structured logs go to stdout, as JSON lines in production or as
//! human-readable text during development. Filtering follows `RUST_LOG`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Log output and metrics switches.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log line format
    pub log_format: LogFormat,
    /// Service name attached to the startup log
    pub service_name: String,
    /// Default filter directive when `RUST_LOG` is unset
    pub default_filter: String,
    /// Register the prometheus counters at startup.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            service_name: "blossom-api".to_string(),
            default_filter: "blossom_api=debug,blossom_storage=debug,info".to_string(),
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// # Environment Variables
    /// - `BLOSSOM_LOG_FORMAT`: `json` or `pretty` (default: pretty)
    /// - `BLOSSOM_SERVICE_NAME` (default: blossom-api)
    /// - `BLOSSOM_METRICS_ENABLED`: `true`/`1` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_format: std::env::var("BLOSSOM_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.log_format),
            service_name: std::env::var("BLOSSOM_SERVICE_NAME").unwrap_or(defaults.service_name),
            default_filter: defaults.default_filter,
            metrics_enabled: std::env::var("BLOSSOM_METRICS_ENABLED")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }
}

/// Install the global subscriber.
///
/// Call once at startup, before anything logs. A second call fails.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        log_format = ?config.log_format,
        metrics_enabled = config.metrics_enabled,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "blossom-api");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_telemetry_config_from_env() {
        let _format = EnvVarGuard::set("BLOSSOM_LOG_FORMAT", Some("JSON"));
        let _metrics = EnvVarGuard::set("BLOSSOM_METRICS_ENABLED", Some("0"));
        let config = TelemetryConfig::from_env();
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_unknown_format_is_pretty() {
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    }
}

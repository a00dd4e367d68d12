use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::analysis::AnalysisConfig;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Langbase API credentials and endpoint.
    pub langbase: LangbaseConfig,
    /// SQLite storage settings.
    pub database: DatabaseConfig,
    /// Log level and format.
    pub logging: LoggingConfig,
    /// HTTP timeout and retry settings.
    pub request: RequestConfig,
    /// Pipe names.
    pub pipes: PipeConfig,
    /// Session defaults for the driver.
    pub analysis: AnalysisDefaults,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// API base URL.
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Connection pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Timeout for a single HTTP request.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff, doubled per retry.
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe every analysis stage is routed through.
    pub analysis: String,
}

/// Defaults applied to analysis sessions started by the driver.
#[derive(Debug, Clone)]
pub struct AnalysisDefaults {
    /// Config applied to each new session.
    pub session: AnalysisConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/analysis.db".to_string()),
            ),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS").unwrap_or(30000),
            max_retries: env_parse("MAX_RETRIES").unwrap_or(3),
            retry_delay_ms: env_parse("RETRY_DELAY_MS").unwrap_or(1000),
        };

        let pipes = PipeConfig {
            analysis: env::var("PIPE_ANALYSIS")
                .unwrap_or_else(|_| "investigative-analysis-v1".to_string()),
        };

        let analysis = AnalysisDefaults::from_env()?;

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            analysis,
        })
    }
}

impl AnalysisDefaults {
    fn from_env() -> Result<Self, AppError> {
        let base = AnalysisConfig::default();

        let confidence_threshold: f64 =
            env_parse("ANALYSIS_CONFIDENCE_THRESHOLD").unwrap_or(base.confidence_threshold);
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(AppError::Config {
                message: format!(
                    "ANALYSIS_CONFIDENCE_THRESHOLD must be within 0.0-1.0, got {}",
                    confidence_threshold
                ),
            });
        }

        let session = AnalysisConfig {
            depth: env_parse("ANALYSIS_DEPTH").unwrap_or(base.depth),
            max_stages: env_parse("ANALYSIS_MAX_STAGES").unwrap_or(base.max_stages),
            confidence_threshold,
            timeout_per_stage: env_parse("ANALYSIS_STAGE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.timeout_per_stage),
            enable_cross_reference: env_flag(
                "ANALYSIS_ENABLE_CROSS_REFERENCE",
                base.enable_cross_reference,
            ),
            enable_hypotheses: env_flag("ANALYSIS_ENABLE_HYPOTHESES", base.enable_hypotheses),
        };

        Ok(Self { session })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for AnalysisDefaults {
    fn default() -> Self {
        Self {
            session: AnalysisConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_default() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout_ms, 30000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_analysis_defaults_mirror_session_defaults() {
        let defaults = AnalysisDefaults::default();
        assert_eq!(defaults.session.depth, 3);
        assert_eq!(defaults.session.max_stages, 5);
    }

    #[test]
    fn test_env_flag_unknown_value_keeps_default() {
        env::set_var("CONFIG_TEST_FLAG_UNKNOWN", "maybe");
        assert!(env_flag("CONFIG_TEST_FLAG_UNKNOWN", true));
        assert!(!env_flag("CONFIG_TEST_FLAG_UNKNOWN", false));
        env::remove_var("CONFIG_TEST_FLAG_UNKNOWN");
    }

    #[test]
    fn test_env_flag_parses_false_variants() {
        env::set_var("CONFIG_TEST_FLAG_OFF", "off");
        assert!(!env_flag("CONFIG_TEST_FLAG_OFF", true));
        env::remove_var("CONFIG_TEST_FLAG_OFF");
    }
}

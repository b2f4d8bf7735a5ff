use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub vision: VisionConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub policy: PolicyConfig,
}

/// Vision model API configuration
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model name; selects the token budget and reasoning-effort profile.
    pub model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration.
///
/// `max_retries`/`retry_delay_ms` govern image downloads only; the model
/// call gets a single attempt bounded by `model_timeout_ms`.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub model_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Extraction and selection policy knobs
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Minimum AI confidence for an extracted value to fill an empty field.
    pub confidence_threshold: f64,
    /// What to do when the model's primary-image pick is low-confidence.
    pub primary_low_confidence: PrimaryPolicy,
    /// Primary selections scoring below this trigger the policy above.
    pub primary_confidence_floor: f64,
}

/// Policy for low-confidence primary-image selections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryPolicy {
    /// Accept the selection but record a warning for human review.
    Flag,
    /// Drop the selection; the item keeps no primary image for this run.
    Reject,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let vision = VisionConfig {
            api_key: env::var("VISION_API_KEY").map_err(|_| AppError::Config {
                message: "VISION_API_KEY is required".to_string(),
            })?,
            base_url: env::var("VISION_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/gemvision.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
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
            model_timeout_ms: env::var("MODEL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(180_000),
            fetch_timeout_ms: env::var("FETCH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30_000),
            max_retries: env::var("FETCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: env::var("FETCH_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
        };

        let policy = PolicyConfig {
            confidence_threshold: env::var("AI_CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.7),
            primary_low_confidence: match env::var("PRIMARY_LOW_CONFIDENCE_POLICY")
                .unwrap_or_else(|_| "flag".to_string())
                .to_lowercase()
                .as_str()
            {
                "reject" => PrimaryPolicy::Reject,
                _ => PrimaryPolicy::Flag,
            },
            primary_confidence_floor: env::var("PRIMARY_CONFIDENCE_FLOOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.5),
        };

        Ok(Config {
            vision,
            database,
            logging,
            request,
            policy,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            model_timeout_ms: 180_000,
            fetch_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            primary_low_confidence: PrimaryPolicy::Flag,
            primary_confidence_floor: 0.5,
        }
    }
}

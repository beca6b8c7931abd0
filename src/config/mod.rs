use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub retrieval: RetrievalConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
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

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Dry-run tool planner.
    pub planner: String,
    /// Free-form answer generation.
    pub answer: String,
    /// Natural language to SQL over the students table.
    pub student_sql: String,
    /// SAFE/MODIFY classifier guarding the students table.
    pub guard: String,
}

/// Langbase memory names backing the two retrieval indices
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub regulations_memory: String,
    pub calendar_memory: String,
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
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/campus.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
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
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_env("MAX_RETRIES", 3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes: PipeConfig::from_env(),
            retrieval: RetrievalConfig::from_env(),
        })
    }
}

impl PipeConfig {
    fn from_env() -> Self {
        Self {
            planner: env::var("PIPE_PLANNER").unwrap_or_else(|_| "campus-planner-v1".to_string()),
            answer: env::var("PIPE_ANSWER").unwrap_or_else(|_| "campus-answer-v1".to_string()),
            student_sql: env::var("PIPE_STUDENT_SQL")
                .unwrap_or_else(|_| "campus-student-sql-v1".to_string()),
            guard: env::var("PIPE_GUARD").unwrap_or_else(|_| "campus-guard-v1".to_string()),
        }
    }
}

impl RetrievalConfig {
    fn from_env() -> Self {
        Self {
            regulations_memory: env::var("MEMORY_REGULATIONS")
                .unwrap_or_else(|_| "university-regulations".to_string()),
            calendar_memory: env::var("MEMORY_CALENDAR")
                .unwrap_or_else(|_| "university-calendar".to_string()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
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

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            planner: "campus-planner-v1".to_string(),
            answer: "campus-answer-v1".to_string(),
            student_sql: "campus-student-sql-v1".to_string(),
            guard: "campus-guard-v1".to_string(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            regulations_memory: "university-regulations".to_string(),
            calendar_memory: "university-calendar".to_string(),
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
    fn test_pipe_config_default_names() {
        let pipes = PipeConfig::default();
        assert_eq!(pipes.planner, "campus-planner-v1");
        assert_eq!(pipes.guard, "campus-guard-v1");
    }

    #[test]
    fn test_parse_env_falls_back_on_garbage() {
        std::env::set_var("CAMPUS_TEST_PARSE_ENV", "not-a-number");
        assert_eq!(parse_env("CAMPUS_TEST_PARSE_ENV", 7u32), 7);
        std::env::remove_var("CAMPUS_TEST_PARSE_ENV");
    }
}

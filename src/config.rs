use serde::Deserialize;
use std::env;

/// Functions the target dialect may use in generated queries
pub const DEFAULT_ALLOWED_FUNCTIONS: &[&str] = &[
    "count", "sum", "avg", "min", "max", "quantile", "median",
    "latest", "earliest", "round", "abs", "coalesce", "lower", "upper",
    "to_float64", "to_int64", "to_string", "to_datetime", "to_date",
    "now", "today", "date_diff", "to_start_of_minute", "to_start_of_hour",
    "to_start_of_day", "to_start_of_interval",
    "tumble", "hop", "session", "table",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub schema: SchemaConfig,
    pub catalog: CatalogConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// `gateway`, `anthropic`, `openai` or `groq`; selects the request shape
    pub provider: String,
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl LlmConfig {
    /// An empty gateway URL means queries are produced by the template generator
    pub fn is_configured(&self) -> bool {
        !self.gateway_url.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    /// `static` or `timeplus`
    pub source: String,
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub path: String,
}

/// Immutable settings injected into the translation core
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub target_table: String,
    pub per_call_timeout_secs: u64,
    pub dialect: String,
    /// Minimum dictionary score for a metric to count as matched (inclusive)
    pub min_match_score: f64,
    pub allowed_functions: Vec<String>,
}

impl PipelineConfig {
    pub fn per_call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.per_call_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            target_table: "t_metrics".to_string(),
            per_call_timeout_secs: 30,
            dialect: "clickhouse".to_string(),
            min_match_score: 0.5,
            allowed_functions: DEFAULT_ALLOWED_FUNCTIONS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let allowed_functions: Vec<String> =
            DEFAULT_ALLOWED_FUNCTIONS.iter().map(|f| f.to_string()).collect();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("llm.provider", "gateway")?
            .set_default("llm.gateway_url", "")?
            .set_default("llm.model", "claude-sonnet-4-20250514")?
            .set_default("llm.temperature", 0.1)?
            .set_default("llm.max_tokens", 500)?
            .set_default("schema.source", "static")?
            .set_default("schema.url", "http://localhost:8123")?
            .set_default("schema.database", "default")?
            .set_default("schema.user", "default")?
            .set_default("schema.password", "")?
            .set_default("catalog.path", "data/metric.csv")?
            .set_default("pipeline.max_attempts", 3)?
            .set_default("pipeline.target_table", "t_metrics")?
            .set_default("pipeline.per_call_timeout_secs", 30)?
            .set_default("pipeline.dialect", "clickhouse")?
            .set_default("pipeline.min_match_score", 0.5)?
            .set_default("pipeline.allowed_functions", allowed_functions)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?
            .add_source(config::File::with_name("translator").required(false));

        // Load from environment variables
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(provider) = env::var("LLM_PROVIDER") {
            builder = builder.set_override("llm.provider", provider)?;
        }

        if let Ok(gateway_url) = env::var("LLM_GATEWAY_URL") {
            builder = builder.set_override("llm.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", Some(api_key))?;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            builder = builder.set_override("llm.model", model)?;
        }

        if let Ok(source) = env::var("SCHEMA_SOURCE") {
            builder = builder.set_override("schema.source", source)?;
        }

        if let Ok(url) = env::var("TIMEPLUS_URL") {
            builder = builder.set_override("schema.url", url)?;
        }

        if let Ok(database) = env::var("TIMEPLUS_DATABASE") {
            builder = builder.set_override("schema.database", database)?;
        }

        if let Ok(user) = env::var("TIMEPLUS_USER") {
            builder = builder.set_override("schema.user", user)?;
        }

        if let Ok(password) = env::var("TIMEPLUS_PASSWORD") {
            builder = builder.set_override("schema.password", password)?;
        }

        if let Ok(path) = env::var("METRIC_CATALOG_PATH") {
            builder = builder.set_override("catalog.path", path)?;
        }

        if let Ok(max_attempts) = env::var("MAX_ATTEMPTS") {
            let parsed = max_attempts.parse::<u32>().map_err(|e| {
                config::ConfigError::Message(format!("Invalid value for pipeline.max_attempts: {}", e))
            })?;
            builder = builder.set_override("pipeline.max_attempts", parsed)?;
        }

        if let Ok(table) = env::var("TARGET_TABLE") {
            builder = builder.set_override("pipeline.target_table", table)?;
        }

        if let Ok(timeout) = env::var("PER_CALL_TIMEOUT_SECS") {
            let parsed = timeout.parse::<u64>().map_err(|e| {
                config::ConfigError::Message(format!("Invalid value for pipeline.per_call_timeout_secs: {}", e))
            })?;
            builder = builder.set_override("pipeline.per_call_timeout_secs", parsed)?;
        }

        if let Ok(dialect) = env::var("SQL_DIALECT") {
            builder = builder.set_override("pipeline.dialect", dialect)?;
        }

        if let Ok(score) = env::var("MIN_MATCH_SCORE") {
            let parsed = score.parse::<f64>().map_err(|e| {
                config::ConfigError::Message(format!("Invalid value for pipeline.min_match_score: {}", e))
            })?;
            builder = builder.set_override("pipeline.min_match_score", parsed)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the translation core cannot run with
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let pipeline = &self.pipeline;
        if pipeline.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "pipeline.max_attempts must be at least 1".to_string(),
            ));
        }
        if pipeline.target_table.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "pipeline.target_table cannot be empty".to_string(),
            ));
        }
        if pipeline.per_call_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "pipeline.per_call_timeout_secs must be positive".to_string(),
            ));
        }
        if !(pipeline.min_match_score > 0.0 && pipeline.min_match_score <= 1.0) {
            return Err(config::ConfigError::Message(format!(
                "pipeline.min_match_score must be in (0, 1], got {}",
                pipeline.min_match_score
            )));
        }
        crate::validation::SqlDialectKind::from_str(&pipeline.dialect)
            .map_err(config::ConfigError::Message)?;
        crate::services::llm_service::LlmProvider::from_str(&self.llm.provider)
            .map_err(config::ConfigError::Message)?;

        match self.schema.source.to_lowercase().as_str() {
            "static" => {}
            "timeplus" | "proton" => {
                url::Url::parse(&self.schema.url).map_err(|e| {
                    config::ConfigError::Message(format!("Invalid schema.url '{}': {}", self.schema.url, e))
                })?;
            }
            other => {
                return Err(config::ConfigError::Message(format!(
                    "Unsupported schema.source '{}'. Use 'static' or 'timeplus'",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                provider: "gateway".to_string(),
                gateway_url: String::new(),
                api_key: None,
                model: "test-model".to_string(),
                temperature: 0.1,
                max_tokens: 500,
            },
            schema: SchemaConfig {
                source: "static".to_string(),
                url: "http://localhost:8123".to_string(),
                database: "default".to_string(),
                user: "default".to_string(),
                password: String::new(),
            },
            catalog: CatalogConfig {
                path: "data/metric.csv".to_string(),
            },
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                style: "auto".to_string(),
            },
        }
    }

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("MAX_ATTEMPTS");
        env::remove_var("TARGET_TABLE");
        env::remove_var("SCHEMA_SOURCE");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.target_table, "t_metrics");
        assert!(config.pipeline.allowed_functions.iter().any(|f| f == "to_float64"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = test_config();
        config.pipeline.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_score_bounds() {
        let mut config = test_config();
        config.pipeline.min_match_score = 1.0;
        assert!(config.validate().is_ok());

        config.pipeline.min_match_score = 0.0;
        assert!(config.validate().is_err());

        config.pipeline.min_match_score = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_schema_source() {
        let mut config = test_config();
        config.schema.source = "timeplus".to_string();
        config.schema.url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.schema.url = "http://proton:8123".to_string();
        assert!(config.validate().is_ok());

        config.schema.source = "oracle".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_llm_provider() {
        let mut config = test_config();
        config.llm.provider = "openai".to_string();
        assert!(config.validate().is_ok());

        config.llm.provider = "mistral".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_dialect() {
        let mut config = test_config();
        config.pipeline.dialect = "cobol".to_string();
        assert!(config.validate().is_err());
    }
}

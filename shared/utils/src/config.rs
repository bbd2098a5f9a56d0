use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{SowError, SowResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub targetprocess: TargetProcessConfig,
    pub extraction: ExtractionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProcessConfig {
    pub domain: Option<String>,
    pub access_token: Option<String>,
    pub timeout_seconds: u64,
    /// Forward milestones after every extraction without an explicit request.
    pub auto_sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// The page-text pool is only sent for completion when the block pass
    /// produced fewer milestones than this.
    pub text_pool_threshold: usize,
    /// Minimum keyword hits for a content block to count as a milestone table.
    pub block_keyword_threshold: usize,
    pub processing_confidence: f64,
    /// Upper bound on completion requests in flight for one document.
    pub max_concurrent_completions: usize,
    pub markdown_enabled: bool,
    pub markdown_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                File::with_name(&format!(
                    "config/{}",
                    env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into())
                ))
                .required(false),
            )
            .add_source(File::with_name("config/local").required(false))
            // SOW__OPENAI__MODEL, SOW__EXTRACTION__MARKDOWN_ENABLED, ...
            .add_source(
                Environment::with_prefix("SOW")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut app: AppConfig = config.build()?.try_deserialize()?;
        app.apply_legacy(|key| env::var(key).ok());
        Ok(app)
    }

    /// Defaults plus the unprefixed credential variables, for when the
    /// layered sources cannot be read.
    pub fn fallback() -> Self {
        dotenvy::dotenv().ok();
        let mut app = AppConfig::default();
        app.apply_legacy(|key| env::var(key).ok());
        app
    }

    /// Fill credentials from the unprefixed variables older deployments set.
    fn apply_legacy(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.openai.api_key.is_empty() {
            if let Some(key) = lookup("OPENAI_API_KEY") {
                self.openai.api_key = key;
            }
        }
        if self.targetprocess.domain.is_none() {
            self.targetprocess.domain = lookup("TARGETPROCESS_DOMAIN");
        }
        if self.targetprocess.access_token.is_none() {
            self.targetprocess.access_token = lookup("TARGETPROCESS_ACCESS_TOKEN");
        }
    }

    pub fn validate(&self) -> SowResult<()> {
        if self.openai.api_key.trim().is_empty() {
            return Err(SowError::configuration("openai.api_key is not set"));
        }
        if !(0.0..=2.0).contains(&self.openai.temperature) {
            return Err(SowError::configuration(format!(
                "openai.temperature {} is outside 0.0..=2.0",
                self.openai.temperature
            )));
        }
        if self.extraction.text_pool_threshold == 0 {
            return Err(SowError::configuration(
                "extraction.text_pool_threshold must be at least 1",
            ));
        }
        if self.extraction.max_concurrent_completions == 0 {
            return Err(SowError::configuration(
                "extraction.max_concurrent_completions must be at least 1",
            ));
        }
        Ok(())
    }
}

impl TargetProcessConfig {
    pub fn is_configured(&self) -> bool {
        matches!((&self.domain, &self.access_token), (Some(d), Some(t)) if !d.is_empty() && !t.is_empty())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_size: 16 * 1024 * 1024, // 16MB
            timeout_seconds: 300,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4-1106-preview".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            timeout_seconds: 60,
        }
    }
}

impl Default for TargetProcessConfig {
    fn default() -> Self {
        Self {
            domain: None,
            access_token: None,
            timeout_seconds: 30,
            auto_sync: false,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            text_pool_threshold: 5,
            block_keyword_threshold: 3,
            processing_confidence: 0.95,
            max_concurrent_completions: 4,
            markdown_enabled: true,
            markdown_dir: "output_results/markdown".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

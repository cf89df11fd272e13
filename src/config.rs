use crate::llm::orchestrator::{DEFAULT_SESSION_ID, DEFAULT_SYSTEM_PROMPT};
use crate::llm::{ChatOptions, LlmSettings, Provider};
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Prefix for environment variables read by the config layer,
/// e.g. `CHAT_SERVER__PORT=9000`.
const ENV_PREFIX: &str = "CHAT";

/// Conventional variable holding the `OpenAI` key.
const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Azure only: deployment that serves `model`.
    #[serde(default)]
    pub azure_deployment: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("azure_deployment", &self.azure_deployment)
            .field("azure_api_version", &self.azure_api_version)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub default_session_id: String,
    pub system_prompt: String,
    pub finish_on_disconnect: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Layering, lowest to highest: defaults, config file, `CHAT_*`
    /// environment, CLI flags (and their env fallbacks).
    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("database.url", crate::store::sqlite::DEFAULT_DATABASE_URL)?
            .set_default("database.max_connections", 5)?
            .set_default("llm.base_url", "https://api.openai.com")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("chat.default_session_id", DEFAULT_SESSION_ID)?
            .set_default("chat.system_prompt", DEFAULT_SYSTEM_PROMPT)?
            .set_default("chat.finish_on_disconnect", true)?
            .set_default("log.json", false)?;

        // The conventional key variable seeds the setting; file and CHAT_* still win.
        if let Some(key) = env::var(OPENAI_API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
        {
            builder = builder.set_default("llm.api_key", key)?;
        }

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = cli.database_url {
            builder = builder.set_override("database.url", url)?;
        }
        if cli.log_json {
            builder = builder.set_override("log.json", true)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Validated settings for the completion client.
    ///
    /// The API key is the one required secret; startup fails without it.
    pub fn llm_settings(&self) -> Result<LlmSettings, ConfigError> {
        let llm = &self.llm;

        let base_url = llm.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Message("llm.base_url cannot be empty".to_string()));
        }

        let model = llm.model.trim();
        if model.is_empty() {
            return Err(ConfigError::Message("llm.model cannot be empty".to_string()));
        }

        let api_key = llm
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "Missing API key: set {OPENAI_API_KEY_VAR} or {ENV_PREFIX}_LLM__API_KEY"
                ))
            })?;

        // Azure deployments are commonly named after the model they serve.
        let deployment = llm
            .azure_deployment
            .clone()
            .or_else(|| Some(model.to_string()));
        let provider = Provider::detect_from_url(base_url)
            .with_azure_deployment(deployment, llm.azure_api_version.clone());

        Ok(LlmSettings {
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()),
            model: model.to_string(),
            provider,
        })
    }

    #[must_use]
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            system_prompt: self.chat.system_prompt.clone(),
            default_session_id: self.chat.default_session_id.clone(),
            finish_on_disconnect: self.chat.finish_on_disconnect,
        }
    }

    /// `host:port` to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

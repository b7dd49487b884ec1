use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const AIRS_DEFAULT_BASE_URL: &str = "https://service.api.aisecurity.paloaltonetworks.com";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    pub security: SecurityConfig,
    pub mcp: McpConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub script_path: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_iterations: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct KnowledgeBaseConfig {
    pub path: PathBuf,
    pub top_k: usize,
    pub rerank_top_n: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Runtime content-safety scanning settings.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub api_token: Option<SecretString>,
    pub base_url: String,
    pub ai_model: String,
    pub app_name: String,
    pub app_user: String,
    pub input_profile: String,
    pub output_profile: String,
    pub stream_scan_chunk_interval: usize,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Default)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    StreamableHttp {
        url: String,
    },
    /// Legacy HTTP+SSE transport. Accepted in configuration but not connectable.
    Sse {
        url: String,
    },
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
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
    pub database_script_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub knowledge_base_path: Option<PathBuf>,
    pub security_enabled: Option<bool>,
    pub stream_scan_chunk_interval: Option<usize>,
    pub server_port: Option<u16>,
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
                script_path: PathBuf::from("data/customer_db.sql"),
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: OPENAI_DEFAULT_BASE_URL.to_string(),
                model: "gpt-5-mini".to_string(),
                temperature: 0.0,
                timeout_secs: 120,
                max_retries: 2,
                max_iterations: 25,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            knowledge_base: KnowledgeBaseConfig {
                path: PathBuf::from("knowledge-base"),
                top_k: 5,
                rerank_top_n: 3,
                chunk_size: 1000,
                chunk_overlap: 200,
            },
            security: SecurityConfig {
                enabled: false,
                api_token: None,
                base_url: AIRS_DEFAULT_BASE_URL.to_string(),
                ai_model: "gpt-5-mini".to_string(),
                app_name: "Cafe Assistant".to_string(),
                app_user: "cafe-admin".to_string(),
                input_profile: "Demo-Profile-for-Input".to_string(),
                output_profile: "Demo-Profile-for-Output".to_string(),
                stream_scan_chunk_interval: 50,
                timeout_secs: 30,
            },
            mcp: McpConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl McpServerConfig {
    pub fn transport_name(&self) -> &'static str {
        match self.transport {
            McpTransport::Stdio { .. } => "stdio",
            McpTransport::StreamableHttp { .. } => "streamable_http",
            McpTransport::Sse { .. } => "sse",
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cafe.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(script_path) = database.script_path {
                self.database.script_path = script_path;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(max_iterations) = llm.max_iterations {
                self.llm.max_iterations = max_iterations;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(knowledge_base) = patch.knowledge_base {
            if let Some(path) = knowledge_base.path {
                self.knowledge_base.path = path;
            }
            if let Some(top_k) = knowledge_base.top_k {
                self.knowledge_base.top_k = top_k;
            }
            if let Some(rerank_top_n) = knowledge_base.rerank_top_n {
                self.knowledge_base.rerank_top_n = rerank_top_n;
            }
            if let Some(chunk_size) = knowledge_base.chunk_size {
                self.knowledge_base.chunk_size = chunk_size;
            }
            if let Some(chunk_overlap) = knowledge_base.chunk_overlap {
                self.knowledge_base.chunk_overlap = chunk_overlap;
            }
        }

        if let Some(security) = patch.security {
            if let Some(enabled) = security.enabled {
                self.security.enabled = enabled;
            }
            if let Some(api_token_value) = security.api_token {
                self.security.api_token = Some(secret_value(api_token_value));
            }
            if let Some(base_url) = security.base_url {
                self.security.base_url = base_url;
            }
            if let Some(ai_model) = security.ai_model {
                self.security.ai_model = ai_model;
            }
            if let Some(app_name) = security.app_name {
                self.security.app_name = app_name;
            }
            if let Some(app_user) = security.app_user {
                self.security.app_user = app_user;
            }
            if let Some(input_profile) = security.input_profile {
                self.security.input_profile = input_profile;
            }
            if let Some(output_profile) = security.output_profile {
                self.security.output_profile = output_profile;
            }
            if let Some(interval) = security.stream_scan_chunk_interval {
                self.security.stream_scan_chunk_interval = interval;
            }
            if let Some(timeout_secs) = security.timeout_secs {
                self.security.timeout_secs = timeout_secs;
            }
        }

        if let Some(mcp) = patch.mcp {
            if let Some(servers) = mcp.servers {
                self.mcp.servers = servers;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CAFE_DATABASE_SCRIPT_PATH") {
            self.database.script_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("CAFE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CAFE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CAFE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CAFE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CAFE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("CAFE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CAFE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("CAFE_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("CAFE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CAFE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CAFE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CAFE_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CAFE_LLM_MAX_ITERATIONS") {
            self.llm.max_iterations = parse_u32("CAFE_LLM_MAX_ITERATIONS", &value)?;
        }

        if let Some(value) = read_env("CAFE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CAFE_SERVER_PORT") {
            self.server.port = parse_u16("CAFE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CAFE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CAFE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CAFE_KNOWLEDGE_BASE_PATH") {
            self.knowledge_base.path = PathBuf::from(value);
        }
        if let Some(value) = read_env("CAFE_KNOWLEDGE_BASE_TOP_K") {
            self.knowledge_base.top_k = parse_usize("CAFE_KNOWLEDGE_BASE_TOP_K", &value)?;
        }
        if let Some(value) = read_env("CAFE_KNOWLEDGE_BASE_RERANK_TOP_N") {
            self.knowledge_base.rerank_top_n =
                parse_usize("CAFE_KNOWLEDGE_BASE_RERANK_TOP_N", &value)?;
        }
        if let Some(value) = read_env("CAFE_KNOWLEDGE_BASE_CHUNK_SIZE") {
            self.knowledge_base.chunk_size = parse_usize("CAFE_KNOWLEDGE_BASE_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = read_env("CAFE_KNOWLEDGE_BASE_CHUNK_OVERLAP") {
            self.knowledge_base.chunk_overlap =
                parse_usize("CAFE_KNOWLEDGE_BASE_CHUNK_OVERLAP", &value)?;
        }

        if let Some(value) = read_env("CAFE_SECURITY_ENABLED") {
            self.security.enabled = parse_bool("CAFE_SECURITY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CAFE_SECURITY_API_TOKEN") {
            self.security.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CAFE_SECURITY_BASE_URL") {
            self.security.base_url = value;
        }
        if let Some(value) = read_env("CAFE_SECURITY_AI_MODEL") {
            self.security.ai_model = value;
        }
        if let Some(value) = read_env("CAFE_SECURITY_APP_NAME") {
            self.security.app_name = value;
        }
        if let Some(value) = read_env("CAFE_SECURITY_APP_USER") {
            self.security.app_user = value;
        }
        if let Some(value) = read_env("CAFE_SECURITY_INPUT_PROFILE") {
            self.security.input_profile = value;
        }
        if let Some(value) = read_env("CAFE_SECURITY_OUTPUT_PROFILE") {
            self.security.output_profile = value;
        }
        if let Some(value) = read_env("CAFE_SECURITY_STREAM_SCAN_CHUNK_INTERVAL") {
            self.security.stream_scan_chunk_interval =
                parse_usize("CAFE_SECURITY_STREAM_SCAN_CHUNK_INTERVAL", &value)?;
        }
        if let Some(value) = read_env("CAFE_SECURITY_TIMEOUT_SECS") {
            self.security.timeout_secs = parse_u64("CAFE_SECURITY_TIMEOUT_SECS", &value)?;
        }

        self.apply_mcp_env_shortcuts()?;

        let log_level = read_env("CAFE_LOGGING_LEVEL").or_else(|| read_env("CAFE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("CAFE_LOGGING_FORMAT").or_else(|| read_env("CAFE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_mcp_env_shortcuts(&mut self) -> Result<(), ConfigError> {
        let relay_enabled = read_env("CAFE_MCP_RELAY_ENABLED")
            .map(|value| parse_bool("CAFE_MCP_RELAY_ENABLED", &value))
            .transpose()?
            .unwrap_or(false);
        if relay_enabled {
            let url = read_env("CAFE_MCP_RELAY_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8800/mcp/".to_string());
            self.push_mcp_server(McpServerConfig {
                name: "mcp-relay".to_string(),
                transport: McpTransport::StreamableHttp { url },
            });
        }

        let amap_key = read_env("CAFE_AMAP_API_KEY");
        let amap_sse_enabled = read_env("CAFE_AMAP_SSE_ENABLED")
            .map(|value| parse_bool("CAFE_AMAP_SSE_ENABLED", &value))
            .transpose()?
            .unwrap_or(false);
        if let (true, Some(api_key)) = (amap_sse_enabled, amap_key.as_ref()) {
            self.push_mcp_server(McpServerConfig {
                name: "amap-sse".to_string(),
                transport: McpTransport::Sse {
                    url: format!("https://mcp.amap.com/sse?key={api_key}"),
                },
            });
        }

        let amap_stdio_enabled = read_env("CAFE_AMAP_STDIO_ENABLED")
            .map(|value| parse_bool("CAFE_AMAP_STDIO_ENABLED", &value))
            .transpose()?
            .unwrap_or(false);
        if let (true, Some(api_key)) = (amap_stdio_enabled, amap_key) {
            self.push_mcp_server(McpServerConfig {
                name: "amap-stdio".to_string(),
                transport: McpTransport::Stdio {
                    command: "npx".to_string(),
                    args: vec!["-y".to_string(), "@amap/amap-maps-mcp-server".to_string()],
                    env: BTreeMap::from([("AMAP_MAPS_API_KEY".to_string(), api_key)]),
                },
            });
        }

        Ok(())
    }

    fn push_mcp_server(&mut self, server: McpServerConfig) {
        self.mcp.servers.retain(|existing| existing.name != server.name);
        self.mcp.servers.push(server);
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(script_path) = overrides.database_script_path {
            self.database.script_path = script_path;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(path) = overrides.knowledge_base_path {
            self.knowledge_base.path = path;
        }
        if let Some(enabled) = overrides.security_enabled {
            self.security.enabled = enabled;
        }
        if let Some(interval) = overrides.stream_scan_chunk_interval {
            self.security.stream_scan_chunk_interval = interval;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_knowledge_base(&self.knowledge_base)?;
        validate_security(&self.security)?;
        validate_mcp(&self.mcp)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cafe.toml"), PathBuf::from("config/cafe.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if database.script_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("database.script_path must not be empty".to_string()));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if llm.max_iterations == 0 {
        return Err(ConfigError::Validation(
            "llm.max_iterations must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    validate_http_url("llm.base_url", &llm.base_url)?;

    if llm.provider == LlmProvider::OpenAi {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider. Set CAFE_LLM_API_KEY or add it to cafe.toml"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_knowledge_base(knowledge_base: &KnowledgeBaseConfig) -> Result<(), ConfigError> {
    if knowledge_base.chunk_size == 0 {
        return Err(ConfigError::Validation(
            "knowledge_base.chunk_size must be greater than zero".to_string(),
        ));
    }

    if knowledge_base.chunk_overlap >= knowledge_base.chunk_size {
        return Err(ConfigError::Validation(
            "knowledge_base.chunk_overlap must be smaller than knowledge_base.chunk_size"
                .to_string(),
        ));
    }

    if knowledge_base.top_k == 0 || knowledge_base.rerank_top_n == 0 {
        return Err(ConfigError::Validation(
            "knowledge_base.top_k and knowledge_base.rerank_top_n must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_security(security: &SecurityConfig) -> Result<(), ConfigError> {
    if security.stream_scan_chunk_interval == 0 {
        return Err(ConfigError::Validation(
            "security.stream_scan_chunk_interval must be greater than zero".to_string(),
        ));
    }

    if security.timeout_secs == 0 || security.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "security.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    validate_http_url("security.base_url", &security.base_url)
}

fn validate_mcp(mcp: &McpConfig) -> Result<(), ConfigError> {
    for server in &mcp.servers {
        if server.name.trim().is_empty() {
            return Err(ConfigError::Validation("mcp.servers[].name must not be empty".to_string()));
        }
        match &server.transport {
            McpTransport::Stdio { command, .. } if command.trim().is_empty() => {
                return Err(ConfigError::Validation(format!(
                    "mcp server `{}` uses stdio transport but has no command",
                    server.name
                )));
            }
            McpTransport::StreamableHttp { url } | McpTransport::Sse { url } => {
                validate_http_url(&format!("mcp server `{}` url", server.name), url)?;
            }
            McpTransport::Stdio { .. } => {}
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{field} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    knowledge_base: Option<KnowledgeBasePatch>,
    security: Option<SecurityPatch>,
    mcp: Option<McpPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    script_path: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_iterations: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeBasePatch {
    path: Option<PathBuf>,
    top_k: Option<usize>,
    rerank_top_n: Option<usize>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    enabled: Option<bool>,
    api_token: Option<String>,
    base_url: Option<String>,
    ai_model: Option<String>,
    app_name: Option<String>,
    app_user: Option<String>,
    input_profile: Option<String>,
    output_profile: Option<String>,
    stream_scan_chunk_interval: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct McpPatch {
    servers: Option<Vec<McpServerConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, McpTransport};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CAFE_LLM_KEY", "sk-from-env");
        env::set_var("TEST_CAFE_SCAN_TOKEN", "scan-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cafe.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_CAFE_LLM_KEY}"

[security]
enabled = true
api_token = "${TEST_CAFE_SCAN_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "llm api key should be loaded from environment",
            )?;
            ensure(
                config.security.api_token.as_ref().map(|token| token.expose_secret())
                    == Some("scan-from-env"),
                "scan token should be loaded from environment",
            )?;
            ensure(config.security.enabled, "security should be enabled from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_CAFE_LLM_KEY", "TEST_CAFE_SCAN_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAFE_LLM_API_KEY", "sk-test");
        env::set_var("CAFE_LOG_LEVEL", "warn");
        env::set_var("CAFE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CAFE_LLM_API_KEY", "CAFE_LOG_LEVEL", "CAFE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAFE_DATABASE_SCRIPT_PATH", "from-env.sql");
        env::set_var("CAFE_LLM_API_KEY", "sk-from-env");
        env::set_var("CAFE_SECURITY_STREAM_SCAN_CHUNK_INTERVAL", "25");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cafe.toml");
            fs::write(
                &path,
                r#"
[database]
script_path = "from-file.sql"

[llm]
api_key = "sk-from-file"
model = "file-model"

[security]
stream_scan_chunk_interval = 10

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_script_path: Some("from-override.sql".into()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.script_path.to_str() == Some("from-override.sql"),
                "override script path should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret()) == Some("sk-from-env"),
                "env api key should win over file and defaults",
            )?;
            ensure(config.llm.model == "file-model", "file model should win over defaults")?;
            ensure(
                config.security.stream_scan_chunk_interval == 25,
                "env chunk interval should win over file",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "CAFE_DATABASE_SCRIPT_PATH",
            "CAFE_LLM_API_KEY",
            "CAFE_SECURITY_STREAM_SCAN_CHUNK_INTERVAL",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_without_llm_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["CAFE_LLM_API_KEY", "CAFE_LLM_PROVIDER"]);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("llm.api_key")
        );
        ensure(has_message, "validation failure should mention llm.api_key")
    }

    #[test]
    fn ollama_provider_does_not_require_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAFE_LLM_PROVIDER", "ollama");
        env::set_var("CAFE_LLM_BASE_URL", "http://localhost:11434/v1");

        let result = AppConfig::load(LoadOptions::default())
            .map(|_| ())
            .map_err(|err| format!("config load failed: {err}"));

        clear_vars(&["CAFE_LLM_PROVIDER", "CAFE_LLM_BASE_URL"]);
        result
    }

    #[test]
    fn zero_scan_interval_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some("sk-test".to_string()),
                stream_scan_chunk_interval: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        ensure(
            matches!(
                result,
                Err(ConfigError::Validation(ref message))
                    if message.contains("stream_scan_chunk_interval")
            ),
            "zero chunk interval should fail validation",
        )
    }

    #[test]
    fn mcp_servers_load_from_file_and_env_shortcuts() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAFE_LLM_API_KEY", "sk-test");
        env::set_var("CAFE_MCP_RELAY_ENABLED", "true");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cafe.toml");
            fs::write(
                &path,
                r#"
[[mcp.servers]]
name = "maps"
transport = "stdio"
command = "maps-server"
args = ["--quiet"]

[[mcp.servers]]
name = "loyalty"
transport = "streamable_http"
url = "https://loyalty.example.com/mcp"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let names: Vec<&str> =
                config.mcp.servers.iter().map(|server| server.name.as_str()).collect();
            ensure(names == ["maps", "loyalty", "mcp-relay"], "servers keep file order")?;
            ensure(
                matches!(
                    &config.mcp.servers[0].transport,
                    McpTransport::Stdio { command, args, .. }
                        if command == "maps-server" && args == &["--quiet".to_string()]
                ),
                "stdio server should keep command and args",
            )?;
            ensure(
                config.mcp.servers[2].transport_name() == "streamable_http",
                "relay shortcut should use streamable http",
            )?;
            Ok(())
        })();

        clear_vars(&["CAFE_LLM_API_KEY", "CAFE_MCP_RELAY_ENABLED"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAFE_LLM_API_KEY", "sk-secret-value");
        env::set_var("CAFE_SECURITY_API_TOKEN", "scan-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("scan-secret-value"),
                "debug output should not contain scan token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            ensure(
                config.security.stream_scan_chunk_interval == 50,
                "default chunk interval should be 50",
            )?;
            Ok(())
        })();

        clear_vars(&["CAFE_LLM_API_KEY", "CAFE_SECURITY_API_TOKEN"]);
        result
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cafe_core::config::{AppConfig, LoadOptions, McpTransport};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key: &str, env_backed: bool| {
        let env_key = env_backed.then(|| env_key_for(key));
        field_source(key, env_key.as_deref(), config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let entries: Vec<(&str, String, bool)> = vec![
        ("database.script_path", config.database.script_path.display().to_string(), true),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), true),
        ("llm.provider", format!("{:?}", config.llm.provider), true),
        ("llm.model", config.llm.model.clone(), true),
        ("llm.base_url", config.llm.base_url.clone(), true),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref()), true),
        ("llm.temperature", config.llm.temperature.to_string(), true),
        ("llm.max_iterations", config.llm.max_iterations.to_string(), true),
        ("server.bind_address", config.server.bind_address.clone(), true),
        ("server.port", config.server.port.to_string(), true),
        ("knowledge_base.path", config.knowledge_base.path.display().to_string(), true),
        ("knowledge_base.top_k", config.knowledge_base.top_k.to_string(), true),
        ("knowledge_base.rerank_top_n", config.knowledge_base.rerank_top_n.to_string(), true),
        ("security.enabled", config.security.enabled.to_string(), true),
        ("security.api_token", redact_secret(config.security.api_token.as_ref()), true),
        ("security.base_url", config.security.base_url.clone(), true),
        ("security.input_profile", config.security.input_profile.clone(), true),
        ("security.output_profile", config.security.output_profile.clone(), true),
        (
            "security.stream_scan_chunk_interval",
            config.security.stream_scan_chunk_interval.to_string(),
            true,
        ),
        ("mcp.servers", describe_mcp_servers(&config), false),
        ("logging.level", config.logging.level.clone(), true),
        ("logging.format", format!("{:?}", config.logging.format), true),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries.into_iter().map(|(key, value, env_backed)| render_line(key, &value, source(key, env_backed))),
    );
    lines.join("\n")
}

fn env_key_for(key_path: &str) -> String {
    format!("CAFE_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn describe_mcp_servers(config: &AppConfig) -> String {
    if config.mcp.servers.is_empty() {
        return "<none>".to_string();
    }

    config
        .mcp
        .servers
        .iter()
        .map(|server| {
            let target = match &server.transport {
                McpTransport::Stdio { command, .. } => command.clone(),
                McpTransport::StreamableHttp { url } => url.clone(),
                McpTransport::Sse { .. } => "<legacy sse, not connected>".to_string(),
            };
            format!("{} [{}: {}]", server.name, server.transport_name(), target)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("cafe.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/cafe.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };

    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

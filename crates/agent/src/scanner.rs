use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cafe_core::config::SecurityConfig;
use cafe_core::domain::scan::{ScanAction, ScanDirection, ScanResult};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("scan service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed scan response: {0}")]
    MalformedResponse(String),
}

/// Remote content-safety check. May fail; `ContentScanner` decides what a failure means.
#[async_trait]
pub trait ScanCapability: Send + Sync {
    async fn scan(
        &self,
        direction: ScanDirection,
        text: &str,
        profile: &str,
    ) -> Result<ScanResult, ScanError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanSettings {
    pub enabled: bool,
    pub input_profile: String,
    pub output_profile: String,
    pub stream_chunk_interval: usize,
}

impl ScanSettings {
    pub fn from_config(security: &SecurityConfig) -> Self {
        Self {
            enabled: security.enabled,
            input_profile: security.input_profile.clone(),
            output_profile: security.output_profile.clone(),
            stream_chunk_interval: security.stream_scan_chunk_interval.max(1),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            input_profile: String::new(),
            output_profile: String::new(),
            stream_chunk_interval: 50,
        }
    }

    pub fn profile_for(&self, direction: ScanDirection) -> &str {
        match direction {
            ScanDirection::Input => &self.input_profile,
            ScanDirection::Output => &self.output_profile,
        }
    }
}

/// Fail-open wrapper around a scan capability: every scan returns a verdict.
#[derive(Clone)]
pub struct ContentScanner {
    capability: Option<Arc<dyn ScanCapability>>,
    settings: ScanSettings,
}

impl ContentScanner {
    pub fn new(capability: Option<Arc<dyn ScanCapability>>, settings: ScanSettings) -> Self {
        Self { capability, settings }
    }

    pub fn disabled() -> Self {
        Self::new(None, ScanSettings::disabled())
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        let settings = ScanSettings::from_config(security);
        if !security.enabled {
            info!(event_name = "security.scanner.disabled", "content scanning is disabled");
            return Self::new(None, settings);
        }

        let Some(token) = security.api_token.clone() else {
            warn!(
                event_name = "security.scanner.unconfigured",
                "content scanning enabled but no api token configured; every scan will allow"
            );
            return Self::new(None, settings);
        };

        match AirsScanCapability::new(security, token) {
            Ok(capability) => {
                info!(event_name = "security.scanner.ready", base_url = %security.base_url, "content scanner initialized");
                Self::new(Some(Arc::new(capability)), settings)
            }
            Err(error) => {
                error!(
                    event_name = "security.scanner.init_failed",
                    error = %error,
                    "content scanner could not be initialized; every scan will allow"
                );
                Self::new(None, settings)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn has_capability(&self) -> bool {
        self.capability.is_some()
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn profile_for(&self, direction: ScanDirection) -> &str {
        self.settings.profile_for(direction)
    }

    pub async fn scan(&self, direction: ScanDirection, text: &str, profile: &str) -> ScanResult {
        let Some(capability) = &self.capability else {
            debug!(scan_type = %direction, "no scan capability configured; allowing");
            return ScanResult::allow();
        };

        match capability.scan(direction, text, profile).await {
            Ok(result) => {
                info!(
                    event_name = "security.scan.completed",
                    scan_type = %direction,
                    action = result.action.as_str(),
                    category = result.category.as_deref().unwrap_or("none"),
                    "content scan completed"
                );
                result
            }
            Err(scan_error) => {
                error!(
                    event_name = "security.scan.failed",
                    scan_type = %direction,
                    profile = profile,
                    error = %scan_error,
                    "content scan failed; allowing"
                );
                ScanResult::allow()
            }
        }
    }

    pub async fn scan_input(&self, text: &str) -> ScanResult {
        self.scan(ScanDirection::Input, text, self.profile_for(ScanDirection::Input)).await
    }

    pub async fn scan_output(&self, text: &str) -> ScanResult {
        self.scan(ScanDirection::Output, text, self.profile_for(ScanDirection::Output)).await
    }
}

/// Audit detail for a blocked scan. Only ever written to server logs.
#[derive(Clone, Debug)]
pub struct ViolationRecord<'a> {
    pub direction: ScanDirection,
    pub result: &'a ScanResult,
    pub profile: &'a str,
    pub content: &'a str,
    pub conversation_id: Option<&'a str>,
    pub scan_context: Option<&'a str>,
    pub chunks_accumulated: Option<usize>,
}

pub fn log_security_violation(record: &ViolationRecord<'_>) {
    warn!(
        event_name = "security.violation",
        scan_type = %record.direction,
        category = record.result.category.as_deref().unwrap_or("unknown"),
        action = record.result.action.as_str(),
        profile = record.profile,
        conversation_id = record.conversation_id.unwrap_or("none"),
        scan_context = record.scan_context.unwrap_or("none"),
        chunks_accumulated = ?record.chunks_accumulated,
        content = record.content,
        "content blocked by security policy"
    );
}

/// Synchronous scan endpoint of the AI runtime security service.
pub struct AirsScanCapability {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
    app_name: String,
    app_user: String,
    ai_model: String,
}

#[derive(Debug, Deserialize)]
struct AirsScanResponse {
    action: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    scan_id: Option<String>,
    #[serde(default)]
    report_id: Option<String>,
}

impl AirsScanCapability {
    pub fn new(security: &SecurityConfig, token: SecretString) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(security.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/scan/sync/request", security.base_url.trim_end_matches('/')),
            token,
            app_name: security.app_name.clone(),
            app_user: security.app_user.clone(),
            ai_model: security.ai_model.clone(),
        })
    }

    fn request_body(&self, direction: ScanDirection, text: &str, profile: &str) -> Value {
        let content = match direction {
            ScanDirection::Input => json!({ "prompt": text }),
            ScanDirection::Output => json!({ "response": text }),
        };

        json!({
            "tr_id": uuid::Uuid::new_v4().to_string(),
            "ai_profile": { "profile_name": profile },
            "metadata": {
                "app_name": self.app_name,
                "app_user": self.app_user,
                "ai_model": self.ai_model,
            },
            "contents": [content],
        })
    }
}

fn parse_scan_response(
    body: &str,
    direction: ScanDirection,
    profile: &str,
) -> Result<ScanResult, ScanError> {
    let response: AirsScanResponse = serde_json::from_str(body)
        .map_err(|error| ScanError::MalformedResponse(error.to_string()))?;

    let action = match response.action.to_ascii_lowercase().as_str() {
        "allow" => ScanAction::Allow,
        "block" => ScanAction::Block,
        other => return Err(ScanError::MalformedResponse(format!("unknown action `{other}`"))),
    };

    let mut details = BTreeMap::new();
    details.insert("profile".to_string(), Value::from(profile));
    details.insert("scan_type".to_string(), Value::from(direction.as_str()));
    if let Some(scan_id) = response.scan_id {
        details.insert("scan_id".to_string(), Value::from(scan_id));
    }
    if let Some(report_id) = response.report_id {
        details.insert("report_id".to_string(), Value::from(report_id));
    }

    Ok(ScanResult { action, category: response.category, details: Some(details) })
}

#[async_trait]
impl ScanCapability for AirsScanCapability {
    async fn scan(
        &self,
        direction: ScanDirection,
        text: &str,
        profile: &str,
    ) -> Result<ScanResult, ScanError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-pan-token", self.token.expose_secret())
            .json(&self.request_body(direction, text, profile))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ScanError::Status { status: status.as_u16(), body });
        }

        parse_scan_response(&body, direction, profile)
    }
}

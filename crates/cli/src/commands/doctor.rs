use cafe_agent::retrieval::KnowledgeBaseRetriever;
use cafe_core::config::{AppConfig, LoadOptions, McpTransport};
use cafe_db::{DatabaseHandle, SqlToolkit};
use serde::Serialize;

use super::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["customer_database", "knowledge_base", "content_scanner", "mcp_servers"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_customer_database(&config));
            checks.push(check_knowledge_base(&config));
            checks.push(check_content_scanner(&config));
            checks.push(check_mcp_servers(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_customer_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "customer_database",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let database =
            DatabaseHandle::new(&config.database.script_path, config.database.timeout_secs);
        let tables = SqlToolkit::new(database.clone())
            .list_tables()
            .await
            .map_err(|error| format!("failed to load customer database: {error}"))?;

        if let Ok(pool) = database.pool().await {
            pool.close().await;
        }
        Ok::<Vec<String>, String>(tables)
    });

    match result {
        Ok(tables) => DoctorCheck {
            name: "customer_database",
            status: CheckStatus::Pass,
            details: format!(
                "loaded `{}` with tables: {}",
                config.database.script_path.display(),
                tables.join(", ")
            ),
        },
        Err(error) => {
            DoctorCheck { name: "customer_database", status: CheckStatus::Fail, details: error }
        }
    }
}

fn check_knowledge_base(config: &AppConfig) -> DoctorCheck {
    match KnowledgeBaseRetriever::load(&config.knowledge_base) {
        Ok(retriever) if retriever.is_empty() => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Fail,
            details: format!(
                "no passages found under `{}`; answers will have no context",
                config.knowledge_base.path.display()
            ),
        },
        Ok(retriever) => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Pass,
            details: format!(
                "indexed {} passages from `{}`",
                retriever.len(),
                config.knowledge_base.path.display()
            ),
        },
        Err(error) => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Fail,
            details: format!("failed to index knowledge base: {error:#}"),
        },
    }
}

fn check_content_scanner(config: &AppConfig) -> DoctorCheck {
    let security = &config.security;
    match (security.enabled, security.api_token.is_some()) {
        (false, _) => DoctorCheck {
            name: "content_scanner",
            status: CheckStatus::Skipped,
            details: "content scanning disabled".to_string(),
        },
        (true, false) => DoctorCheck {
            name: "content_scanner",
            status: CheckStatus::Fail,
            details: "scanning enabled without security.api_token; every scan would allow"
                .to_string(),
        },
        (true, true) => DoctorCheck {
            name: "content_scanner",
            status: CheckStatus::Pass,
            details: format!(
                "scanning via `{}` with profiles `{}` / `{}` every {} chunks",
                security.base_url,
                security.input_profile,
                security.output_profile,
                security.stream_scan_chunk_interval
            ),
        },
    }
}

fn check_mcp_servers(config: &AppConfig) -> DoctorCheck {
    let servers = &config.mcp.servers;
    if servers.is_empty() {
        return DoctorCheck {
            name: "mcp_servers",
            status: CheckStatus::Skipped,
            details: "no remote tool servers configured".to_string(),
        };
    }

    let legacy: Vec<&str> = servers
        .iter()
        .filter(|server| matches!(server.transport, McpTransport::Sse { .. }))
        .map(|server| server.name.as_str())
        .collect();
    let mut details = format!("{} configured", servers.len());
    if !legacy.is_empty() {
        details.push_str(&format!("; legacy sse servers will be skipped: {}", legacy.join(", ")));
    }

    DoctorCheck { name: "mcp_servers", status: CheckStatus::Pass, details }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

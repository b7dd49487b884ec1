use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use cafe_cli::commands::{ask, config, doctor};
use serde_json::Value;
use tempfile::TempDir;

const SCRIPT: &str = "CREATE TABLE menu_items (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
                      INSERT INTO menu_items (name) VALUES ('Margherita');\n";

#[test]
fn doctor_reports_config_failure_and_skips_dependent_checks() {
    with_env(&[("CAFE_LLM_PROVIDER", "openai")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1, "expected doctor failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_passes_with_seeded_database_and_knowledge_base() {
    let dir = TempDir::new().expect("tempdir");
    let script = dir.path().join("customer_db.sql");
    fs::write(&script, SCRIPT).expect("write script");
    let kb = dir.path().join("kb");
    fs::create_dir(&kb).expect("kb dir");
    fs::write(kb.join("hours.md"), "We are open every day from 11am until 10pm.").expect("kb file");

    let script_path = script.display().to_string();
    let kb_path = kb.display().to_string();
    with_env(
        &[
            ("CAFE_LLM_PROVIDER", "ollama"),
            ("CAFE_DATABASE_SCRIPT_PATH", &script_path),
            ("CAFE_KNOWLEDGE_BASE_PATH", &kb_path),
            ("CAFE_SECURITY_ENABLED", "false"),
        ],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 0, "expected doctor to pass: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["overall_status"], "pass");
            let database = find_check(&payload, "customer_database");
            assert_eq!(database["status"], "pass");
            assert!(database["details"].as_str().is_some_and(|details| details.contains("menu_items")));
            assert_eq!(find_check(&payload, "knowledge_base")["status"], "pass");
            assert_eq!(find_check(&payload, "content_scanner")["status"], "skipped");
        },
    );
}

#[test]
fn doctor_fails_when_scanning_has_no_token() {
    let dir = TempDir::new().expect("tempdir");
    let script = dir.path().join("customer_db.sql");
    fs::write(&script, SCRIPT).expect("write script");
    let script_path = script.display().to_string();

    with_env(
        &[
            ("CAFE_LLM_PROVIDER", "ollama"),
            ("CAFE_DATABASE_SCRIPT_PATH", &script_path),
            ("CAFE_SECURITY_ENABLED", "true"),
        ],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 1);
            assert!(result.output.contains("- [fail] content_scanner:"));
        },
    );
}

#[test]
fn config_redacts_secrets_and_attributes_env_sources() {
    with_env(
        &[
            ("CAFE_LLM_PROVIDER", "openai"),
            ("CAFE_LLM_API_KEY", "sk-very-secret-value"),
            ("CAFE_SECURITY_API_TOKEN", "opaque-token"),
        ],
        || {
            let output = config::run();

            assert!(output.contains("- llm.api_key = sk-*** (source: env (CAFE_LLM_API_KEY))"));
            assert!(output.contains("- security.api_token = opaque-*** (source: env (CAFE_SECURITY_API_TOKEN))"));
            assert!(output.contains("- server.port = 8000 (source: default)"));
            assert!(!output.contains("very-secret"));
        },
    );
}

#[test]
fn ask_returns_config_failure_without_api_key() {
    with_env(&[("CAFE_LLM_PROVIDER", "openai")], || {
        let result = ask::run("What's on the menu?");
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn ask_rejects_blank_messages() {
    let result = ask::run("  ");
    assert_eq!(result.exit_code, 2);
    assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
}

fn find_check<'a>(payload: &'a Value, name: &str) -> &'a Value {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .expect("check present")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys: Vec<String> = env::vars().map(|(key, _)| key).filter(|key| key.starts_with("CAFE_")).collect();
    let previous_values: Vec<(String, Option<String>)> =
        keys.iter().map(|key| (key.clone(), env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, _) in vars {
        env::remove_var(key);
    }
    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(&key, value);
        }
    }
}

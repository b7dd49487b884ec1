use cafe_agent::{AgentRuntime, HistoryAccess};
use cafe_core::config::{AppConfig, LoadOptions};
use cafe_db::DatabaseHandle;

use super::CommandResult;

/// Answers one message without conversation history.
pub fn run(message: &str) -> CommandResult {
    if message.trim().is_empty() {
        return CommandResult::failure("ask", "invalid_input", "message must not be empty", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure("ask", "config_validation", error.to_string(), 2),
    };

    let database = DatabaseHandle::new(&config.database.script_path, config.database.timeout_secs);
    let agent = match AgentRuntime::from_config(&config, database) {
        Ok(agent) => agent,
        Err(error) => {
            return CommandResult::failure("ask", "runtime_setup", format!("{error:#}"), 3);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "runtime_setup",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let answer = runtime.block_on(agent.process_query(message, &HistoryAccess::Stateless));
    CommandResult::success("ask", answer)
}

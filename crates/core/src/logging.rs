use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

const QUIET_DEPENDENCIES: &[&str] = &["hyper", "reqwest", "rmcp", "sqlx", "h2"];

pub fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    let mut directives = logging.level.trim().to_ascii_lowercase();
    for target in QUIET_DEPENDENCIES {
        directives.push_str(&format!(",{target}=warn"));
    }
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(env_filter(logging));

    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

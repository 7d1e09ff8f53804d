//! Tracing setup for the binary, and path formatting for log lines

use std::path::Path;

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the filter directive, e.g. `tag_vault=debug`
pub const LOG_ENV: &str = "TAG_VAULT_LOG";

/// Install a stdout subscriber. Library code only emits events; callers that
/// embed the crate are free to install their own subscriber instead.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    if installed.is_ok() {
        tracing::debug!("Tracing configured from {}", LOG_ENV);
    }
}

/// Shorten the user's home directory to `~` so log lines stay readable
pub fn tilde(path: &Path) -> String {
    match dirs::home_dir() {
        Some(home) if path.starts_with(&home) => match path.strip_prefix(&home) {
            Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
            Ok(rest) => Path::new("~").join(rest).display().to_string(),
            Err(_) => path.display().to_string(),
        },
        _ => path.display().to_string(),
    }
}

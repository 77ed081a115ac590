//! Runs inside each isolated instance: one request document on stdin,
//! one result document on stdout. Logs go to stderr.

use code_sandbox::entrypoint::{self, EntrypointSettings};
use code_sandbox::signal::shutdown_signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("code_sandbox=warn")),
        )
        .init();

    let settings = EntrypointSettings::from_env();
    info!(
        "Entrypoint starting (default timeout {}ms, memory limit {})",
        settings.default_timeout.as_millis(),
        settings
            .memory_limit_mb
            .map(|mb| format!("{mb}MB"))
            .unwrap_or_else(|| "unset".to_string()),
    );

    let run = async move { entrypoint::run(tokio::io::stdin(), &settings).await };

    let response = match entrypoint::supervise(run, shutdown_signal()).await {
        Ok(response) => response,
        Err(interrupted) => {
            warn!("{interrupted}, exiting");
            std::process::exit(interrupted.exit_code());
        }
    };

    match serde_json::to_string(&response) {
        Ok(document) => println!("{document}"),
        Err(e) => {
            error!("Cannot encode result document: {e}");
            std::process::exit(1);
        }
    }
    std::process::exit(entrypoint::exit_code(&response));
}

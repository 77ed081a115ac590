use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use futures::future::{join_all, FutureExt};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use code_sandbox::config::Config;
use code_sandbox::sandbox::ExecutionResult;
use code_sandbox::signal::shutdown_signal;
use code_sandbox::skills::builtin::CodeSkill;
use code_sandbox::skills::SkillRegistry;

const DEFAULT_CONFIG_PATH: &str = "config/sandbox.toml";

fn print_help() {
    println!(
        "\
code-sandbox v{}

Runs untrusted JavaScript in throwaway, locked-down container instances.

USAGE:
    code-sandbox [OPTIONS] [REQUEST_PATH]

ARGUMENTS:
    REQUEST_PATH    JSON request document (or an array of them)
                    [default: read from stdin]

OPTIONS:
    -c, --config <PATH>    Path to TOML configuration file
                           [default: config/sandbox.toml, defaults if missing]
        --tools            Print tool definitions as JSON and exit
    -h, --help             Print this help message and exit
    -V, --version          Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, code_sandbox=debug,warn)

EXAMPLES:
    echo '{{\"code\":\"console.log(1+1)\"}}' | code-sandbox
    code-sandbox -c /etc/sandbox.toml request.json
    RUST_LOG=debug code-sandbox request.json",
        env!("CARGO_PKG_VERSION"),
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    Help,
    Version,
    Tools(CliArgs),
    Run(CliArgs),
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    config_path: Option<String>,
    request_path: Option<String>,
}

fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut cli = CliArgs {
        config_path: None,
        request_path: None,
    };
    let mut tools = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            "--tools" => tools = true,
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("{arg} requires a path"))?;
                cli.config_path = Some(path);
            }
            other if other.starts_with('-') && other != "-" => bail!("Unknown option: {other}"),
            other => {
                if cli.request_path.is_some() {
                    bail!("Unexpected argument: {other}");
                }
                cli.request_path = Some(other.to_string());
            }
        }
    }

    Ok(if tools {
        Command::Tools(cli)
    } else {
        Command::Run(cli)
    })
}

/// An explicit path must exist; the default one may be absent.
fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(path)
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from {DEFAULT_CONFIG_PATH}");
            Config::load(DEFAULT_CONFIG_PATH)
        }
        None => {
            info!("No {DEFAULT_CONFIG_PATH}, using defaults");
            Ok(Config::default())
        }
    }
}

async fn read_request(path: Option<&str>) -> Result<Value> {
    let raw = match path {
        Some(path) if path != "-" => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {path}"))?,
        _ => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Failed to read stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw).context("Request is not valid JSON")
}

/// Exit status for a batch: 0 only if every call succeeded.
fn exit_status(results: &[ExecutionResult]) -> i32 {
    if !results.is_empty() && results.iter().all(|r| r.success) {
        0
    } else {
        1
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    let (cli, tools_only) = match parse_args(std::env::args().skip(1))? {
        Command::Version => {
            println!("code-sandbox v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Tools(cli) => (cli, true),
        Command::Run(cli) => (cli, false),
    };

    // Stdout carries the result document only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("code_sandbox=info")),
        )
        .init();

    let config = load_config(cli.config_path.as_deref())?;
    info!("Sandbox: {}", config.sandbox.description());

    let code = CodeSkill::new(&config);
    let mut skills = SkillRegistry::new();
    skills.register(Box::new(code.clone()));
    info!(
        "Skills: {} registered ({} allow-listed packages)",
        skills.len(),
        code.allowed_packages().len()
    );

    if tools_only {
        println!("{}", serde_json::to_string_pretty(&skills.tool_definitions())?);
        return Ok(());
    }

    let request = read_request(cli.request_path.as_deref()).await?;

    // One signal listener shared by every in-flight call
    let shutdown = shutdown_signal().boxed().shared();

    let (output, results) = match request {
        Value::Array(calls) => {
            info!("Running {} requests concurrently", calls.len());
            let results = join_all(
                calls
                    .into_iter()
                    .map(|params| code.run_until(params, shutdown.clone())),
            )
            .await;
            (serde_json::to_value(&results)?, results)
        }
        params => {
            let result = code.run_until(params, shutdown.clone()).await;
            (serde_json::to_value(&result)?, vec![result])
        }
    };

    if shutdown.peek().is_some() {
        warn!("Shutdown signal received, sweeping instances");
        code.executor().shutdown().await;
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    std::process::exit(exit_status(&results));
}

//! storefront-client -- command-line access to the storefront pipeline.
//!
//! Loads configuration, wires the HTTP pipeline against the persisted
//! session, runs one command and prints its JSON result on stdout.

use std::path::PathBuf;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use storefront_client::config::Config;
use storefront_client::{Failure, Operation, Pipeline, TokenEventBus, Variables};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Submit {
        name: String,
        variables: Variables,
        public: bool,
        mutation: bool,
        network_only: bool,
    },
    Login {
        variables: Variables,
    },
    Logout,
    Status,
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

enum Parsed {
    Run(CliArgs),
    Help,
    Version,
}

fn parse_args<I>(args: I) -> Result<Parsed, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut command: Option<String> = None;
    let mut name = None;
    let mut variables = Variables::new();
    let mut public = false;
    let mut mutation = false;
    let mut network_only = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--config requires a path argument".to_string())?;
                config_path = Some(PathBuf::from(path));
            }
            "--var" | "--json-var" => {
                let pair = args
                    .next()
                    .ok_or_else(|| format!("{arg} requires a key=value argument"))?;
                let (key, value) = parse_var(&pair, arg == "--json-var")?;
                variables.insert(key, value);
            }
            "--public" => public = true,
            "--mutation" => mutation = true,
            "--network-only" => network_only = true,
            "--help" | "-h" => return Ok(Parsed::Help),
            "--version" | "-V" => return Ok(Parsed::Version),
            other if other.starts_with('-') => {
                return Err(format!("Unknown argument: {other}"));
            }
            other => {
                if command.is_none() {
                    command = Some(other.to_string());
                } else if name.is_none() {
                    name = Some(other.to_string());
                } else {
                    return Err(format!("Unexpected argument: {other}"));
                }
            }
        }
    }

    let command = match command.as_deref() {
        Some("submit") => Command::Submit {
            name: name.ok_or_else(|| "submit requires an operation name".to_string())?,
            variables,
            public,
            mutation,
            network_only,
        },
        Some("login") => Command::Login { variables },
        Some("logout") => Command::Logout,
        Some("status") => Command::Status,
        Some(other) => return Err(format!("Unknown command: {other}")),
        None => return Err("No command given".to_string()),
    };

    Ok(Parsed::Run(CliArgs {
        config_path,
        command,
    }))
}

/// `key=value`. Plain values stay strings, so `provinceId=79` matches the
/// typed operations' string ids; `true`, `false` and `null` are literals.
/// With `json` the value must be a JSON document (`page=2`, `ids=["a"]`).
fn parse_var(raw: &str, json: bool) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("Empty variable name in '{raw}'"));
    }
    let value = if json {
        serde_json::from_str(value).map_err(|e| format!("Invalid JSON for '{key}': {e}"))?
    } else {
        match value {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            other => Value::String(other.to_string()),
        }
    };
    Ok((key.to_string(), value))
}

fn print_usage() {
    println!(
        "\
storefront-client {version} -- storefront data-access pipeline

USAGE:
    storefront-client [OPTIONS] <COMMAND>

COMMANDS:
    submit <NAME>          Submit an operation and print its data
    login                  Sign in with the login operation (use --var)
    logout                 Clear the stored session
    status                 Show the stored session state

OPTIONS:
    -c, --config <PATH>    Path to configuration file
        --var <KEY=VALUE>  Operation variable, kept as a string (repeatable)
        --json-var <KEY=JSON>
                           Operation variable parsed as JSON (repeatable)
        --public           Do not attach a credential
        --mutation         Submit as a mutation (never cached)
        --network-only     Skip the cache read
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    STOREFRONT_CONFIG      Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(Parsed::Run(cli)) => cli,
        Ok(Parsed::Help) => {
            print_usage();
            return Ok(());
        }
        Ok(Parsed::Version) => {
            println!("storefront-client {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(msg) => {
            eprintln!("Error: {msg}");
            eprintln!("Run with --help for usage information.");
            std::process::exit(2);
        }
    };

    let config_path = cli
        .config_path
        .or_else(|| std::env::var("STOREFRONT_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::debug!(
        config = %config_path.display(),
        endpoint = %config.transport.endpoint,
        overrides = config.env_overrides.all().len(),
        "Configuration loaded"
    );

    let pipeline = Pipeline::from_config(&config, TokenEventBus::new())?;

    let result = match cli.command {
        Command::Submit {
            name,
            variables,
            public,
            mutation,
            network_only,
        } => {
            let mut op = if mutation {
                Operation::mutation(name)
            } else {
                Operation::query(name)
            }
            .with_variables(variables);
            if public {
                op = op.public();
            }
            if network_only {
                op = op.with_fetch_policy(storefront_client::FetchPolicy::NetworkOnly);
            }
            submit_interruptible(&pipeline, op).await
        }
        Command::Login { variables } => pipeline
            .sign_in(variables)
            .await
            .and_then(|_| pipeline.session_status())
            .and_then(|status| serde_json::to_value(status).map_err(Failure::from)),
        Command::Logout => pipeline
            .sign_out()
            .map(|()| serde_json::json!({"signed_out": true})),
        Command::Status => pipeline
            .session_status()
            .and_then(|status| serde_json::to_value(status).map_err(Failure::from)),
    };

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(failure) => {
            tracing::debug!(kind = failure.kind(), error = %failure, "Command failed");
            eprintln!("{}", failure.user_message());
            let body = serde_json::json!({
                "error": failure.kind(),
                "message": failure.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
    }
}

/// Submit `op`, abandoning it on Ctrl+C.
async fn submit_interruptible(pipeline: &Pipeline, op: Operation) -> Result<Value, Failure> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT (Ctrl+C)");
            trigger.cancel();
        }
    });

    let result = pipeline.submit_cancellable(op, cancel).await;
    watcher.abort();
    result
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration. Logs go to stderr so
/// stdout stays machine-readable.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("storefront_client={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

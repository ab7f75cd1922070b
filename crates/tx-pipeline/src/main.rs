use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use sol_rpc::{ClientCache, Cluster};
use tokio::io::AsyncReadExt;
use tracing::{error, warn};
use tx_pipeline::{logging, PipelineConfig, PipelineError, Tools};

/// Compile, sign, send and inspect Solana transactions.
#[derive(Parser, Debug)]
#[command(name = "tx-pipeline", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "TX_PIPELINE_CONFIG", default_value = "tx-pipeline.toml")]
    config: PathBuf,

    /// Cluster name or RPC URL; overrides the configured default.
    #[arg(long, env = "TX_PIPELINE_CLUSTER")]
    cluster: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile instructions into an unsigned transaction.
    Compile(RequestArgs),
    /// Add signatures to a transaction.
    Sign(RequestArgs),
    /// Submit a signed transaction.
    Send(RequestArgs),
    /// Look up a transaction by signature.
    Status(RequestArgs),
}

impl Command {
    fn split(&self) -> (&'static str, &RequestArgs) {
        match self {
            Command::Compile(args) => ("compile", args),
            Command::Sign(args) => ("sign", args),
            Command::Send(args) => ("send", args),
            Command::Status(args) => ("status", args),
        }
    }
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// JSON request file, or `-` for stdin.
    #[arg(long, short, default_value = "-")]
    input: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tools = match setup(&cli) {
        Ok(tools) => tools,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(2);
        }
    };

    let (tool, args) = cli.command.split();
    let result = match read_request(&args.input).await {
        Ok(request) => tools.dispatch(tool, request).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(response) => {
            println!("{}", pretty(&response));
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(tool, code = err.code(), "{err}");
            println!("{}", pretty(&err.to_client_json()));
            ExitCode::FAILURE
        }
    }
}

fn setup(cli: &Cli) -> anyhow::Result<Tools> {
    let config_exists = cli.config.exists();
    let mut config = if config_exists {
        PipelineConfig::from_file(&cli.config)?
    } else {
        PipelineConfig::default()
    };

    logging::init(&config.logging).context("failed to initialise logging")?;
    if !config_exists {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    if let Some(name) = &cli.cluster {
        config.cluster = name.parse::<Cluster>().map_err(anyhow::Error::msg)?;
    }

    Ok(Tools::new(config, Arc::new(ClientCache::new())))
}

async fn read_request(input: &str) -> Result<Value, PipelineError> {
    let raw = if input == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .map_err(|e| PipelineError::Validation(format!("read stdin: {e}")))?;
        buf
    } else {
        tokio::fs::read_to_string(input)
            .await
            .map_err(|e| PipelineError::Validation(format!("read {input}: {e}")))?
    };

    serde_json::from_str(&raw).map_err(|e| {
        PipelineError::Validation(format!(
            "request is not valid JSON (line {}, column {})",
            e.line(),
            e.column()
        ))
    })
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

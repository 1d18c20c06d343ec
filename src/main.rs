use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sf_bucket_export::trigger::{self, event, FunctionParams, HttpTrigger, Invocation};
use sf_bucket_export::{AppConfig, AppContext, AppError};

#[derive(Parser, Debug)]
#[command(author, version, about = "Export Salesforce records to a storage bucket as CSV")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP trigger (default).
    Serve {
        /// Overrides PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one export in the foreground and print the result.
    Run {
        /// Registered function name.
        #[arg(long = "fn", default_value = trigger::functions::OPP_HISTORY)]
        function: String,
        /// Source object, for `exportObject`.
        #[arg(long)]
        object: Option<String>,
        /// Target bucket; defaults to BUCKET_NAME.
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Handle one event payload (argument or stdin); the outcome is only logged.
    Event {
        /// JSON payload. Read from stdin when omitted.
        payload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli.command.unwrap_or(Command::Serve { port: None })).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e.response_text());
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    info!(
        "Exporting {} to bucket {} in project {}",
        config.export.object_name, config.storage.bucket_name, config.storage.project_id
    );

    match command {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.port);
            let ctx = Arc::new(AppContext::new(config)?);
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            HttpTrigger::bind(addr, ctx).await?.serve().await
        }
        Command::Run {
            function,
            object,
            bucket,
        } => {
            let ctx = AppContext::new(config)?;
            let invocation = Invocation::new(
                function,
                FunctionParams {
                    bucket_name: bucket,
                    object_name: object,
                },
            );
            let message = trigger::invoke(&ctx, &invocation).await?;
            println!("{}", message);
            Ok(())
        }
        Command::Event { payload } => {
            let raw = match payload {
                Some(raw) => raw,
                None => {
                    let mut raw = String::new();
                    std::io::stdin().read_to_string(&mut raw)?;
                    raw
                }
            };
            let payload = if raw.trim().is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| AppError::Config(format!("invalid event payload: {}", e)))?
            };

            let ctx = Arc::new(AppContext::new(config)?);
            // The outcome is logged by the task; waiting only keeps the process alive.
            event::dispatch(ctx, payload)
                .await
                .map_err(|e| AppError::Internal(format!("event task aborted: {}", e)))
        }
    }
}

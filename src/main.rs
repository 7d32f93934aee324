use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use text2sql_engine::config::{resolve_config_path, AppConfig};
use text2sql_engine::{AskRequest, Orchestrator};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "text2sql")]
#[command(about = "Ask a database questions in plain language, behind SQL guardrails")]
struct Args {
    /// Path to the YAML config (default: $TEXT2SQL_CONFIG or ./config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question
    Ask {
        /// The question in natural language
        question: String,

        /// Database key from the config
        #[arg(short, long)]
        db: String,

        /// Optional schema/tables/columns context
        #[arg(long, default_value = "")]
        schema_hint: String,
    },
    /// Print aggregate interaction counters
    Stats,
    /// List configured databases
    Schemas,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => resolve_config_path()?,
    };
    let config = AppConfig::load(&config_path)?;
    let orchestrator = Orchestrator::from_config(&config)?;

    match args.command {
        Command::Ask {
            question,
            db,
            schema_hint,
        } => {
            let request = AskRequest {
                user_text: question,
                db_key: db,
                schema_hint,
            };
            match orchestrator.handle(&request).await {
                Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                Err(e) => {
                    error!("Request failed at {} stage: {}", e.stage(), e);
                    std::process::exit(1);
                }
            }
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.stats().await?)?);
        }
        Command::Schemas => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "databases": orchestrator.databases() }))?
            );
        }
    }

    Ok(())
}

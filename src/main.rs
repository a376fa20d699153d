//! LLM Dispatch - command-line client for a local inference server
//!
//! Sends validated chat turns and keeps every exchange in a local
//! conversation log.

use clap::{Parser, Subcommand};
use llm_dispatch::{
    Database, DispatchConfig, Dispatcher, Endpoint, HttpTransport, LoggingTransport,
    PayloadBuilder, SchemaValidator,
};
use serde_json::Value;
use std::error::Error;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type AppDispatcher = Dispatcher<Database, LoggingTransport<HttpTransport>>;

#[derive(Parser)]
#[command(name = "llm-dispatch", version, about)]
struct Cli {
    /// Inference server as host:port (overrides LLM_DISPATCH_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<Endpoint>,

    /// Schema file (overrides LLM_DISPATCH_SCHEMA)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch a raw JSON payload from a file, or stdin when omitted
    Send { file: Option<PathBuf> },
    /// Send one user turn to a conversation
    Ask {
        conversation_id: String,
        text: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        system: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
    },
    /// Start a conversation and print its id
    New { title: String },
    /// List conversations, newest first
    List,
    /// Print a conversation's transcript
    Show { conversation_id: String },
    Rename {
        conversation_id: String,
        title: String,
    },
    /// List models loaded on the server
    Models,
    /// Print every logged exchange as JSON lines, newest first
    Log,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_dispatch=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let mut config = DispatchConfig::from_env();
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(schema) = cli.schema {
        config.schema_path = Some(schema);
    }

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let validator = match &config.schema_path {
        Some(path) => SchemaValidator::from_file(path)?,
        None => SchemaValidator::new()?,
    };
    tracing::info!(schema = %validator.source(), "Schema loaded");

    let transport = LoggingTransport::new(HttpTransport::new(config.connect_timeout)?);
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(validator), db.clone(), transport));

    execute(cli.command, &dispatcher, &db, &config).await
}

async fn execute(
    command: Command,
    dispatcher: &Arc<AppDispatcher>,
    db: &Database,
    config: &DispatchConfig,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Send { file } => {
            let payload = match file {
                Some(path) => std::fs::read_to_string(path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            run_dispatch(dispatcher, payload, config.endpoint.clone()).await?;
        }
        Command::Ask {
            conversation_id,
            text,
            model,
            system,
            tags,
        } => {
            let model = match model {
                Some(model) => model,
                None => resolve_model(dispatcher, db, &conversation_id, &config.endpoint).await?,
            };
            let mut builder = PayloadBuilder::new(model).conversation_id(&conversation_id);
            if let Some(system) = system {
                builder = builder.system(&system);
            }
            if let Some(tags) = tags {
                builder = builder.tags(&tags);
            }
            let payload = builder.user(&text).build()?;
            run_dispatch(dispatcher, payload, config.endpoint.clone()).await?;
        }
        Command::New { title } => {
            println!("{}", dispatcher.new_conversation(&title).await?);
        }
        Command::List => {
            for conversation in db.list_conversations()? {
                println!(
                    "{}\t{}\t{} records\t{}",
                    conversation.id,
                    conversation.title,
                    conversation.record_count,
                    conversation.created_at.to_rfc3339()
                );
            }
        }
        Command::Show { conversation_id } => {
            let conversation = db.get_conversation(&conversation_id)?;
            println!("# {}", conversation.title);
            let transcript = dispatcher.transcript(&conversation_id).await?;
            for message in &transcript.messages {
                println!("{message}");
            }
            for error in &transcript.errors {
                eprintln!("skipped {error}");
            }
        }
        Command::Rename {
            conversation_id,
            title,
        } => {
            db.rename_conversation(&conversation_id, &title)?;
        }
        Command::Models => {
            for model in dispatcher.list_models(&config.endpoint).await? {
                println!("{}", model.id);
            }
        }
        Command::Log => {
            for record in db.list_all_records()? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }

    Ok(())
}

/// Dispatch in the background, cancelling on Ctrl-C
async fn run_dispatch(
    dispatcher: &Arc<AppDispatcher>,
    payload: String,
    endpoint: Endpoint,
) -> Result<(), Box<dyn Error>> {
    let handle = dispatcher.spawn(payload, endpoint);

    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling dispatch");
            cancel.cancel();
        }
    });

    let outcome = handle.join().await;
    interrupt.abort();

    match outcome {
        Ok(response) => {
            println!("{response}");
            Ok(())
        }
        Err(e) => {
            // The server answered even though the log write failed
            if let Some(response) = e.response() {
                println!("{response}");
            }
            Err(e.into())
        }
    }
}

/// Model for an `ask` without `--model`: the conversation's last model,
/// else the first one the server reports
async fn resolve_model(
    dispatcher: &AppDispatcher,
    db: &Database,
    conversation_id: &str,
    endpoint: &Endpoint,
) -> Result<String, Box<dyn Error>> {
    let last_used = db
        .list_records(conversation_id)?
        .iter()
        .rev()
        .find_map(|record| {
            serde_json::from_str::<Value>(&record.request_payload)
                .ok()?
                .get("model")?
                .as_str()
                .map(String::from)
        });
    if let Some(model) = last_used {
        return Ok(model);
    }

    let models = dispatcher.list_models(endpoint).await?;
    models
        .into_iter()
        .next()
        .map(|m| m.id)
        .ok_or_else(|| "No model given and the server lists none".into())
}

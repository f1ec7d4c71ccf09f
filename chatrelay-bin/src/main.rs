use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chatrelay_core::{
    config::Config,
    error::CoreResult,
    handler::{HandlerOptions, HandlerParts, StreamResponseHandler},
    http_client::HttpClient,
    model::{ChannelEvent, MessageRef, MessageUpdate, StopEvent},
    platform::{ChannelEvents, ChatClient, StopBus},
    providers::openai::OpenAiAssistants,
    tools::{ToolRegistry, WebSearchTool},
    web_search::WebSearch,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "chatrelay CLI: relay an assistant run to the console",
    long_about = None
)]
struct Cli {
    /// Config file (JSON or TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the assistant and relay the streamed answer; Ctrl-C stops generation
    Ask {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, help = "Existing assistant id; one is created when omitted")]
        assistant_id: Option<String>,
    },
    /// Run a single web search and print the JSON result
    Search {
        #[arg(short, long)]
        query: String,
    },
}

/// Prints message updates and channel events instead of calling a chat backend.
struct Console;

#[async_trait]
impl ChatClient for Console {
    async fn partial_update_message(
        &self,
        message_id: &str,
        update: MessageUpdate,
    ) -> CoreResult<()> {
        match &update.set.error_detail {
            Some(detail) => eprintln!("[{message_id} error] {} ({detail})", update.set.text),
            None => println!("[{message_id}] {}", update.set.text),
        }
        io::stdout().flush().ok();
        Ok(())
    }
}

#[async_trait]
impl ChannelEvents for Console {
    async fn send_event(&self, event: ChannelEvent) -> CoreResult<()> {
        match event.ai_state {
            Some(state) => eprintln!("[{:?}: {:?}]", event.kind, state),
            None => eprintln!("[{:?}]", event.kind),
        }
        Ok(())
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("chatrelay={level},chatrelay_core={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    let http = HttpClient::from_cfg(&cfg.http)?;
    let search = WebSearch::from_config(&cfg.web_search, http.clone());
    if !search.is_configured() {
        tracing::warn!(env = %cfg.web_search.api_key_env, "web search api key not set");
    }

    match cli.command {
        Commands::Search { query } => {
            println!("{}", search.search(&query).await);
        }
        Commands::Ask {
            message,
            assistant_id,
        } => {
            let tools = ToolRegistry::new().with(Arc::new(WebSearchTool::new(search)));
            let assistant = Arc::new(OpenAiAssistants::from_config(&cfg.assistant, http)?);

            let assistant_id = match assistant_id.or_else(|| cfg.assistant.assistant_id.clone()) {
                Some(id) => id,
                None => {
                    let id = assistant
                        .create_assistant(
                            &cfg.assistant.model,
                            cfg.assistant.instructions.as_deref(),
                            tools.definitions(),
                        )
                        .await?;
                    tracing::info!(assistant_id = %id, "created assistant");
                    id
                }
            };

            let thread = assistant.create_thread().await?;
            assistant.create_message(&thread, &message).await?;
            let stream = assistant.stream_run(&thread, &assistant_id).await?;

            let target = MessageRef {
                id: format!("cli-{}", thread.id),
                cid: "cli:console".into(),
            };
            let stop_bus = StopBus::new();
            let console = Arc::new(Console);
            let handler = StreamResponseHandler::with_options(
                HandlerParts {
                    assistant,
                    thread,
                    stream,
                    chat: console.clone(),
                    stop_bus: stop_bus.clone(),
                    channel: console,
                    message: target.clone(),
                },
                HandlerOptions::from_config(&cfg.handler, tools),
                || tracing::debug!("handler released"),
            );

            let mut relay = tokio::spawn({
                let handler = handler.clone();
                async move { handler.run().await }
            });

            tokio::select! {
                res = &mut relay => res?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, stopping generation");
                    stop_bus.publish(StopEvent { message_id: target.id.clone() });
                    (&mut relay).await?;
                }
            }
            tracing::info!(
                phase = ?handler.phase(),
                chunks = handler.chunk_count(),
                "relay finished"
            );
        }
    }

    Ok(())
}

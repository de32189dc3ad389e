use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use waypoint_agent::strategy::{JourneyForm, CHAT_FINISHED};
use waypoint_agent::{Agent, RunParts, StepData};
use waypoint_core::config::AppConfig;
use waypoint_core::event::{EventKind, ReasoningCallEvent, ToolEvent};
use waypoint_core::types::Response;
use waypoint_gateway::{AppState, GatewayServer};

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Graph-based task orchestrator with streaming lifecycle events")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "waypoint.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve,
    /// Plan a journey described by a JSON form
    Plan {
        /// Path to the journey form (JSON)
        form: PathBuf,
        /// Research points of interest instead of running the tool-driven planner
        #[arg(long)]
        research: bool,
    },
    /// Run the chat strategy on a single prompt
    Chat {
        /// The prompt; read from stdin when empty
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("waypoint=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Completions need no config.
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "waypoint", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load(&cli.config)?;
    let llm = waypoint_llm::build_client(&config);
    let state = AppState::new(config.clone(), llm)?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Serve) | None => {
            let server = GatewayServer::new(state);
            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                on_signal.cancel();
            });
            server.run(shutdown).await?;
        }
        Some(Commands::Plan { form, research }) => {
            let form: JourneyForm = serde_json::from_str(&std::fs::read_to_string(&form)?)?;
            if research {
                let findings = drive(state.research_agent(), form).await?;
                println!("{}", serde_json::to_string_pretty(&findings)?);
            } else {
                let answer = drive(state.planner_agent(), form).await?;
                println!("{}", answer);
            }
        }
        Some(Commands::Chat { prompt }) => {
            let mut text = prompt.join(" ");
            if text.is_empty() {
                text = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            let answer = drive(state.chat_agent(), text).await?;
            if answer != CHAT_FINISHED {
                println!("{}", answer);
            }
        }
        // Handled before config loading.
        Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}

/// Run an agent to completion, echoing tool activity and assistant text to
/// stderr. Ctrl-C cancels the run.
async fn drive<I: StepData, O: StepData>(agent: Agent<I, O>, input: I) -> anyhow::Result<O> {
    let RunParts {
        run_id,
        mut events,
        cancel,
        outcome,
        ..
    } = agent.run(input)?.into_parts();

    let on_signal = cancel.clone();
    let signal = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        on_signal.cancel();
    });

    while let Some(event) = events.recv().await {
        let root = event.run_id == run_id;
        match &event.kind {
            EventKind::Tool(ToolEvent::Call { tool, .. }) => eprintln!("[tool: {}]", tool),
            EventKind::Tool(ToolEvent::CallResult { tool, result, .. }) => {
                eprintln!("[{}: ok] {}", tool, truncate(&result.to_string(), 200))
            }
            EventKind::Tool(
                ToolEvent::CallFailure { tool, error, .. }
                | ToolEvent::ValidationError { tool, error, .. },
            ) => eprintln!("[{}: ERROR] {}", tool, truncate(error, 200)),
            EventKind::ReasoningCall(ReasoningCallEvent::After { responses, .. }) if root => {
                for response in responses {
                    if let Response::Assistant { content } = response {
                        eprintln!("{}", content);
                    }
                }
            }
            _ => {}
        }
        if root && event.is_before_close() {
            break;
        }
    }
    io::stderr().flush().ok();
    signal.abort();

    Ok(outcome.wait().await?)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::Parser;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use cairn_core::application::agent::{Agent, AgentSettings, QueryRequest};
use cairn_core::application::tooling::{SessionManager, SessionMap, normalize_tool_listings};
use cairn_core::config::{AppConfig, ConfigError};
use cairn_core::domain::types::{ChatMessage, ContextFile, ToolSpec};
use cairn_core::infrastructure::model::{OllamaClient, TokenSink};

#[derive(Debug, Parser)]
#[command(name = "cairn", about = "Facility assistant with retrieval-grounded answers")]
struct Cli {
    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the model provider endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Override the refinement iteration budget
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Print answers only once complete instead of streaming tokens
    #[arg(long)]
    no_stream: bool,
}

/// Prints streamed answer fragments to stdout as they arrive.
struct StdoutSink;

impl TokenSink for StdoutSink {
    fn on_token(&self, fragment: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(fragment.as_bytes());
        let _ = stdout.flush();
    }
}

struct ReplState {
    history: Vec<ChatMessage>,
    files: Vec<ContextFile>,
    attachment_counter: u32,
}

impl ReplState {
    fn new() -> Self {
        Self {
            history: Vec::new(),
            files: Vec::new(),
            attachment_counter: 0,
        }
    }

    fn reset(&mut self) {
        self.history.clear();
        self.files.clear();
    }
}

enum LoopControl {
    Continue,
    Exit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();
    info!("Starting cairn");

    let config_path = cli.config.as_deref();
    let mut config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(ConfigError::NotFound { path }) if config_path.is_none() => {
            warn!(path = %path.display(), "no configuration file found, using defaults");
            AppConfig::default()
        }
        Err(err) => return Err(err.into()),
    };
    if let Some(endpoint) = cli.endpoint {
        info!(%endpoint, "overriding provider endpoint from CLI flag");
        config.provider.endpoint = endpoint;
    }
    let max_iterations = cli.max_iterations.unwrap_or(config.agent.max_iterations);

    let manager = SessionManager::new(config.servers.clone());
    let sessions = manager.connect().await;
    let listings = SessionManager::gather_listings(&sessions).await;
    let tools = normalize_tool_listings(&listings);
    info!(
        backends = sessions.len(),
        tools = tools.len(),
        "backend tools registered"
    );

    let provider = Arc::new(OllamaClient::new(
        config.provider.endpoint.clone(),
        Duration::from_secs(config.agent.model_timeout_secs),
    ));
    let agent = Agent::new(provider, AgentSettings::from_config(&config));

    run_repl(&agent, &sessions, &tools, max_iterations, cli.no_stream).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_repl(
    agent: &Agent<OllamaClient>,
    sessions: &SessionMap,
    tools: &BTreeMap<String, ToolSpec>,
    max_iterations: u32,
    no_stream: bool,
) -> io::Result<()> {
    let mut stdout = io::stdout();
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut state = ReplState::new();

    print_banner(&mut stdout).await?;

    loop {
        stdout.write_all(b"cairn> ").await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => {
                write_line(&mut stdout, "\nInput closed, exiting.").await?;
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            match handle_command(input, &mut state, tools, &mut stdout).await? {
                LoopControl::Continue => continue,
                LoopControl::Exit => break,
            }
        }

        debug!(query = input, "processing query");
        let request = QueryRequest {
            query: input.to_string(),
            available_tools: tools.clone(),
            sessions,
            max_iterations,
            history: state.history.clone(),
            context_files: state.files.clone(),
        };

        let sink = StdoutSink;
        let answer = if no_stream {
            agent.process_query(request, None).await
        } else {
            agent.process_query(request, Some(&sink)).await
        };

        if no_stream {
            write_line(&mut stdout, &answer).await?;
        } else {
            // Tokens were already streamed; terminate the line.
            write_line(&mut stdout, "").await?;
        }

        state.history.push(ChatMessage::user(input));
        state.history.push(ChatMessage::assistant(answer));
    }

    stdout.flush().await?;
    Ok(())
}

async fn handle_command(
    input: &str,
    state: &mut ReplState,
    tools: &BTreeMap<String, ToolSpec>,
    stdout: &mut io::Stdout,
) -> io::Result<LoopControl> {
    let mut parts = input.trim_start_matches('/').split_whitespace();
    let name = parts.next().unwrap_or("").to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    match name.as_str() {
        "help" | "?" => {
            print_help(stdout).await?;
        }
        "exit" | "quit" | "q" => {
            write_line(stdout, "Bye.").await?;
            return Ok(LoopControl::Exit);
        }
        "reset" => {
            state.reset();
            write_line(stdout, "History and attachments cleared.").await?;
        }
        "tools" => {
            if tools.is_empty() {
                write_line(stdout, "No backend tools available.").await?;
            } else {
                for (tool_name, spec) in tools {
                    write_line(stdout, &format!("  {} - {}", tool_name, spec.description))
                        .await?;
                }
            }
        }
        "files" => {
            if state.files.is_empty() {
                write_line(stdout, "No attached files.").await?;
            } else {
                for file in &state.files {
                    write_line(
                        stdout,
                        &format!("  {} ({:?}, {})", file.name, file.kind, file.mime_type),
                    )
                    .await?;
                }
            }
        }
        "attach" => match args.first() {
            Some(path) => match attach_file(state, Path::new(path)) {
                Ok(name) => write_line(stdout, &format!("Attached {name}.")).await?,
                Err(err) => write_line(stdout, &format!("Could not attach: {err}")).await?,
            },
            None => write_line(stdout, "Usage: /attach <path>").await?,
        },
        other => {
            write_line(
                stdout,
                &format!("Unknown command '{other}'. Use /help for the command list."),
            )
            .await?;
        }
    }

    Ok(LoopControl::Continue)
}

fn attach_file(state: &mut ReplState, path: &Path) -> Result<String, std::io::Error> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    state.attachment_counter += 1;
    let id = format!("file-{}", state.attachment_counter);

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let file = match extension.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" => {
            let bytes = std::fs::read(path)?;
            let mime = match extension.as_str() {
                "png" => "image/png",
                "gif" => "image/gif",
                "webp" => "image/webp",
                _ => "image/jpeg",
            };
            ContextFile::image(id, name.clone(), mime, Some(BASE64.encode(bytes)))
        }
        _ => {
            let text = std::fs::read_to_string(path)?;
            ContextFile::document(id, name.clone(), "text/plain", text)
        }
    };

    state.files.push(file);
    Ok(name)
}

async fn print_banner(stdout: &mut io::Stdout) -> io::Result<()> {
    write_line(stdout, "cairn interactive session ready.").await?;
    write_line(stdout, "Type a question and press Enter. Use /help for commands.").await?;
    Ok(())
}

async fn print_help(stdout: &mut io::Stdout) -> io::Result<()> {
    write_line(stdout, "\nAvailable commands:").await?;
    write_line(stdout, "  /help              Show this help").await?;
    write_line(stdout, "  /tools             List backend tools").await?;
    write_line(stdout, "  /attach <path>     Attach an image or text document").await?;
    write_line(stdout, "  /files             List attached files").await?;
    write_line(stdout, "  /reset             Clear history and attachments").await?;
    write_line(stdout, "  /exit              Quit").await?;
    Ok(())
}

async fn write_line(stdout: &mut io::Stdout, line: &str) -> io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    Ok(())
}

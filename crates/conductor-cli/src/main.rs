use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use conductor_core::config::Config;
use conductor_core::session_store::JsonSessionStore;
use conductor_gateway::GatewayState;
use conductor_providers::claude_code::ClaudeCodeClient;
use conductor_providers::credentials::ConfigCredentialStore;
use conductor_stream::StreamProtocol;
use conductor_stream::data_stream::parse_frame;
use conductor_stream::sse::parse_sse_stream;

#[derive(Parser)]
#[command(
    name = "conductor",
    about = "Coding-agent workflow gateway with streaming chat",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default from config, else 8787)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send a chat message to a running gateway and print the reply
    Run {
        /// Session id
        #[arg(short, long)]
        session: String,

        /// Message to send
        #[arg(short, long)]
        message: String,

        /// Stream protocol (v4 or v5)
        #[arg(long, default_value = "v5")]
        protocol: StreamProtocol,

        /// Gateway base URL
        #[arg(long, default_value = "http://127.0.0.1:8787")]
        url: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value by dotted path
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.as_ref();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug"
        } else {
            logging
                .and_then(|l| l.level.as_deref())
                .unwrap_or("info")
        };
        let mut directives = vec![level.to_string()];
        directives.extend(logging.map(|l| l.filters.clone()).unwrap_or_default());
        EnvFilter::new(directives.join(","))
    });

    let json = logging.is_some_and(|l| l.format == "json");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.port());
            let config = Arc::new(config);
            let sessions = Arc::new(JsonSessionStore::new(config.sessions_dir()));
            let llm = Arc::new(ClaudeCodeClient::from_config(&config));
            let credentials = Arc::new(ConfigCredentialStore::new(config.clone()));
            let state = Arc::new(GatewayState::new(config, sessions, llm, credentials)?);
            tracing::info!("Starting Conductor gateway on port {port}");
            conductor_gateway::start_gateway(state, port).await?;
        }
        Commands::Run {
            session,
            message,
            protocol,
            url,
        } => run_chat(&url, &session, &message, protocol).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    bail!("Config has {} error(s)", errors.len());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn run_chat(
    base: &str,
    session: &str,
    message: &str,
    protocol: StreamProtocol,
) -> anyhow::Result<()> {
    let url = format!(
        "{}/api/sessions/{session}/chat?protocol={protocol}",
        base.trim_end_matches('/')
    );
    let resp = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "messages": [{ "role": "user", "content": message }] }))
        .send()
        .await
        .with_context(|| format!("Failed to reach gateway at {base}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let reason = body["error"].as_str().unwrap_or("no details");
        bail!("Gateway returned {status}: {reason}");
    }

    match protocol {
        StreamProtocol::UiMessage => print_ui_stream(resp).await?,
        StreamProtocol::DataStream => print_data_stream(resp).await?,
    }
    println!();
    Ok(())
}

async fn print_ui_stream(resp: reqwest::Response) -> anyhow::Result<()> {
    let mut events = Box::pin(parse_sse_stream(resp.bytes_stream()));
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        let event = event?;
        if event.data == "[DONE]" {
            break;
        }
        let chunk: Value = match serde_json::from_str(&event.data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(%e, "Skipping malformed chunk");
                continue;
            }
        };
        match chunk["type"].as_str().unwrap_or_default() {
            "text-delta" => {
                print!("{}", chunk["delta"].as_str().unwrap_or_default());
                stdout.flush()?;
            }
            "tool-input-available" => {
                tracing::info!(tool = %chunk["toolName"], "Tool call");
            }
            "error" => eprintln!("\nerror: {}", chunk["errorText"].as_str().unwrap_or_default()),
            "finish" => tracing::debug!(?chunk, "Stream finished"),
            other => tracing::debug!(chunk_type = other, "Chunk"),
        }
    }
    Ok(())
}

async fn print_data_stream(resp: reqwest::Response) -> anyhow::Result<()> {
    let mut bytes = resp.bytes_stream();
    let mut buffer = Vec::new();
    let mut stdout = std::io::stdout();
    while let Some(chunk) = bytes.next().await {
        buffer.extend_from_slice(&chunk?);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some((code, body)) = parse_frame(&line) else {
                tracing::warn!(line = %line.trim_end(), "Skipping malformed frame");
                continue;
            };
            match code {
                '9' if body["toolName"] == "text" => {
                    print!("{}", body["args"]["text"].as_str().unwrap_or_default());
                    stdout.flush()?;
                }
                '9' => tracing::info!(tool = %body["toolName"], "Tool call"),
                '3' => eprintln!("\nerror: {}", body.as_str().unwrap_or_default()),
                'd' => {
                    tracing::debug!(?body, "Stream finished");
                    return Ok(());
                }
                other => tracing::debug!(prefix = %other, "Frame"),
            }
        }
    }
    Ok(())
}

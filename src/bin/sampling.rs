//! Sampling protocol CLI binary.
//!
//! # Commands
//!
//! - `server` - Start the initiator HTTP server
//! - `client` - Connect as a responder and answer sampling requests
//! - `analyze` - Ask a running server to analyze a file through a client
//! - `files` - List files available for analysis
//! - `sample` - Push an ad-hoc sampling request to a session

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sampling::{
    config::Config,
    responder::{AnthropicHandler, MockHandler, SamplingClient, SamplingHandler},
    server::{
        shutdown_signal, AnalyzeFileResponse, ErrorResponse, FilesResponse, Server,
    },
    Capabilities, SamplingResult, VERSION,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "sampling")]
#[command(version = VERSION)]
#[command(about = "Bidirectional sampling protocol - server-initiated LLM requests", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/sampling/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the initiator HTTP server
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Bind to all interfaces (0.0.0.0)
        #[arg(long)]
        bind_all: bool,

        /// Directory offered to the analysis tool
        #[arg(short, long)]
        files_dir: Option<PathBuf>,

        /// Default sampling timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Connect as a responder and answer sampling requests
    Client {
        /// Initiator base URL
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Answer with the built-in mock handler instead of Anthropic
        #[arg(long)]
        mock: bool,

        /// Anthropic model
        #[arg(short, long)]
        model: Option<String>,

        /// Implementation name announced in HELLO
        #[arg(long)]
        name: Option<String>,
    },

    /// Analyze a file through a connected sampling client
    Analyze {
        /// File name under the server's files directory
        filename: String,

        /// Analysis type (summarize, explain, analyze, extract_key_points)
        #[arg(short, long, default_value = "summarize")]
        analysis_type: String,

        /// Custom instruction replacing the analysis prompt
        #[arg(short, long)]
        prompt: Option<String>,

        /// Session to use (default: first sampling-capable session)
        #[arg(short, long)]
        session: Option<String>,

        /// Initiator base URL
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// List files available for analysis
    Files {
        /// Initiator base URL
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Push a text sampling request to a session
    Sample {
        /// Session id
        session: String,

        /// Prompt text
        text: String,

        /// System prompt
        #[arg(long)]
        system: Option<String>,

        /// Maximum output tokens
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Temperature in [0, 1]
        #[arg(long)]
        temperature: Option<f32>,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Initiator base URL
        #[arg(short, long)]
        endpoint: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Server {
            port,
            host,
            bind_all,
            files_dir,
            timeout,
        } => runtime.block_on(cmd_server(config, port, host, bind_all, files_dir, timeout)),
        Commands::Client {
            endpoint,
            mock,
            model,
            name,
        } => runtime.block_on(cmd_client(config, endpoint, mock, model, name)),
        Commands::Analyze {
            filename,
            analysis_type,
            prompt,
            session,
            endpoint,
        } => runtime.block_on(cmd_analyze(
            endpoint.unwrap_or(config.client.endpoint),
            filename,
            analysis_type,
            prompt,
            session,
        )),
        Commands::Files { endpoint } => {
            runtime.block_on(cmd_files(endpoint.unwrap_or(config.client.endpoint)))
        },
        Commands::Sample {
            session,
            text,
            system,
            max_tokens,
            temperature,
            timeout,
            endpoint,
        } => runtime.block_on(cmd_sample(
            endpoint.unwrap_or(config.client.endpoint),
            session,
            text,
            system,
            max_tokens,
            temperature,
            timeout,
        )),
    }
}

async fn cmd_server(
    config: Config,
    port: Option<u16>,
    host: Option<String>,
    bind_all: bool,
    files_dir: Option<PathBuf>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let mut section = config.server;
    if let Some(port) = port {
        section.port = port;
    }
    if let Some(host) = host {
        section.host = host;
    }
    if let Some(dir) = files_dir {
        section.files_dir = dir;
    }
    if let Some(secs) = timeout {
        section.sampling_timeout_secs = secs;
    }

    let mut server_config = section.to_server_config()?;
    if bind_all {
        server_config = server_config.bind_all();
    }

    tracing::info!("Starting sampling server v{VERSION} on {}", server_config.addr);
    tracing::info!("Files directory: {}", server_config.files_dir.display());
    Server::new(server_config).run().await?;
    Ok(())
}

async fn cmd_client(
    config: Config,
    endpoint: Option<String>,
    mock: bool,
    model: Option<String>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let endpoint = endpoint.unwrap_or(config.client.endpoint);
    let name = name.unwrap_or(config.client.name);

    let handler: Arc<dyn SamplingHandler> = if mock {
        Arc::new(MockHandler::new())
    } else {
        let handler = AnthropicHandler::from_env()
            .context("set ANTHROPIC_API_KEY or pass --mock")?
            .with_base_url(&config.client.anthropic_url)
            .with_model(&model.unwrap_or(config.client.model));
        Arc::new(handler)
    };
    tracing::info!(handler = handler.name(), %endpoint, "Connecting");

    let caps = Capabilities::responder(&name).with_sampling_push(true);
    let client = SamplingClient::connect(&endpoint, caps, handler).await?;
    tracing::info!(session = %client.session_id(), "Session established, waiting for requests");

    tokio::select! {
        summary = client.listen() => {
            let summary = summary?;
            tracing::info!(
                frames = summary.frames,
                dispatched = summary.dispatched,
                malformed = summary.malformed,
                "Push stream ended"
            );
        }
        () = shutdown_signal() => {
            tracing::info!("Interrupted");
        }
    }

    client.listener().wait_idle(Duration::from_secs(5)).await;
    client.close().await?;
    Ok(())
}

async fn cmd_analyze(
    endpoint: String,
    filename: String,
    analysis_type: String,
    prompt: Option<String>,
    session: Option<String>,
) -> anyhow::Result<()> {
    let body = json!({
        "filename": filename,
        "analysis_type": analysis_type,
        "custom_prompt": prompt,
        "session_id": session,
    });
    let response: AnalyzeFileResponse =
        post_json(&format!("{endpoint}/tools/analyze_file"), &body).await?;
    println!("{}", response.report);
    Ok(())
}

async fn cmd_sample(
    endpoint: String,
    session: String,
    text: String,
    system: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let body = json!({
        "content": { "type": "text", "text": text },
        "systemPrompt": system,
        "maxTokens": max_tokens,
        "temperature": temperature,
        "timeoutSecs": timeout,
    });
    let result: SamplingResult =
        post_json(&format!("{endpoint}/session/{session}/sample"), &body).await?;
    println!("{}", result.content);
    eprintln!("model: {}, stop: {:?}", result.model, result.stop_reason);
    Ok(())
}

async fn cmd_files(endpoint: String) -> anyhow::Result<()> {
    let response = reqwest::get(format!("{endpoint}/tools/files")).await?;
    let listing: FilesResponse = decode(response).await?;

    println!("Files in {}:", listing.directory);
    if listing.files.is_empty() {
        println!("  (none)");
    }
    for file in listing.files {
        println!("  {:<32} {:>10}  {}", file.name, file.size, file.mime_type);
    }
    Ok(())
}

async fn post_json<T: serde::de::DeserializeOwned>(
    url: &str,
    body: &serde_json::Value,
) -> anyhow::Result<T> {
    let response = reqwest::Client::new().post(url).json(body).send().await?;
    decode(response).await
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    match response.json::<ErrorResponse>().await {
        Ok(err) => bail!("{status}: {} ({})", err.error, err.kind),
        Err(_) => bail!("request failed with {status}"),
    }
}

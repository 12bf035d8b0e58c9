mod ask;
mod chat;
mod client;
mod error;
mod protocol;
mod server;
mod session;
mod sse;
mod tools;
mod ui;

use clap::{Parser, Subcommand};
use client::{AgUiClient, ClientConfig};
use server::ServerConfig;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agui-chat", version, about = "Chat with an AG-UI event-stream server")]
struct Cli {
    /// Base URL of the AG-UI server.
    #[arg(long, env = "AGUI_URL", default_value = "http://127.0.0.1:8001", global = true)]
    url: String,

    /// Give up on an exchange after this many seconds.
    #[arg(long, env = "AGUI_TIMEOUT_SECS", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive terminal chat (default).
    Chat {
        /// Where to write logs while the terminal UI is active.
        #[arg(long, env = "AGUI_LOG_FILE")]
        log_file: Option<PathBuf>,
    },
    /// Send one prompt and stream the reply to stdout.
    Ask { prompt: String },
    /// Run the bundled demo AG-UI server.
    Serve {
        #[arg(long, env = "AGUI_LISTEN", default_value = "127.0.0.1:8001")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let connect = || {
        AgUiClient::new(ClientConfig {
            base_url: cli.url.clone(),
            timeout: cli.timeout_secs.map(Duration::from_secs),
        })
    };

    match cli.command.unwrap_or(Command::Chat { log_file: None }) {
        Command::Chat { log_file } => {
            let log_file = log_file.unwrap_or_else(|| std::env::temp_dir().join("agui-chat.log"));
            init_logging(Some(&log_file))?;
            let client = connect()?;
            tracing::info!(url = client.base_url(), "starting chat");
            ui::run_tui(client)?;
        }
        Command::Ask { prompt } => {
            init_logging(None)?;
            ask::run(connect()?, prompt).await?;
        }
        Command::Serve { listen } => {
            init_logging(None)?;
            server::run(ServerConfig { listen }).await?;
        }
    }

    Ok(())
}

fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "agui_chat=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer().with_writer(io::stderr)).init(),
    }
    Ok(())
}

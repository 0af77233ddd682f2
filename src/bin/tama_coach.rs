//! Terminal host for the tama coach.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tama::audio::{AudioSink, CpalBackend, CpalSpeaker, MicResolver, NullSink};
use tama::link::WebSocketService;
use tama::overlay::BroadcastOverlay;
use tama::platform::HeadlessDesktop;
use tama::{CoachConfig, Collaborators, SessionCommand, SessionEvent, SessionHandle, SessionOrchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Tama: a desktop productivity coach.
#[derive(Parser)]
#[command(name = "tama-coach", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coach and read commands from stdin.
    Run {
        /// Start a monitored work session right away.
        #[arg(long, conflicts_with = "chat")]
        work: bool,
        /// Start a casual chat right away.
        #[arg(long)]
        chat: bool,
    },

    /// List compatible microphones.
    Devices,

    /// Print the default configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run {
        work: false,
        chat: false,
    }) {
        Command::Run { work, chat } => run(config, work, chat).await,
        Command::Devices => list_devices(&config),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&CoachConfig::default())?);
            Ok(())
        }
    }
}

/// Log to stderr and to a daily file under the local data directory.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tama=info,tungstenite=warn"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = dirs::data_local_dir().map(|dir| dir.join("tama").join("logs"));
    let Some(log_dir) = log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return None;
    };

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "tama.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Some(guard)
}

/// Explicit path, then the default path if it exists, then built-in defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<CoachConfig> {
    if let Some(path) = path {
        return Ok(CoachConfig::from_file(path)?);
    }
    let default = CoachConfig::default_config_path();
    if default.exists() {
        info!("loading config from {}", default.display());
        return Ok(CoachConfig::from_file(&default)?);
    }
    Ok(CoachConfig::default())
}

fn list_devices(config: &CoachConfig) -> anyhow::Result<()> {
    let resolver = MicResolver::new(Arc::new(CpalBackend::new()), &config.audio);
    let mics = resolver.refresh()?;
    if mics.is_empty() {
        println!("No compatible microphones found.");
        return Ok(());
    }
    println!("Microphones:");
    for mic in mics {
        println!("  [{}] {}", mic.index, mic.name);
    }
    Ok(())
}

async fn run(config: CoachConfig, work: bool, chat: bool) -> anyhow::Result<()> {
    println!("Tama v{}", env!("CARGO_PKG_VERSION"));

    let speaker: Arc<dyn AudioSink> = match CpalSpeaker::open(config.audio.receive_sample_rate) {
        Ok(speaker) => Arc::new(speaker),
        Err(e) => {
            warn!("no audio output, responses will be silent: {e}");
            Arc::new(NullSink)
        }
    };
    let desktop = Arc::new(HeadlessDesktop);
    let collab = Collaborators {
        service: Arc::new(WebSocketService::new(config.link.url.clone())),
        windows: desktop.clone(),
        screen: desktop,
        mics: Arc::new(MicResolver::new(Arc::new(CpalBackend::new()), &config.audio)),
        speaker,
        overlay: Arc::new(BroadcastOverlay::new(64)),
    };

    let (orchestrator, handle) = SessionOrchestrator::new(config, collab);

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            ctrl_c.shutdown();
        }
    });

    tokio::spawn(print_events(handle.subscribe()));
    tokio::spawn(read_commands(handle.clone()));

    if work {
        handle.send(SessionCommand::StartWork)?;
    } else if chat {
        handle.send(SessionCommand::StartChat)?;
    }

    println!("\nCommands: work | chat | stop | mic <n|auto> | mics | break accept|refuse | status | quit\n");

    orchestrator.run().await?;
    Ok(())
}

async fn read_commands(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            [] => continue,
            ["quit" | "exit"] => {
                handle.shutdown();
                break;
            }
            ["status"] => {
                println!("{:?}", handle.snapshot());
                continue;
            }
            ["work"] => SessionCommand::StartWork,
            ["chat"] => SessionCommand::StartChat,
            ["stop"] => SessionCommand::Stop,
            ["mics"] => SessionCommand::RefreshMics,
            ["mic", "auto"] => SessionCommand::SelectMic(None),
            ["mic", n] => match n.parse() {
                Ok(index) => SessionCommand::SelectMic(Some(index)),
                Err(_) => {
                    println!("usage: mic <index|auto>");
                    continue;
                }
            },
            ["break", "accept"] => SessionCommand::AcceptBreak,
            ["break", "refuse"] => SessionCommand::RefuseBreak,
            _ => {
                println!("unknown command: {line}");
                continue;
            }
        };
        if handle.send(command).is_err() {
            break;
        }
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(SessionEvent::Transcript { source, text }) => println!("{source:?}: {text}"),
            Ok(SessionEvent::Microphones(mics)) => {
                for mic in mics {
                    println!("  [{}] {}", mic.index, mic.name);
                }
            }
            Ok(event) => println!("> {event:?}"),
            Err(RecvError::Lagged(n)) => warn!("event printer lagged by {n}"),
            Err(RecvError::Closed) => break,
        }
    }
}

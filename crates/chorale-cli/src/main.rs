//! Chorale CLI
//!
//! Entry point for running and talking to the Chorale session daemon:
//! - `daemon`: run the daemon in the foreground
//! - `status`, `sessions`, `shutdown`: operations tooling over the control role
//! - `watch`: mirror a session in the terminal as a viewer
//! - `present`: drive a session as its operator from a content file
//! - `codes`: offline slide codes and arrangement playback for a content file

mod command;
mod render;

use std::path::{Path, PathBuf};
use std::process::{Command as Process, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chorale_core::{Change, Content, Delta, DisplayMode, Mutation, SessionSnapshot, now_millis};
use chorale_rpc::{ClientRole, CloseReason, JoinStatus, RpcClient, ServerEvent, socket_path};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use crate::command::Command;

const WATCH_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Find a binary, preferring the one next to this executable (dev builds)
fn find_binary(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(name);
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(name)
}

/// Chorale CLI
#[derive(Parser)]
#[command(name = "chorale")]
#[command(about = "Chorale - live presentation sessions mirrored to every display")]
#[command(version)]
#[command(after_help = "\
Examples:
  chorale daemon                      Run the daemon in the foreground
  chorale status                      Check daemon status
  chorale sessions                    List live sessions
  chorale present 4821 song.json      Drive session 4821 (created if needed)
  chorale watch 4821                  Mirror session 4821 in this terminal
  chorale codes song.json             Print slide codes for a content file
")]
struct Cli {
    /// Daemon socket (defaults to `$XDG_RUNTIME_DIR/chorale.sock`)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon {
        /// Also listen on this TCP address, e.g. `0.0.0.0:7777`
        #[arg(long, value_name = "ADDR")]
        tcp: Option<String>,
    },

    /// Show daemon status
    Status,

    /// List live sessions
    Sessions,

    /// Shut the daemon down
    Shutdown,

    /// Mirror a session as a viewer, waiting for it to start if needed
    Watch {
        /// Session PIN
        pin: String,
    },

    /// Drive a session as its operator; commands are read from stdin
    Present {
        /// Session PIN, created if nobody is broadcasting on it
        pin: String,
        /// Content JSON file (song, Bible passage, prayer or presentation)
        content: PathBuf,
    },

    /// Print slide codes, presentation units and arrangement order offline
    Codes {
        /// Content JSON file
        content: PathBuf,
        /// Display mode used to group slides
        #[arg(long, default_value = "bilingual")]
        mode: DisplayMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(socket_path);

    match cli.command {
        Commands::Daemon { tcp } => run_daemon(&socket, tcp.as_deref()),
        Commands::Status => run_status(&socket).await,
        Commands::Sessions => run_sessions(&socket).await,
        Commands::Shutdown => run_shutdown(&socket).await,
        Commands::Watch { pin } => run_watch(&socket, &pin).await,
        Commands::Present { pin, content } => run_present(&socket, &pin, &content).await,
        Commands::Codes { content, mode } => run_codes(&content, mode),
    }
}

fn daemon_command(socket: &Path) -> Process {
    let mut command = Process::new(find_binary("chorale-daemon"));
    command.arg("--socket-path").arg(socket);
    command
}

fn run_daemon(socket: &Path, tcp: Option<&str>) -> Result<()> {
    let mut command = daemon_command(socket);
    if let Some(addr) = tcp {
        command.arg("--tcp").arg(addr);
    }
    let status = command
        .status()
        .context("Failed to start chorale-daemon. Is it installed?")?;
    if !status.success() {
        bail!("chorale-daemon exited with status: {status}");
    }
    Ok(())
}

/// Start the daemon in the background unless one already answers on `socket`
async fn ensure_daemon_running(socket: &Path) -> Result<()> {
    if socket.exists() && is_daemon_responsive(socket).await {
        return Ok(());
    }

    eprintln!("Starting daemon...");
    daemon_command(socket)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn chorale-daemon. Is it installed?")?;

    let start = std::time::Instant::now();
    while start.elapsed() < DAEMON_START_TIMEOUT {
        if is_daemon_responsive(socket).await {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    bail!(
        "Daemon failed to start within {} seconds",
        DAEMON_START_TIMEOUT.as_secs()
    )
}

async fn is_daemon_responsive(socket: &Path) -> bool {
    match RpcClient::connect_to(socket).await {
        Ok(mut client) => client.register(ClientRole::Control).await.is_ok(),
        Err(_) => false,
    }
}

async fn connect(socket: &Path) -> Result<RpcClient> {
    if !socket.exists() {
        bail!(
            "Daemon not running (socket not found at {}).\nStart with: chorale daemon",
            socket.display()
        );
    }
    RpcClient::connect_to(socket)
        .await
        .context("Failed to connect to daemon. Is it running?")
}

async fn connect_control(socket: &Path) -> Result<RpcClient> {
    let mut client = connect(socket).await?;
    client
        .register(ClientRole::Control)
        .await
        .context("Failed to register with daemon")?;
    Ok(client)
}

async fn run_status(socket: &Path) -> Result<()> {
    if !socket.exists() {
        println!("Status: Not running");
        println!("Socket: {} (not found)", socket.display());
        return Ok(());
    }

    match connect_control(socket).await {
        Ok(client) => {
            let status = client.status().await.context("Status request failed")?;
            println!("Status: Running");
            println!("Socket: {}", socket.display());
            println!("Version: {}", status.version);
            println!("Sessions: {}", status.sessions);
            println!("Connections: {}", status.connections);
        }
        Err(e) => {
            println!("Status: Error");
            println!(
                "Socket: {} (exists but connection failed)",
                socket.display()
            );
            println!("Error: {e}");
        }
    }

    Ok(())
}

async fn run_sessions(socket: &Path) -> Result<()> {
    let client = connect_control(socket).await?;
    let sessions = client
        .list_sessions()
        .await
        .context("Session listing failed")?;

    if sessions.is_empty() {
        println!("No live sessions");
        return Ok(());
    }

    println!("{:<10} {:>6} {:>8}  {:<9} CONTENT", "PIN", "SEQ", "VIEWERS", "OPERATOR");
    for session in sessions {
        println!(
            "{:<10} {:>6} {:>8}  {:<9} {}",
            session.pin,
            session.seq,
            session.viewer_count,
            if session.operator_attached { "yes" } else { "away" },
            session.content_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_shutdown(socket: &Path) -> Result<()> {
    let client = connect_control(socket).await?;
    client.shutdown().await.context("Shutdown command failed")?;
    println!("Daemon shutting down");
    Ok(())
}

async fn run_watch(socket: &Path, pin: &str) -> Result<()> {
    let mut client = connect(socket).await?;
    let mut announced_wait = false;

    loop {
        let joined = client
            .register(ClientRole::Viewer {
                pin: pin.to_string(),
            })
            .await
            .context("Failed to join session")?;

        let mut state = match (joined.status, joined.snapshot) {
            (Some(JoinStatus::Joined), Some(snapshot)) => snapshot,
            _ => {
                if !announced_wait {
                    eprintln!("Waiting for session {pin} to start...");
                    announced_wait = true;
                }
                sleep(WATCH_RETRY_INTERVAL).await;
                continue;
            }
        };
        announced_wait = false;

        println!(
            "Joined session {pin}: {} ({} viewers)",
            render::title(&state.active_content),
            state.viewer_count
        );
        println!("{}", render::describe(&state, now_millis()));

        loop {
            match client.next_event().await {
                Some(ServerEvent::Delta(delta)) => {
                    if !catch_up(&client, &mut state, &delta).await? {
                        continue;
                    }
                    if !matches!(delta.change, Change::ViewerCount { .. }) {
                        println!("{}", render::describe(&state, now_millis()));
                    }
                }
                Some(ServerEvent::SessionEnded { pin }) => {
                    println!("Session {pin} ended");
                    break;
                }
                // Follows session_ended; the connection stays usable
                Some(ServerEvent::Closed(CloseReason::SessionEnded)) => {}
                Some(ServerEvent::Closed(reason)) => bail!("Disconnected by daemon: {reason}"),
                None => bail!("Daemon connection closed"),
            }
        }
    }
}

/// Where an incoming delta sits relative to the local copy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fold {
    /// Already reflected; a response and a queued notification can arrive out of order
    Stale,
    Applied,
    /// Something in between was missed
    Gap,
}

fn fold(state: &mut SessionSnapshot, delta: &Delta) -> Fold {
    if delta.seq <= state.seq {
        Fold::Stale
    } else if delta.seq > state.seq + 1 {
        Fold::Gap
    } else {
        state.apply(delta);
        Fold::Applied
    }
}

/// Bring `state` up to `delta`, refetching the whole snapshot after a gap.
/// Returns `false` when the delta was already seen.
async fn catch_up(
    client: &RpcClient,
    state: &mut SessionSnapshot,
    delta: &Delta,
) -> Result<bool> {
    match fold(state, delta) {
        Fold::Stale => Ok(false),
        Fold::Applied => Ok(true),
        Fold::Gap => {
            *state = client.snapshot().await.context("Failed to resync session")?;
            Ok(true)
        }
    }
}

fn load_content(path: &Path) -> Result<Content> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let content: Content = serde_json::from_str(&json)
        .with_context(|| format!("Invalid content file {}", path.display()))?;
    if content.slides().is_empty() {
        bail!("{} has no slides", path.display());
    }
    Ok(content)
}

async fn run_present(socket: &Path, pin: &str, content_path: &Path) -> Result<()> {
    let content = load_content(content_path)?;
    ensure_daemon_running(socket).await?;

    let mut client = connect(socket).await?;
    let registered = client
        .register(ClientRole::Operator {
            pin: Some(pin.to_string()),
            create: true,
        })
        .await
        .context("Failed to attach to session")?;
    let mut state = registered
        .snapshot
        .unwrap_or_else(|| SessionSnapshot::new(pin));

    let title = render::title(&content).to_string();
    let delta = client
        .mutate(Mutation::SetContent { content })
        .await
        .context("Daemon rejected the content")?;
    catch_up(&client, &mut state, &delta).await?;

    println!("Presenting \"{title}\" on session {pin}. Type 'help' for commands.");
    let codes: Vec<&str> = state.slide_codes.iter().map(|c| c.code.as_str()).collect();
    println!("Slides: {}", codes.join(" "));
    println!("{}", render::describe(&state, now_millis()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match command::parse(&line, &state) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(Command::Help)) => println!("{}", command::HELP),
                    Ok(Some(Command::Mutate(mutation))) => match client.mutate(mutation).await {
                        Ok(delta) => {
                            catch_up(&client, &mut state, &delta).await?;
                            println!("{}", render::describe(&state, now_millis()));
                        }
                        Err(e) => eprintln!("Rejected: {e}"),
                    },
                    Err(e) => eprintln!("{e}"),
                }
            }
            event = client.next_event() => match event {
                Some(ServerEvent::Delta(delta)) => {
                    if !catch_up(&client, &mut state, &delta).await? {
                        continue;
                    }
                    match delta.change {
                        Change::ViewerCount { viewer_count } => println!("Viewers: {viewer_count}"),
                        _ => println!("{}", render::describe(&state, now_millis())),
                    }
                }
                Some(ServerEvent::Closed(reason)) => bail!("Session closed: {reason}"),
                Some(ServerEvent::SessionEnded { pin }) => bail!("Session {pin} ended"),
                None => bail!("Daemon connection closed"),
            },
        }
    }

    Ok(())
}

fn run_codes(path: &Path, mode: DisplayMode) -> Result<()> {
    let content = load_content(path)?;
    print!("{}", render::codes_report(&content, mode));
    Ok(())
}

//! `ClaimChat` -- command-line client for claim negotiation rooms.
//!
//! Reads lines from stdin and prints room activity to stdout. Logs go to a
//! file so they never interleave with the conversation.
//!
//! ```bash
//! cargo run --bin claimchat -- --server-url ws://127.0.0.1:9000/ws \
//!     --user-id alice --room-id 42
//! ```
//!
//! Commands: `/delete <message-id>`, `/retry <temp-id>`, `/typing`,
//! `/who`, `/quit`. Any other line is sent as a message.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_appender::non_blocking::WorkerGuard;

use claimchat::client::{ChatClient, ClientError};
use claimchat::config::{CliArgs, ClientConfig};
use claimchat::session::{ChatSession, SessionEvent};
use claimchat::typing::{TypingDebouncer, TypingEvent};
use claimchat_proto::message::{MessageId, MessageStatus, RoomId, TempId, UserId};

/// Reconnect attempts before giving up.
const RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect attempt; doubles on each failure.
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let (Some(server_url), Some(user_id), Some(room_id)) = (
        config.server_url.clone(),
        config.user_id.clone(),
        config.room_id.clone(),
    ) else {
        eprintln!("--server-url, --user-id and --room-id are required (or set them in the config file)");
        std::process::exit(2);
    };

    tracing::info!(url = %server_url, user_id = %user_id, room_id = %room_id, "claimchat starting");

    if let Err(e) = run(&config, &server_url, user_id, room_id).await {
        eprintln!("{e}");
        tracing::error!(err = %e, "claimchat exiting with error");
        std::process::exit(1);
    }
    tracing::info!("claimchat exiting");
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("claimchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Connects, retrying with exponential backoff while the server is down.
async fn connect_with_retry(
    config: &ClientConfig,
    server_url: &str,
    user_id: &UserId,
) -> Result<ChatClient, ClientError> {
    let options = config.connect_options();
    let mut delay = RECONNECT_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match ChatClient::connect(server_url, user_id.clone(), &options).await {
            Ok(client) => return Ok(client),
            Err(e @ ClientError::Rejected { .. }) => return Err(e),
            Err(e) if attempt >= RECONNECT_ATTEMPTS => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, err = %e, "connect failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Main loop: stdin commands, server events, and typing signals.
async fn run(
    config: &ClientConfig,
    server_url: &str,
    user_id: UserId,
    room_id: RoomId,
) -> Result<(), ClientError> {
    let client = connect_with_retry(config, server_url, &user_id).await?;
    let (session, mut typing_rx) = ChatSession::new(user_id.clone(), client, config.typing_expiry);
    let session = Arc::new(session);
    let (debouncer, mut debounced_rx) = TypingDebouncer::new(config.typing_debounce);

    session.join(&room_id).await?;
    println!("connected as {user_id}, joining room {room_id}");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let (mut pump, mut events) = session.pump_events();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Command::Quit => break,
                    Command::Empty => {}
                    Command::Typing => debouncer.keystroke(&room_id),
                    Command::Who => print_who(&session, &room_id),
                    Command::Delete(message_id) => {
                        report(session.delete_message(message_id).await);
                    }
                    Command::Retry(temp_id) => report(session.retry(&room_id, temp_id).await),
                    Command::Unknown(cmd) => println!("unknown command: {cmd}"),
                    Command::Send(content) => {
                        debouncer.cancel(&room_id);
                        report(session.send_message(&room_id, &content).await.map(|_| ()));
                    }
                }
            }
            Some(room) = debounced_rx.recv() => {
                report(session.notify_typing(&room).await);
            }
            Some(event) = typing_rx.recv() => print_typing(&event),
            Some(event) = events.recv() => match event {
                Ok(event) => print_event(config, &session, &room_id, &event),
                Err(ClientError::ConnectionClosed) => {
                    println!("connection lost, reconnecting...");
                    let client = connect_with_retry(config, server_url, &user_id).await?;
                    session.reconnect(client).await?;
                    (pump, events) = session.pump_events();
                    println!("reconnected");
                }
                Err(e) => return Err(e),
            },
        }
    }

    pump.abort();
    session.transport().close().await;
    Ok(())
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Delete(MessageId),
    Retry(TempId),
    Typing,
    Who,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };
        let mut parts = rest.split_whitespace();
        match (parts.next(), parts.next().map(str::parse::<u64>)) {
            (Some("quit"), None) => Self::Quit,
            (Some("typing"), None) => Self::Typing,
            (Some("who"), None) => Self::Who,
            (Some("delete"), Some(Ok(id))) => Self::Delete(MessageId::new(id)),
            (Some("retry"), Some(Ok(id))) => Self::Retry(TempId::new(id)),
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn report(result: Result<(), ClientError>) {
    if let Err(e) = result {
        println!("! {e}");
    }
}

fn print_who(session: &ChatSession<ChatClient>, room_id: &RoomId) {
    let Some(participants) = session.participants(room_id) else {
        println!("not in room {room_id} yet");
        return;
    };
    for user in participants {
        let status = if session.is_online(&user) { "online" } else { "offline" };
        println!("  {user} ({status})");
    }
}

fn print_typing(event: &TypingEvent) {
    match event {
        TypingEvent::Started { user_id, .. } => println!("  {user_id} is typing..."),
        TypingEvent::Stopped { .. } => {}
    }
}

fn print_event(
    config: &ClientConfig,
    session: &ChatSession<ChatClient>,
    room_id: &RoomId,
    event: &SessionEvent,
) {
    match event {
        SessionEvent::Joined {
            room_id,
            participants,
            online,
        } => {
            let names: Vec<&str> = participants.iter().map(UserId::as_str).collect();
            println!(
                "joined room {room_id} with {} ({} online)",
                names.join(", "),
                online.len()
            );
        }
        SessionEvent::Left { room_id } => println!("left room {room_id}"),
        SessionEvent::HistoryLoaded { room_id: loaded, .. } if loaded == room_id => {
            if let Some(view) = session.view(room_id) {
                for entry in view.entries() {
                    let at = entry
                        .created_at
                        .map_or_else(|| "--:--".to_string(), |t| config.format_timestamp(t));
                    let id = entry.id.map_or_else(String::new, |id| format!(" #{id}"));
                    println!("[{at}] {}: {}{id}", entry.sender_id, entry.content);
                }
            }
        }
        SessionEvent::HistoryLoaded { .. } => {}
        SessionEvent::MessageReceived(msg) => {
            println!(
                "[{}] {}: {} #{}",
                config.format_timestamp(msg.created_at),
                msg.sender_id,
                msg.content,
                msg.id
            );
        }
        SessionEvent::StatusChanged {
            temp_id, status, ..
        } => match status {
            MessageStatus::Sent => println!("  ~{temp_id} sent"),
            MessageStatus::Delivered => println!("  ~{temp_id} delivered"),
            MessageStatus::Sending | MessageStatus::Failed(_) => {}
        },
        SessionEvent::MessageDeleted { message_id, .. } => println!("  #{message_id} deleted"),
        SessionEvent::PresenceChanged { user_id, status } => println!("  {user_id} is {status}"),
        SessionEvent::Failed {
            code,
            reason,
            temp_id,
        } => match temp_id {
            Some(temp_id) => println!("! ~{temp_id} failed ({code}): {reason}; /retry {temp_id}"),
            None => println!("! {code}: {reason}"),
        },
    }
}

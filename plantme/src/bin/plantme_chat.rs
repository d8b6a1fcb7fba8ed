//! Terminal front end for a PlantMe chat session.
//!
//! Type a message to ask a question, or use one of the slash commands:
//! `/image <path>`, `/clear-image`, `/audio <path>`, `/reset`, `/theme`, `/quit`.

use anyhow::Context as _;
use clap::Parser;
use plantme::{
    AudioClip, ChatSession, HttpChatGateway, JsonFileStore, KeyValueStore, Message,
    SessionIdentifierStore, SessionState, ThemePreference,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "plantme-chat", about = "Chat with the PlantMe plant disease assistant")]
struct Args {
    /// Base URL of the plantme-proxy service
    #[arg(long, env = "PLANTME_PROXY_URL", default_value = "http://localhost:3000")]
    proxy_url: String,

    /// File holding the session identifier and theme between runs
    #[arg(long, env = "PLANTME_STATE_FILE", default_value = ".plantme/state.json")]
    state_file: PathBuf,

    /// Assume a dark OS colour scheme when no theme has been saved yet
    #[arg(long)]
    prefers_dark: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(&args.state_file)
            .await
            .with_context(|| format!("opening {}", args.state_file.display()))?,
    );
    let session_id = SessionIdentifierStore::new(store.clone())
        .get_or_create()
        .await?;
    let mut theme = ThemePreference::load(store, args.prefers_dark).await?;

    info!(session_id = %session_id, proxy = %args.proxy_url, "Starting chat");

    let session = Arc::new(
        ChatSession::builder(Arc::new(HttpChatGateway::new(args.proxy_url)))
            .session_id(session_id)
            .build(),
    );

    let printer = tokio::spawn(print_messages(session.subscribe()));

    println!("PlantMe ({} theme). /quit to exit.", theme.theme().as_str());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" => break,
            "/reset" => session.reset().await,
            "/theme" => {
                let next = theme.toggle().await?;
                println!("[theme: {}]", next.as_str());
            }
            "/clear-image" => session.clear_image(),
            "/image" => match read_file(argument).await {
                Ok(data) => {
                    let media_type = guess_image_type(Path::new(argument));
                    if session.select_image(file_name(argument), media_type, data) {
                        println!("[image attached, send a caption or an empty line]");
                    } else {
                        println!("[not an image: {}]", argument);
                    }
                }
                Err(e) => println!("[{:#}]", e),
            },
            "/audio" => match read_file(argument).await {
                Ok(data) => {
                    session.submit_audio(AudioClip::new(data)).await;
                }
                Err(e) => println!("[{:#}]", e),
            },
            _ => {
                if line.is_empty() && session.snapshot().pending_image.is_none() {
                    continue;
                }
                session.submit_text(line).await;
            }
        }
    }

    printer.abort();
    Ok(())
}

async fn read_file(path: &str) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(!path.is_empty(), "a file path is required");
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path))
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn guess_image_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Prints every message added to the log, plus a marker while a reply is pending.
async fn print_messages(mut updates: watch::Receiver<Arc<SessionState>>) {
    let mut printed = 0u64;
    let mut was_loading = false;
    let mut detected: Option<String> = None;
    loop {
        let state = updates.borrow_and_update().clone();

        // A reset shrinks the log back to the welcome message.
        if state.messages.last().map(|m| m.id).unwrap_or(0) < printed {
            printed = 0;
            println!("--- conversation reset ---");
        }
        let last_printed = printed;
        for message in state.messages.iter().filter(|m| m.id > last_printed) {
            print_message(message);
            printed = message.id;
        }
        if state.is_loading && !was_loading {
            println!("...");
        }
        was_loading = state.is_loading;

        if state.detected_disease != detected {
            if let Some(disease) = &state.detected_disease {
                println!("[detected: {}]", disease);
            }
            detected = state.detected_disease.clone();
        }

        if updates.changed().await.is_err() {
            break;
        }
    }
}

fn print_message(message: &Message) {
    let who = if message.is_from_user() { "you" } else { "plantme" };
    match &message.image_analysis {
        Some(analysis) => println!(
            "{}> {} ({}, confidence {:.0}%)",
            who,
            message.content,
            analysis.severity,
            analysis.confidence * 100.0
        ),
        None => println!("{}> {}", who, message.content),
    }
}

//! settlers-chat: terminal client for The Settlers Online chat.
//!
//! Logs in, prints the friend list, joins the configured rooms and then
//! prints everything that arrives. Lines typed on stdin are sent:
//!
//!   <text>               Say something in the first joined room
//!   #<room> <text>       Say something in a room
//!   /msg <player> <text> Private message
//!   /join <room>         Join another room and print its history
//!   /friends             Print the friend list again
//!   /quit                Log out
//!
//! The password can come from SETTLERS_CHAT_PASSWORD instead of a flag.

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use settlers_chat_sdk::realm::FixedRealm;
use settlers_chat_sdk::{
    ChatMessage, Client, ClientHandle, Event, FriendStatus, OutgoingMessage, RegionTable, Stage,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use config::{Config, Resolved};

#[derive(Parser, Debug)]
#[command(name = "settlers-chat", about = "Chat client for The Settlers Online")]
struct Args {
    /// Account email
    #[arg(long)]
    email: Option<String>,

    /// Account password
    #[arg(long, env = "SETTLERS_CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Region, e.g. europe, germany, russia
    #[arg(long)]
    region: Option<String>,

    /// Realm number, if known (skips probing)
    #[arg(long)]
    realm: Option<String>,

    /// Comma-separated rooms to join, e.g. "global-1,trade"
    #[arg(long)]
    channels: Option<String>,

    /// Region table to use instead of the bundled one
    #[arg(long)]
    regions_file: Option<PathBuf>,

    /// Config file (default: ~/.config/settlers-chat/cli.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "settlers_chat=info,settlers_chat_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(config::default_path);
    let config = Config::load(&config_path);
    let resolved = Resolved::merge(&args, &config)?;

    let table = match &resolved.regions_file {
        Some(path) => RegionTable::from_path(path)
            .with_context(|| format!("loading region table {}", path.display()))?,
        None => RegionTable::embedded()?,
    };

    let (progress_tx, progress_rx) = watch::channel(Stage::Login);
    let progress = tokio::spawn(show_progress(progress_rx));

    tracing::info!(region = %resolved.region, "Connecting");
    let mut builder = Client::builder(resolved.email, resolved.password, resolved.region)
        .regions(table)
        .progress(progress_tx)
        .diagnostics(|d| tracing::debug!(?d, "Poll loop discarded a response"));
    if let Some(realm) = resolved.realm {
        builder = builder.resolver(FixedRealm(realm));
    }
    let client = builder.connect().await.context("login failed")?;
    let _ = progress.await;

    let printer = Printer { json: resolved.json };
    eprintln!("Logged in as {}", client.display_name());

    let friends = client
        .friends_and_status()
        .await
        .context("fetching friend list")?;
    printer.friends(&friends);

    for channel in &resolved.channels {
        let history = client
            .join_channel(channel)
            .await
            .with_context(|| format!("joining {channel}"))?;
        for msg in &history {
            printer.message(msg);
        }
    }

    let (handle, mut events) = client.start();
    tokio::spawn(read_input(
        handle.clone(),
        resolved.channels.first().cloned(),
        printer,
    ));

    tracing::info!("Listening. Ctrl+C to quit.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => handle.shutdown(),
            event = events.recv() => match event {
                Some(event) => printer.event(&event),
                None => break,
            },
        }
    }

    tracing::info!("Disconnected");
    Ok(())
}

async fn show_progress(mut rx: watch::Receiver<Stage>) {
    while rx.changed().await.is_ok() {
        let stage = *rx.borrow_and_update();
        let step = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0) + 1;
        eprintln!("[{step}/{}] {stage}", Stage::ALL.len());
    }
}

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(OutgoingMessage),
    Join(String),
    Friends,
    Quit,
}

fn parse_input(line: &str, default_channel: Option<&str>) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(cmd_text) = line.strip_prefix('/') {
        let (cmd, rest) = cmd_text.split_once(' ').unwrap_or((cmd_text, ""));
        let rest = rest.trim();
        return match cmd.to_lowercase().as_str() {
            "msg" => match rest.split_once(' ') {
                Some((to, text)) if !text.trim().is_empty() => {
                    Ok(Some(Input::Send(OutgoingMessage::private(to, text.trim()))))
                }
                _ => Err("usage: /msg <player> <text>".into()),
            },
            "join" if !rest.is_empty() => Ok(Some(Input::Join(rest.to_string()))),
            "join" => Err("usage: /join <room>".into()),
            "friends" => Ok(Some(Input::Friends)),
            "quit" | "exit" => Ok(Some(Input::Quit)),
            other => Err(format!("unknown command /{other}")),
        };
    }

    if let Some(room_text) = line.strip_prefix('#') {
        return match room_text.split_once(' ') {
            Some((room, text)) if !text.trim().is_empty() => {
                Ok(Some(Input::Send(OutgoingMessage::group(room, text.trim()))))
            }
            _ => Err("usage: #<room> <text>".into()),
        };
    }

    match default_channel {
        Some(room) => Ok(Some(Input::Send(OutgoingMessage::group(room, line)))),
        None => Err("no room joined; use #<room> <text> or /msg".into()),
    }
}

async fn read_input(handle: ClientHandle, default_channel: Option<String>, printer: Printer) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let input = match parse_input(&line, default_channel.as_deref()) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(usage) => {
                eprintln!("{usage}");
                continue;
            }
        };

        let result = match input {
            Input::Send(msg) => handle.send(msg).await,
            Input::Join(room) => handle.join_channel(room).await.map(|history| {
                for msg in &history {
                    printer.message(msg);
                }
            }),
            Input::Friends => handle
                .friends_and_status()
                .await
                .map(|friends| printer.friends(&friends)),
            Input::Quit => {
                handle.shutdown();
                break;
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Command failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Printer {
    json: bool,
}

impl Printer {
    fn message(&self, msg: &ChatMessage) {
        if self.json {
            match serde_json::to_string(msg) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Can't serialize message"),
            }
        } else if msg.is_private() {
            println!("[{}] *{}* {}", msg.time(), msg.sender_name, msg.text);
        } else {
            println!("[{}] #{} <{}> {}", msg.time(), msg.channel, msg.sender_name, msg.text);
        }
    }

    fn event(&self, event: &Event) {
        match event {
            Event::Message(msg) => self.message(msg),
            Event::PresenceChange { who, online } => {
                let status = if *online { FriendStatus::Online } else { FriendStatus::Offline };
                if self.json {
                    println!("{}", serde_json::json!({ "presence": who, "status": status }));
                } else {
                    println!("* {who} is now {status}");
                }
            }
            Event::Empty => {}
        }
    }

    fn friends(&self, friends: &BTreeMap<String, FriendStatus>) {
        if self.json {
            println!("{}", serde_json::json!({ "friends": friends }));
            return;
        }
        if friends.is_empty() {
            println!("No friends on the roster.");
            return;
        }
        for (name, status) in friends {
            println!("  {name:<20} {status}");
        }
    }
}

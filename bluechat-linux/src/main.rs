//! BlueChat node: ad-hoc group chat over the LAN transport. Lines typed on stdin go to every
//! connected peer; `/peers`, `/scan` and `/quit` are local commands.

mod config;
mod discovery;
mod engine;
mod events;
mod framing;
mod lan;
mod listener;
mod reader;
mod registry;
mod sender;
mod session;
#[cfg(test)]
mod testing;
mod transport;

use std::path::PathBuf;

use anyhow::Context;
use bluechat_core::ChatEvent;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;
use crate::events::EventSink;
use crate::lan::LanTransport;

#[derive(Parser, Debug)]
#[command(name = "bluechat", version, about = "Ad-hoc group chat node")]
struct Args {
    /// Display name sent to peers (falls back to config, then $USER)
    #[arg(long, short)]
    name: Option<String>,
    /// Mirror engine log lines into the chat output
    #[arg(long)]
    debug: bool,
    /// Config file to use instead of the standard locations
    #[arg(long)]
    config: Option<PathBuf>,
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = config::load(args.config.as_deref());
    let name = args
        .name
        .or_else(|| cfg.name.clone())
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_string());
    tracing::info!("bluechat v{} starting as '{}'", env!("CARGO_PKG_VERSION"), name);

    let transport = LanTransport::bind(&name, cfg.lan())
        .await
        .context("cannot join discovery group")?;
    let local_addr = transport.local_addr().clone();
    let (events, rx) = EventSink::channel(args.debug || cfg.debug);
    tokio::spawn(print_events(rx));
    let engine = Engine::start(transport, cfg.engine(), &name, events).await?;
    println!("* you are {} ({})", engine.local_name(), local_addr);

    tokio::select! {
        r = read_commands(&engine) => r?,
        _ = shutdown_signal() => tracing::info!("shutdown signal received"),
    }

    engine.shutdown().await;
    tracing::info!("stopped");
    Ok(())
}

/// Read stdin until EOF or `/quit`.
async fn read_commands(engine: &Engine<LanTransport>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        match line {
            "" => {}
            "/quit" => break,
            "/scan" => engine.discover(),
            "/peers" => {
                let peers = engine.peers();
                if peers.is_empty() {
                    println!("* no peers connected");
                }
                for peer in peers {
                    println!("* {peer}");
                }
            }
            text => {
                if let Err(e) = engine.send_text(text) {
                    println!("* not sent: {e}");
                }
            }
        }
    }
    Ok(())
}

async fn print_events(mut rx: tokio::sync::mpsc::UnboundedReceiver<ChatEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::PeerJoined(peer) => println!("* {} joined", peer.name),
            ChatEvent::PeerLeft(peer) => println!("* {} left", peer.name),
            ChatEvent::MessageReceived { from, text } => println!("[{}] {}", from.name, text),
            ChatEvent::MessageSent { text } => println!("[me] {text}"),
            ChatEvent::Listening => println!("* listening for peers"),
            ChatEvent::Ready => println!("* ready to chat"),
            ChatEvent::Debug { component, line } => println!("({component}) {line}"),
        }
    }
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        if let Ok(directive) = level.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Chat output owns stdout.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "no SIGTERM handler, Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

//! pomosync binary
//!
//! Joins a shared Pomodoro room and drives it from the terminal.
//!
//! Usage:
//!   pomosync [room]
//!
//! Environment: see `PomoConfig::from_env` (`POMO_ROOM`, `POMO_USERNAME`,
//! `POMO_DEV_DURATIONS`, `POMO_FOCUS_SECS`, `POMO_BREAK_SECS`,
//! `POMO_LONG_BREAK_SECS`, `POMO_LOCAL_PEERS`).

mod command;

use std::sync::Arc;

use pomosync_core::{
    random_color, random_username, Clock, LogNotifier, MemoryHub, PomoConfig, Result, Room,
    RoomOptions, RoomServices, SystemClock, TimerMessage,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::command::{print_usage, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pomosync=info,pomosync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = PomoConfig::from_env()?;
    if let Some(room) = std::env::args().nth(1) {
        config = config.with_room(room);
    }

    info!(
        room = %config.room,
        focus = config.durations.focus,
        short_break = config.durations.short_break,
        long_break = config.durations.long_break,
        local_peers = config.local_peers,
        "Starting pomosync"
    );

    let hub = MemoryHub::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let username = config.username.clone().unwrap_or_else(random_username);
    let mut room = join(&hub, &clock, &config, username);

    // Extra peers sharing this process, to watch the room converge.
    let mut companions: Vec<Room> = (0..config.local_peers)
        .map(|_| join(&hub, &clock, &config, random_username()))
        .collect();

    println!(
        "Joined room '{}' as {} ({} peer(s) connected). Type `help` for commands.",
        room.id(),
        room.me().username,
        room.peers().len()
    );

    let render = tokio::spawn(render_frames(room.frames()));
    let roster = tokio::spawn(render_peers(room.peer_updates()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                warn!(input = %line.trim(), "rejected command");
                println!("{}", e);
                continue;
            }
        };

        match command {
            Command::Start => {
                room.start();
            }
            Command::Reset => {
                room.reset();
            }
            Command::Rename(name) => room.rename(name),
            Command::Peers => {
                for peer in room.peers() {
                    let marker = if peer.id == room.me().id { "*" } else { " " };
                    println!("{} {:>10}  {}  {}", marker, peer.id, peer.username, peer.color);
                }
            }
            Command::Status => {
                let timer = room.timer();
                let frame = room.frames().borrow().clone();
                println!(
                    "{}  {}  ({})",
                    frame.label,
                    frame.countdown,
                    if timer.running { "running" } else { "stopped" }
                );
            }
            Command::Json => {
                let message = TimerMessage { timer: room.timer() };
                println!("{}", serde_json::to_string_pretty(&message)?);
            }
            Command::Help => print_usage(),
            Command::Quit => break,
        }
    }

    render.abort();
    roster.abort();
    for peer in companions.drain(..) {
        peer.close();
    }
    room.close();
    info!("Shutting down");
    Ok(())
}

fn join(hub: &MemoryHub, clock: &Arc<dyn Clock>, config: &PomoConfig, username: String) -> Room {
    Room::join(
        RoomOptions {
            room: config.room.clone(),
            username,
            color: random_color(),
            defaults: config.timer_defaults(),
        },
        RoomServices {
            map: Arc::new(hub.map(&config.room)),
            presence: Arc::new(hub.presence(&config.room)),
            host: Arc::new(LogNotifier),
            clock: Arc::clone(clock),
        },
    )
}

async fn render_frames(mut frames: tokio::sync::watch::Receiver<pomosync_core::Frame>) {
    while frames.changed().await.is_ok() {
        let frame = frames.borrow_and_update().clone();
        println!("{:<14} {}", frame.label, frame.countdown);
    }
}

async fn render_peers(
    mut peers: tokio::sync::watch::Receiver<Vec<pomosync_core::PresenceEntry>>,
) {
    while peers.changed().await.is_ok() {
        let names: Vec<String> = peers
            .borrow_and_update()
            .iter()
            .map(|p| p.username.clone())
            .collect();
        println!("Peers: {}", names.join(", "));
    }
}

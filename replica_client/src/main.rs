//! Headless client binary.
//!
//! Usage:
//!   cargo run -p replica_client -- [--addr 127.0.0.1:40000] [--name Ada]
//!                                  [--config world.json] [--frames N]
//!
//! Connects to the relay, spawns a local player and runs the world loop with
//! a headless scene. Lines typed on stdin are sent as chat; `/jump` taps the
//! jump key and `/quit` leaves.

use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use replica_client::{
    client::{ClientState, ReplicaClient},
    controls::InputEvent,
    double_jump::JUMP_CODE,
    emote::Emote,
};
use replica_shared::{
    config::WorldConfig, math::Vec3, render::HeadlessScene, resources::MemoryAssetLoader,
};
use tokio::sync::mpsc;
use tracing::info;

/// Render frame rate of the headless loop.
const FRAME_HZ: f32 = 60.0;

struct Args {
    config: Option<PathBuf>,
    addr: Option<String>,
    name: Option<String>,
    frames: Option<u64>,
}

fn parse_args() -> Args {
    let mut out = Args {
        config: None,
        addr: None,
        name: None,
        frames: None,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                out.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                out.name = Some(args[i + 1].clone());
                i += 2;
            }
            "--frames" if i + 1 < args.len() => {
                out.frames = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let mut cfg = match &args.config {
        Some(path) => WorldConfig::load(path)?,
        None => WorldConfig::default(),
    };
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }
    if let Some(name) = args.name {
        cfg.player_name = name;
    }
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let assets = MemoryAssetLoader::with_defaults(Emote::urls());
    let mut client = ReplicaClient::connect(cfg, assets, HeadlessScene::new())
        .await
        .context("connect")?;
    client.world_mut().spawn_local(Vec3::ZERO)?;

    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let line = line.trim().to_string();
            if !line.is_empty() && line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut interval = tokio::time::interval(Duration::from_secs_f32(1.0 / FRAME_HZ));
    let mut last = Instant::now();
    let mut frames = 0u64;
    loop {
        interval.tick().await;

        while let Ok(line) = line_rx.try_recv() {
            let world = client.world_mut();
            match line.as_str() {
                "/quit" => {
                    client.shutdown().await?;
                    return Ok(());
                }
                "/jump" => {
                    world.input(&InputEvent::Press(JUMP_CODE.to_string()));
                    world.input(&InputEvent::Release(JUMP_CODE.to_string()));
                }
                text => world.say(text),
            }
        }

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;
        client.tick(dt).await?;

        for event in client.world_mut().drain_events() {
            info!(event = event.name(), ?event, "World event");
        }

        if client.state() == ClientState::Disconnected {
            info!("Relay gone, exiting");
            break;
        }
        frames += 1;
        if args.frames.is_some_and(|n| frames >= n) {
            client.shutdown().await?;
            break;
        }
    }
    Ok(())
}

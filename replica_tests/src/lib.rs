//! Helpers shared by the socket integration tests.

use std::time::Duration;

use replica_client::{emote::Emote, ReplicaClient};
use replica_shared::{config::WorldConfig, render::HeadlessScene, resources::MemoryAssetLoader};

/// Client type used throughout the tests.
pub type Client = ReplicaClient<MemoryAssetLoader, HeadlessScene>;

/// Frame length used when ticking clients.
pub const TEST_DT: f32 = 0.02;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Connects a headless client named `name`.
pub async fn connect(cfg: &WorldConfig, name: &str) -> anyhow::Result<Client> {
    let mut cfg = cfg.clone();
    cfg.player_name = name.to_string();
    ReplicaClient::connect(
        cfg,
        MemoryAssetLoader::with_defaults(Emote::urls()),
        HeadlessScene::new(),
    )
    .await
}

/// Ticks `clients` until `done` holds for `clients[watch]`.
pub async fn tick_until(
    clients: &mut [&mut Client],
    watch: usize,
    mut done: impl FnMut(&Client) -> bool,
) -> anyhow::Result<()> {
    for _ in 0..300 {
        for client in clients.iter_mut() {
            client.tick(TEST_DT).await?;
        }
        if done(&*clients[watch]) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("condition not reached");
}

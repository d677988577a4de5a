//! Shared harness for the relay integration tests.

use std::{path::Path, time::Duration};

use anyhow::Context;
use tokio::{sync::oneshot, task::JoinHandle};
use voxel_client::RelayClient;
use voxel_server::server::bind_ephemeral_with;
use voxel_shared::config::RelayConfig;

/// How long tests wait for a message that should arrive.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long tests listen to be sure a message does *not* arrive.
pub const QUIET_WINDOW: Duration = Duration::from_millis(150);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A relay running in the background on an ephemeral port.
pub struct TestRelay {
    pub cfg: RelayConfig,
    pub url: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestRelay {
    pub async fn start(data_dir: &Path) -> anyhow::Result<Self> {
        Self::start_with_heartbeat(data_dir, RelayConfig::default().heartbeat_secs).await
    }

    pub async fn start_with_heartbeat(
        data_dir: &Path,
        heartbeat_secs: u64,
    ) -> anyhow::Result<Self> {
        let (server, cfg) = bind_ephemeral_with(data_dir, heartbeat_secs).await?;
        let url = format!("ws://127.0.0.1:{}", cfg.port);
        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = rx.await;
        }));
        Ok(Self {
            cfg,
            url,
            shutdown,
            handle,
        })
    }

    pub async fn client(&self) -> anyhow::Result<RelayClient> {
        RelayClient::connect(&self.url).await
    }

    /// Signals shutdown and waits for the final flush.
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(());
        self.handle.await.context("relay task panicked")?
    }
}

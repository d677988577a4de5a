//! Relay server loop.
//!
//! One task per WebSocket connection, one event loop owning all relay state.
//! Connection tasks forward inbound text frames over a channel, so messages
//! are applied strictly in arrival order with no locking. Each connection
//! drains its own bounded outbound queue and pings the client on a fixed
//! interval; a client that stays silent for a whole interval is dropped.
//!
//! The event loop also owns the persistence debounce: when its deadline
//! passes the world is written, and shutdown ends with a synchronous flush.

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use voxel_shared::{
    config::RelayConfig,
    protocol::{Frame, PeerId},
};

use crate::{dispatch::Dispatcher, peers::Outbox, persist::PersistenceGateway};

/// Frames a single connection may have queued before broadcasts skip it.
pub const OUTBOUND_BUFFER: usize = 256;

const EVENT_BUFFER: usize = 1024;

/// Pause after a failed accept, so a persistent error such as EMFILE does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Connection task -> event loop.
#[derive(Debug)]
enum RelayEvent {
    Connected {
        outbox: Outbox,
        assigned: oneshot::Sender<PeerId>,
    },
    Text {
        peer: PeerId,
        text: String,
    },
    Closed {
        peer: PeerId,
    },
}

pub struct RelayServer {
    pub cfg: RelayConfig,
    listener: TcpListener,
    dispatcher: Dispatcher,
    gateway: PersistenceGateway,
    events_tx: mpsc::Sender<RelayEvent>,
    events_rx: mpsc::Receiver<RelayEvent>,
}

impl RelayServer {
    /// Loads the saved world, then binds the listener.
    pub async fn bind(cfg: RelayConfig) -> anyhow::Result<Self> {
        let gateway = PersistenceGateway::new(cfg.world_path());
        let world = gateway.load_on_startup();
        let dispatcher = Dispatcher::new(world, cfg.persist_debounce());

        let addr = cfg.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("tcp bind {addr}"))?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        Ok(Self {
            cfg,
            listener,
            dispatcher,
            gateway,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serves until `shutdown` resolves, then flushes the world.
    pub async fn run_until<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, "Relay listening");

        loop {
            let deadline = self.dispatcher.persist_deadline();
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
                _ = wait_until(deadline) => {
                    let now = Instant::now();
                    if self.dispatcher.take_due_persist(now)
                        && !self.gateway.persist(self.dispatcher.world())
                    {
                        self.dispatcher.defer_persist(now);
                    }
                }
            }
        }

        info!("Relay shutting down");
        self.drain_pending();
        self.dispatcher.cancel_persist();
        self.gateway.shutdown(self.dispatcher.world()).await;
        Ok(())
    }

    fn on_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected { outbox, assigned } => {
                let id = self.dispatcher.connect(outbox);
                if assigned.send(id).is_err() {
                    self.dispatcher.disconnect(id);
                }
            }
            RelayEvent::Text { peer, text } => self.dispatcher.handle_text(peer, &text),
            RelayEvent::Closed { peer } => self.dispatcher.disconnect(peer),
        }
    }

    /// Applies frames that were already delivered when shutdown won the select.
    /// New connections are refused; dropping their `assigned` sender ends them.
    fn drain_pending(&mut self) {
        let mut applied = 0usize;
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                RelayEvent::Connected { .. } => {}
                event => {
                    self.on_event(event);
                    applied += 1;
                }
            }
        }
        if applied > 0 {
            debug!(events = applied, "Applied queued events before flush");
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let events = self.events_tx.clone();
        let heartbeat = self.cfg.heartbeat_interval();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, events, heartbeat).await {
                debug!(%addr, error = %e, "Connection ended with error");
            }
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn serve_connection(
    stream: TcpStream,
    events: mpsc::Sender<RelayEvent>,
    heartbeat: Duration,
) -> anyhow::Result<()> {
    let ws = accept_async(stream).await.context("websocket handshake")?;
    let (mut sink, mut source) = ws.split();

    let (outbox, mut outbound) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
    let (assigned_tx, assigned_rx) = oneshot::channel();
    events
        .send(RelayEvent::Connected {
            outbox,
            assigned: assigned_tx,
        })
        .await
        .context("relay stopped")?;
    let peer = assigned_rx.await.context("relay stopped")?;

    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    let mut alive = true;

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    alive = true;
                    let text = text.as_str().to_owned();
                    if events.send(RelayEvent::Text { peer, text }).await.is_err() {
                        break Ok(());
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => alive = true,
                Some(Err(e)) => break Err(e).context("websocket read"),
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::text(frame.to_string())).await {
                        break Err(e).context("websocket write");
                    }
                }
                None => break Ok(()),
            },
            _ = ticker.tick() => {
                if !alive {
                    debug!(peer = %peer, "Heartbeat missed, closing");
                    break Ok(());
                }
                alive = false;
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    break Err(e).context("websocket ping");
                }
            }
        }
    };

    let _ = events.send(RelayEvent::Closed { peer }).await;
    result
}

/// Helper for tests: bind to an ephemeral localhost port with the world under `data_dir`.
pub async fn bind_ephemeral(data_dir: &Path) -> anyhow::Result<(RelayServer, RelayConfig)> {
    bind_ephemeral_with(data_dir, RelayConfig::default().heartbeat_secs).await
}

/// Like [`bind_ephemeral`], with a custom heartbeat interval in seconds.
pub async fn bind_ephemeral_with(
    data_dir: &Path,
    heartbeat_secs: u64,
) -> anyhow::Result<(RelayServer, RelayConfig)> {
    let cfg = RelayConfig {
        port: 0,
        bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST).to_string(),
        data_dir: data_dir.to_string_lossy().into_owned(),
        persist_debounce_ms: 50,
        heartbeat_secs,
        ..Default::default()
    };
    let server = RelayServer::bind(cfg.clone()).await?;
    let mut cfg = cfg;
    cfg.port = server.local_addr()?.port();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxel_shared::{
        protocol::{encode_client, ClientMsg},
        room::RoomKey,
        world::Block,
    };

    #[tokio::test]
    async fn queued_edits_reach_the_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        let (mut server, cfg) = bind_ephemeral(dir.path()).await.unwrap();

        let (outbox, _outbound) = mpsc::channel(OUTBOUND_BUFFER);
        let peer = server.dispatcher.connect(outbox);
        for x in 0..3 {
            let text = encode_client(&ClientMsg::Block(Block { x, y: 1, z: 2, id: 4 })).unwrap();
            server.events_tx.try_send(RelayEvent::Text { peer, text }).unwrap();
        }
        server.events_tx.try_send(RelayEvent::Closed { peer }).unwrap();

        server.run_until(std::future::ready(())).await.unwrap();

        let world = PersistenceGateway::new(cfg.world_path()).load_on_startup();
        let global = RoomKey::global();
        for x in 0..3 {
            assert_eq!(world.block_at(&global, x, 1, 2), Some(4));
        }
    }
}

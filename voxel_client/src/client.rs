//! Client implementation.
//!
//! The client keeps:
//! - One WebSocket to the relay
//! - The id the relay assigned (from `SELF`) and the room it last joined
//! - A log of `SYSTEM`/`CHAT` lines for display

use std::{collections::VecDeque, time::Duration};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use voxel_shared::{
    protocol::{
        decode_frame, encode_client, ClientMsg, PeerId, PeerSummary, ServerMsg, StateUpdate,
    },
    room::RoomKey,
    world::{Block, ChunkKey},
};

/// Display lines kept; older ones are dropped first.
pub const MAX_LOG_LINES: usize = 200;

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Socket open, implicitly in `GLOBAL`.
    Connected,
    /// Joined a room and received an id.
    Joined(RoomKey),
    /// Socket closed by either side.
    Disconnected,
}

/// What a successful JOIN handed back.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinReply {
    pub id: PeerId,
    pub peers: Vec<PeerSummary>,
}

pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub state: ClientState,
    pub peer_id: Option<PeerId>,
    /// The latest display lines from `SYSTEM` and `CHAT` messages.
    pub server_messages: VecDeque<String>,
}

impl RelayClient {
    /// Opens a WebSocket to `url`, e.g. `ws://127.0.0.1:8080`.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        info!(%url, "Connecting to relay");
        let (ws, _response) = connect_async(url).await.context("websocket connect")?;
        Ok(Self {
            ws,
            state: ClientState::Connected,
            peer_id: None,
            server_messages: VecDeque::new(),
        })
    }

    pub async fn send(&mut self, msg: &ClientMsg) -> anyhow::Result<()> {
        let text = encode_client(msg)?;
        self.send_raw(&text).await
    }

    /// Sends a text frame verbatim; handy for probing validation.
    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws
            .send(Message::text(text.to_string()))
            .await
            .context("websocket send")
    }

    /// Sends JOIN and waits for the snapshot and `SELF` that answer it.
    pub async fn join(
        &mut self,
        room: &str,
        name: &str,
        timeout: Duration,
    ) -> anyhow::Result<JoinReply> {
        self.send(&ClientMsg::Join {
            room: RoomKey::normalize_str(room),
            name: Some(name.to_string()),
            skin: None,
        })
        .await?;

        let mut peers = None;
        loop {
            match self.recv_timeout(timeout).await? {
                Some(ServerMsg::RoomSnapshot { peers: p }) => peers = Some(p),
                Some(ServerMsg::Welcome { id }) => {
                    let peers = peers.context("SELF arrived before ROOM_SNAPSHOT")?;
                    return Ok(JoinReply { id, peers });
                }
                Some(_) => {}
                None => anyhow::bail!("timed out waiting for join reply"),
            }
        }
    }

    pub async fn chat(&mut self, text: &str) -> anyhow::Result<()> {
        self.send(&ClientMsg::Chat {
            text: text.to_string(),
        })
        .await
    }

    pub async fn set_block(&mut self, block: Block) -> anyhow::Result<()> {
        self.send(&ClientMsg::Block(block)).await
    }

    pub async fn request_chunk(&mut self, key: ChunkKey) -> anyhow::Result<()> {
        self.send(&ClientMsg::ChunkRequest {
            cx: key.cx,
            cz: key.cz,
        })
        .await
    }

    pub async fn send_state(&mut self, update: StateUpdate) -> anyhow::Result<()> {
        self.send(&ClientMsg::PlayerState(update)).await
    }

    /// Next protocol message, or `None` if nothing arrives within `timeout`.
    ///
    /// Control frames are skipped. Bookkeeping (`state`, `peer_id`,
    /// `server_messages`) is updated as messages pass through.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<ServerMsg>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let next = match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    let msg = decode_frame(text.as_str())?;
                    self.observe(&msg);
                    return Ok(Some(msg));
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.state = ClientState::Disconnected;
                    anyhow::bail!("relay closed the connection");
                }
                Some(Ok(other)) => debug!(?other, "Skipping control frame"),
                Some(Err(e)) => {
                    self.state = ClientState::Disconnected;
                    return Err(e).context("websocket recv");
                }
            }
        }
    }

    /// Reads until a message matching `pred` arrives, discarding the rest.
    pub async fn recv_matching<P>(
        &mut self,
        timeout: Duration,
        mut pred: P,
    ) -> anyhow::Result<Option<ServerMsg>>
    where
        P: FnMut(&ServerMsg) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_timeout(remaining).await? {
                Some(msg) if pred(&msg) => return Ok(Some(msg)),
                Some(_) => {}
                None => return Ok(None),
            }
        }
    }

    /// Everything that arrives within `window`.
    pub async fn drain(&mut self, window: Duration) -> anyhow::Result<Vec<ServerMsg>> {
        let mut out = Vec::new();
        while let Some(msg) = self.recv_timeout(window).await? {
            out.push(msg);
        }
        Ok(out)
    }

    fn observe(&mut self, msg: &ServerMsg) {
        match msg {
            ServerMsg::Welcome { id } => self.peer_id = Some(*id),
            ServerMsg::System { text } => {
                if let Some(room) = text.strip_prefix("Joined room ") {
                    self.state = ClientState::Joined(RoomKey::normalize_str(room));
                }
                push_line(&mut self.server_messages, text.clone());
            }
            ServerMsg::Chat { name, text } => {
                push_line(&mut self.server_messages, format!("<{name}> {text}"))
            }
            _ => {}
        }
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await.context("websocket close")?;
        Ok(())
    }
}

fn push_line(log: &mut VecDeque<String>, line: String) {
    if log.len() == MAX_LOG_LINES {
        log.pop_front();
    }
    log.push_back(line);
}

//! Socket-level tests: real relay, real WebSocket clients.

use std::time::Duration;

use voxel_client::{ClientState, RelayClient};
use voxel_shared::{
    protocol::{PeerId, PlayerState, ServerMsg, StateUpdate},
    room::RoomKey,
    world::{Block, ChunkKey},
};
use voxel_tests::{init_tracing, TestRelay, QUIET_WINDOW, RECV_TIMEOUT};

async fn joined(
    relay: &TestRelay,
    room: &str,
    name: &str,
) -> anyhow::Result<(RelayClient, PeerId)> {
    let mut client = relay.client().await?;
    let reply = client.join(room, name, RECV_TIMEOUT).await?;
    Ok((client, reply.id))
}

/// Round-trips a chunk request so everything the client sent before it has been applied.
async fn sync(client: &mut RelayClient) -> anyhow::Result<Vec<Block>> {
    client.request_chunk(ChunkKey::new(0, 0)).await?;
    match client
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::ChunkData { .. }))
        .await?
    {
        Some(ServerMsg::ChunkData { blocks, .. }) => Ok(blocks),
        other => anyhow::bail!("expected CHUNK_DATA, got {other:?}"),
    }
}

fn state_at(x: f64) -> StateUpdate {
    StateUpdate::from(PlayerState {
        x,
        ..PlayerState::default()
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn block_edit_scenario() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = TestRelay::start(dir.path()).await?;

    let (mut a, _) = joined(&relay, "abc ", "Ann").await?;
    assert_eq!(a.state, ClientState::Joined(RoomKey::normalize_str("ABC")));
    let (mut b, _) = joined(&relay, "ABC", "Bob").await?;

    a.set_block(Block { x: 1, y: 2, z: 3, id: 5 }).await?;
    let placed = b
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::Block(_)))
        .await?;
    assert_eq!(placed, Some(ServerMsg::Block(Block { x: 1, y: 2, z: 3, id: 5 })));

    a.set_block(Block { x: 1, y: 2, z: 3, id: 0 }).await?;
    let removed = b
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::Block(_)))
        .await?;
    assert_eq!(removed, Some(ServerMsg::Block(Block { x: 1, y: 2, z: 3, id: 0 })));

    assert!(sync(&mut b).await?.is_empty());

    relay.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rooms_are_isolated() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = TestRelay::start(dir.path()).await?;

    let (mut a, a_id) = joined(&relay, "red", "Ann").await?;
    let (mut b, _) = joined(&relay, "red", "Bob").await?;
    let (mut c, _) = joined(&relay, "blue", "Cid").await?;
    a.drain(QUIET_WINDOW).await?;
    b.drain(QUIET_WINDOW).await?;

    a.chat("hello red").await?;
    a.set_block(Block { x: 0, y: 64, z: 0, id: 3 }).await?;
    a.send_state(state_at(4.0)).await?;

    let chat = b.recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::Chat { .. })).await?;
    assert_eq!(
        chat,
        Some(ServerMsg::Chat {
            name: "Ann".into(),
            text: "hello red".into()
        })
    );
    assert!(b
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::Block(_)))
        .await?
        .is_some());
    let state = b
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::PlayerState(_)))
        .await?;
    assert!(matches!(state, Some(ServerMsg::PlayerState(s)) if s.id == a_id && s.state.x == 4.0));

    let leaked = c.drain(QUIET_WINDOW).await?;
    assert!(
        !leaked.iter().any(|m| matches!(
            m,
            ServerMsg::Chat { .. } | ServerMsg::Block(_) | ServerMsg::PlayerState(_)
        )),
        "blue room saw red traffic: {leaked:?}"
    );
    assert!(sync(&mut c).await?.is_empty());

    c.chat("hello blue").await?;
    let own = c.recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::Chat { .. })).await?;
    assert!(own.is_some(), "sender receives its own chat");
    let cross = a.drain(QUIET_WINDOW).await?;
    assert!(!cross.iter().any(|m| matches!(m, ServerMsg::Chat { .. })));

    relay.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_frames_are_dropped_silently() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = TestRelay::start(dir.path()).await?;

    let (mut a, _) = joined(&relay, "r", "Ann").await?;
    let (mut b, _) = joined(&relay, "r", "Bob").await?;
    a.drain(QUIET_WINDOW).await?;

    a.send_raw("definitely not json").await?;
    a.send_raw("[1, 2, 3]").await?;
    a.send_raw(r#"{"type":"FLY"}"#).await?;
    a.send_raw(r#"{"type":"BLOCK","x":1,"y":2,"z":3}"#).await?;
    a.send_raw(r#"{"type":"PLAYER_STATE","x":0,"y":0,"z":0,"yaw":"NaN","pitch":0}"#)
        .await?;
    a.chat("marker").await?;

    let mut seen = Vec::new();
    loop {
        match b.recv_timeout(RECV_TIMEOUT).await? {
            Some(ServerMsg::Chat { text, .. }) if text == "marker" => break,
            Some(other) => seen.push(other),
            None => anyhow::bail!("marker chat never arrived"),
        }
    }
    assert!(seen.is_empty(), "unexpected traffic: {seen:?}");
    assert_eq!(
        a.drain(QUIET_WINDOW).await?,
        vec![ServerMsg::Chat {
            name: "Ann".into(),
            text: "marker".into()
        }]
    );

    relay.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_and_leave_notices() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = TestRelay::start(dir.path()).await?;

    let (mut a, a_id) = joined(&relay, "hall", "Ann").await?;
    a.send_state(state_at(12.5)).await?;
    sync(&mut a).await?;

    let mut b = relay.client().await?;
    let reply = b.join("hall", "Bob", RECV_TIMEOUT).await?;
    assert_eq!(reply.peers.len(), 1);
    assert_eq!(reply.peers[0].id, a_id);
    assert_eq!(reply.peers[0].state.x, 12.5);
    assert_eq!(b.peer_id, Some(reply.id));

    let join = a
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::PlayerJoin { .. }))
        .await?;
    assert_eq!(
        join,
        Some(ServerMsg::PlayerJoin {
            id: reply.id,
            name: "Bob".into(),
            skin: String::new()
        })
    );

    b.close().await?;
    let leave = a
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::PlayerLeave { .. }))
        .await?;
    assert_eq!(leave, Some(ServerMsg::PlayerLeave { id: reply.id }));
    let notice = a
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::System { .. }))
        .await?;
    assert_eq!(notice, Some(ServerMsg::System { text: "Bob left".into() }));

    relay.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debounced_write_lands_without_shutdown() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = TestRelay::start(dir.path()).await?;
    let path = relay.cfg.world_path();

    let (mut a, _) = joined(&relay, "disk", "Ann").await?;
    for x in 0..5 {
        a.set_block(Block { x, y: 0, z: 0, id: 1 }).await?;
    }
    assert_eq!(sync(&mut a).await?.len(), 5);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let doc = loop {
        if let Ok(bytes) = std::fs::read(&path) {
            let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
            if doc["rooms"]["DISK"]["0,0"].as_array().map_or(0, Vec::len) == 5 {
                break doc;
            }
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "world was never written");
        tokio::time::sleep(Duration::from_millis(25)).await;
    };
    assert_eq!(doc["rooms"].as_object().map(|r| r.len()), Some(1));

    relay.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn world_survives_restart() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let relay = TestRelay::start(dir.path()).await?;
    let (mut a, _) = joined(&relay, "keep", "Ann").await?;
    a.set_block(Block { x: 3, y: 10, z: 4, id: 9 }).await?;
    a.set_block(Block { x: -1, y: 0, z: 0, id: 2 }).await?;
    a.set_block(Block { x: -1, y: 0, z: 0, id: 0 }).await?;
    sync(&mut a).await?;
    relay.stop().await?;

    let relay = TestRelay::start(dir.path()).await?;
    let (mut b, _) = joined(&relay, "KEEP", "Bob").await?;
    assert_eq!(sync(&mut b).await?, vec![Block { x: 3, y: 10, z: 4, id: 9 }]);

    b.request_chunk(ChunkKey::new(-1, 0)).await?;
    let west = b
        .recv_matching(RECV_TIMEOUT, |m| matches!(m, ServerMsg::ChunkData { .. }))
        .await?;
    assert_eq!(
        west,
        Some(ServerMsg::ChunkData {
            cx: -1,
            cz: 0,
            blocks: vec![]
        })
    );

    let (mut other, _) = joined(&relay, "elsewhere", "Cid").await?;
    assert!(sync(&mut other).await?.is_empty());

    relay.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_clients_are_dropped_by_heartbeat() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let relay = TestRelay::start_with_heartbeat(dir.path(), 1).await?;

    let (mut ann, _) = joined(&relay, "hall", "Ann").await?;
    // Zed never polls the socket again, so pings go unanswered.
    let (_zed, zed_id) = joined(&relay, "hall", "Zed").await?;

    let leave = ann
        .recv_matching(Duration::from_secs(5), |m| {
            matches!(m, ServerMsg::PlayerLeave { id } if *id == zed_id)
        })
        .await?;
    assert_eq!(leave, Some(ServerMsg::PlayerLeave { id: zed_id }));

    // Reading keeps answering pings, so Ann outlives further intervals.
    ann.drain(Duration::from_millis(2500)).await?;
    assert!(sync(&mut ann).await?.is_empty());
    assert_eq!(ann.state, ClientState::Joined(RoomKey::normalize_str("hall")));

    relay.stop().await
}

//! Standalone console client.
//!
//! Usage:
//!   cargo run -p voxel_client -- [--url ws://127.0.0.1:8080] [--room GLOBAL] [--name Player]
//!
//! Joins a room and prints everything the relay sends.
//!
//! Console commands:
//!   join <room>            - Switch rooms
//!   say <message>          - Send chat message
//!   set <x> <y> <z> <id>   - Place a block (id 0 removes)
//!   chunk <cx> <cz>        - Request a chunk's blocks
//!   status                 - Show client status
//!   quit                   - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use voxel_client::{ClientState, RelayClient};
use voxel_shared::world::{Block, ChunkKey};

struct Args {
    url: String,
    room: String,
    name: String,
}

fn parse_args() -> Args {
    let mut out = Args {
        url: "ws://127.0.0.1:8080".to_string(),
        room: "GLOBAL".to_string(),
        name: "Player".to_string(),
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" if i + 1 < args.len() => {
                out.url = args[i + 1].clone();
                i += 2;
            }
            "--room" if i + 1 < args.len() => {
                out.room = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                out.name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

async fn exec_console(
    client: &mut RelayClient,
    name: &str,
    line: &str,
) -> anyhow::Result<Vec<String>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&cmd) = tokens.first() else {
        return Ok(Vec::new());
    };
    let ints = |from: usize| -> Option<Vec<i32>> {
        tokens[from..].iter().map(|t| t.parse().ok()).collect()
    };

    match cmd {
        "join" => {
            let room = tokens.get(1).copied().unwrap_or("");
            let reply = client.join(room, name, Duration::from_secs(5)).await?;
            Ok(vec![format!("Joined as {} with {} other peer(s)", reply.id, reply.peers.len())])
        }
        "say" => {
            client.chat(&tokens[1..].join(" ")).await?;
            Ok(Vec::new())
        }
        "set" => match ints(1).as_deref() {
            Some(&[x, y, z, id]) => {
                client.set_block(Block { x, y, z, id }).await?;
                Ok(Vec::new())
            }
            _ => Ok(vec!["Usage: set <x> <y> <z> <id>".to_string()]),
        },
        "chunk" => match ints(1).as_deref() {
            Some(&[cx, cz]) => {
                client.request_chunk(ChunkKey::new(cx, cz)).await?;
                Ok(Vec::new())
            }
            _ => Ok(vec!["Usage: chunk <cx> <cz>".to_string()]),
        },
        "status" => Ok(vec![
            format!("State: {:?}", client.state),
            format!("Peer ID: {:?}", client.peer_id),
        ]),
        "quit" | "exit" => {
            std::process::exit(0);
        }
        other => Ok(vec![format!("Unknown command: {other}")]),
    }
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
    let mut client = RelayClient::connect(&args.url).await.context("connect")?;
    let reply = client
        .join(&args.room, &args.name, Duration::from_secs(5))
        .await
        .context("join")?;
    info!(id = %reply.id, peers = reply.peers.len(), "Joined relay");

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Connected. Type 'status' for info, 'quit' to exit.");
    println!();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match exec_console(&mut client, &args.name, &line).await {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => println!("Error: {}", e),
            }
        }

        match client.recv_timeout(Duration::from_millis(50)).await {
            Ok(Some(msg)) => println!("{:?}", msg),
            Ok(None) => {}
            Err(e) => println!("Error: {}", e),
        }

        if client.state == ClientState::Disconnected {
            println!("Disconnected from relay.");
            break;
        }
    }

    Ok(())
}

//! Minimal in-process MQTT v5 broker for wire-level tests
//!
//! Accepts a single client, answers its CONNECT with a successful CONNACK
//! and records every byte the client sends. The listening socket is closed
//! right after the first accept, so reconnection attempts are refused.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// v5 CONNACK: session not present, reason Success, no properties
pub const CONNACK: [u8; 5] = [0x20, 0x03, 0x00, 0x00, 0x00];

/// One-shot broker on an ephemeral loopback port
pub struct FakeBroker {
    addr: SocketAddr,
    release_tx: Option<oneshot::Sender<()>>,
    session: JoinHandle<io::Result<Vec<u8>>>,
}

impl FakeBroker {
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (release_tx, release_rx) = oneshot::channel();
        let session = tokio::spawn(serve_one(listener, release_rx));

        Ok(Self {
            addr,
            release_tx: Some(release_tx),
            session,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `tcp://` URL of this broker
    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Drop the client connection, as a crashing broker would
    pub fn release(&mut self) {
        if let Some(release_tx) = self.release_tx.take() {
            let _ = release_tx.send(());
        }
    }

    /// Wait for the session to end (client hung up or [`release`](Self::release))
    /// and return everything the client sent
    pub async fn received(self) -> io::Result<Vec<u8>> {
        let FakeBroker {
            release_tx,
            session,
            ..
        } = self;
        let result = session.await.map_err(io::Error::other)?;
        drop(release_tx);
        result
    }
}

async fn serve_one(
    listener: TcpListener,
    mut release_rx: oneshot::Receiver<()>,
) -> io::Result<Vec<u8>> {
    let (mut stream, _) = listener.accept().await?;
    drop(listener);

    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    let mut acknowledged = false;

    loop {
        tokio::select! {
            _ = &mut release_rx => break,
            read = stream.read(&mut chunk) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                received.extend_from_slice(&chunk[..n]);
                if !acknowledged {
                    stream.write_all(&CONNACK).await?;
                    acknowledged = true;
                }
            }
        }
    }

    Ok(received)
}

/// Position of `needle` inside `haystack`
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

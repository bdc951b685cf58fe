//! Per-connection pipeline: read a frame, wrap it, publish it

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{read_frame, EnvelopeEncoder, JsonEncoder, MessageEnvelope};
use crate::transport::Publisher;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Why a worker stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close_connection` is set and one frame was handled
    ClosedAfterFrame,
    /// Peer closed the connection between frames
    PeerClosed,
    /// I/O error or EOF in the middle of a frame
    ReadFailed,
}

/// Summary of one served connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub frames: usize,
    pub published: usize,
    pub encoding_failures: usize,
    pub close_reason: CloseReason,
}

/// Drives one accepted connection.
///
/// Workers are cheap to clone: configuration, publisher and encoder are all
/// shared behind `Arc`.
pub struct ConnectionWorker<P, E = JsonEncoder> {
    config: Arc<BridgeConfig>,
    publisher: Arc<P>,
    encoder: Arc<E>,
}

impl<P, E> Clone for ConnectionWorker<P, E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            publisher: Arc::clone(&self.publisher),
            encoder: Arc::clone(&self.encoder),
        }
    }
}

impl<P> ConnectionWorker<P, JsonEncoder>
where
    P: Publisher,
{
    /// Worker using the standard JSON encoder
    pub fn new(config: Arc<BridgeConfig>, publisher: Arc<P>) -> Self {
        Self::with_encoder(config, publisher, Arc::new(JsonEncoder))
    }
}

impl<P, E> ConnectionWorker<P, E>
where
    P: Publisher,
    E: EnvelopeEncoder,
{
    pub fn with_encoder(config: Arc<BridgeConfig>, publisher: Arc<P>, encoder: Arc<E>) -> Self {
        Self {
            config,
            publisher,
            encoder,
        }
    }

    /// Serve `stream` until the peer goes away, a read fails, or (with
    /// `close_connection`) the first frame has been handled.
    ///
    /// Read and encoding failures are logged and absorbed. A publisher
    /// failure is returned as an error and must end the service.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> BridgeResult<WorkerOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let close_after_frame = self.config.listen.close_connection;
        let max_frame_bytes = self.config.listen.max_frame_bytes;
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut frames = 0;
        let mut published = 0;
        let mut encoding_failures = 0;

        let close_reason = loop {
            let frame = match read_frame(&mut reader, &mut buf, max_frame_bytes).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(peer = %peer, "Peer closed connection");
                    break CloseReason::PeerClosed;
                }
                Err(source) => {
                    let error = BridgeError::Read { peer, source };
                    warn!(error = %error, "Dropping connection");
                    break CloseReason::ReadFailed;
                }
            };
            frames += 1;

            let envelope = MessageEnvelope::from_frame(frame.as_str(), peer);
            match self.encoder.encode(&envelope) {
                Ok(payload) => {
                    self.publish(payload).await?;
                    published += 1;
                }
                Err(e) => {
                    encoding_failures += 1;
                    warn!(peer = %peer, error = %BridgeError::from(e), "Skipping frame");
                }
            }

            if close_after_frame {
                break CloseReason::ClosedAfterFrame;
            }
        };

        if let Err(e) = reader.into_inner().shutdown().await {
            debug!(peer = %peer, "Connection shutdown failed: {}", e);
        }

        let outcome = WorkerOutcome {
            frames,
            published,
            encoding_failures,
            close_reason,
        };
        info!(
            peer = %peer,
            frames = outcome.frames,
            published = outcome.published,
            reason = ?outcome.close_reason,
            "Connection finished"
        );
        Ok(outcome)
    }

    async fn publish(&self, payload: Vec<u8>) -> BridgeResult<()> {
        self.publisher
            .publish(&self.config.broker.topic, Bytes::from(payload))
            .await
            .map_err(BridgeError::broker)
    }
}

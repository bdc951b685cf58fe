//! TCP accept loop

use super::worker::ConnectionWorker;
use crate::config::BridgeConfig;
use crate::connection_span;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{EnvelopeEncoder, JsonEncoder};
use crate::transport::Publisher;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, Instrument};

/// Bound TCP endpoint that fans accepted connections out to workers
pub struct Listener {
    listener: TcpListener,
    config: Arc<BridgeConfig>,
    admission: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind `listen.host:listen.port`. When the host resolves to several
    /// addresses the first IPv4 one is used, so `localhost` always means
    /// 127.0.0.1 even where `::1` resolves first.
    pub async fn bind(config: Arc<BridgeConfig>) -> BridgeResult<Self> {
        let addr = config.listen.address();
        let listener = match resolve_bind_address(&addr).await {
            Ok(local) => TcpListener::bind(local).await,
            Err(e) => Err(e),
        }
        .map_err(|source| BridgeError::Bind { addr, source })?;

        let admission = config
            .listen
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Ok(Self {
            listener,
            config,
            admission,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a fatal error occurs
    pub async fn run<P, E>(self, publisher: Arc<P>, encoder: Arc<E>) -> BridgeResult<()>
    where
        P: Publisher + 'static,
        E: EnvelopeEncoder + 'static,
    {
        self.run_until(publisher, encoder, std::future::pending())
            .await
    }

    /// Accept connections until `shutdown` completes or a fatal error occurs.
    ///
    /// Fatal errors are accept failures and any error a worker reports
    /// (the broker being unreachable, for instance). Workers still running
    /// when this returns are not drained.
    pub async fn run_until<P, E, F>(
        self,
        publisher: Arc<P>,
        encoder: Arc<E>,
        shutdown: F,
    ) -> BridgeResult<()>
    where
        P: Publisher + 'static,
        E: EnvelopeEncoder + 'static,
        F: Future<Output = ()> + Send,
    {
        let Listener {
            listener,
            config,
            admission,
        } = self;
        let worker = ConnectionWorker::with_encoder(config, publisher, encoder);
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<BridgeError>(1);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer, permit) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Listener shutting down");
                    return Ok(());
                }
                Some(error) = fatal_rx.recv() => {
                    error!(error = %error, "Fatal error reported by connection worker");
                    return Err(error);
                }
                accepted = admit(&listener, admission.as_ref()) => accepted?,
            };

            info!(peer = %peer, "Accepted connection");
            spawn_worker(worker.clone(), stream, peer, permit, fatal_tx.clone());
        }
    }
}

async fn resolve_bind_address(addr: &str) -> io::Result<SocketAddr> {
    let candidates = tokio::net::lookup_host(addr).await?;
    prefer_ipv4(candidates).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{addr} did not resolve to any address"),
        )
    })
}

/// First IPv4 address, else the first address of any family
fn prefer_ipv4<I>(candidates: I) -> Option<SocketAddr>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let mut fallback = None;
    for candidate in candidates {
        if candidate.is_ipv4() {
            return Some(candidate);
        }
        fallback.get_or_insert(candidate);
    }
    fallback
}

/// Wait for an admission permit (if limited), then for the next connection
async fn admit(
    listener: &TcpListener,
    admission: Option<&Arc<Semaphore>>,
) -> BridgeResult<(TcpStream, SocketAddr, Option<OwnedSemaphorePermit>)> {
    let permit = match admission {
        Some(semaphore) => Some(
            Arc::clone(semaphore)
                .acquire_owned()
                .await
                .map_err(|_| BridgeError::Accept(io::Error::other("admission closed")))?,
        ),
        None => None,
    };

    let (stream, peer) = listener.accept().await.map_err(BridgeError::Accept)?;
    Ok((stream, peer, permit))
}

fn spawn_worker<P, E>(
    worker: ConnectionWorker<P, E>,
    stream: TcpStream,
    peer: SocketAddr,
    permit: Option<OwnedSemaphorePermit>,
    fatal_tx: mpsc::Sender<BridgeError>,
) where
    P: Publisher + 'static,
    E: EnvelopeEncoder + 'static,
{
    tokio::spawn(
        async move {
            // Held until the worker finishes
            let _permit = permit;
            if let Err(error) = worker.handle(stream, peer).await {
                error!(error = %error, "Connection worker failed");
                if error.is_fatal() {
                    // A full channel already carries a fatal error
                    let _ = fatal_tx.try_send(error);
                }
            }
        }
        .instrument(connection_span!(peer = %peer)),
    );
}

/// Bind the configured endpoint and bridge every connection to `publisher`
/// with the JSON encoder. Only returns on a fatal error.
pub async fn serve<P>(config: Arc<BridgeConfig>, publisher: Arc<P>) -> BridgeResult<()>
where
    P: Publisher + 'static,
{
    let listener = Listener::bind(config).await?;
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Listening for TCP clients");
    }
    listener.run(publisher, Arc::new(JsonEncoder)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingPublisher, RecordingPublisher};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_bind_reports_address() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let mut config = BridgeConfig::test_config();
        config.listen.port = port;

        match Listener::bind(Arc::new(config)).await {
            Err(BridgeError::Bind { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{port}")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bind should fail while the port is taken"),
        }
    }

    #[test]
    fn test_prefer_ipv4() {
        let v6: SocketAddr = "[::1]:7777".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:7777".parse().unwrap();

        assert_eq!(prefer_ipv4([v6, v4]), Some(v4));
        assert_eq!(prefer_ipv4([v6]), Some(v6));
        assert_eq!(prefer_ipv4(Vec::<SocketAddr>::new()), None);
    }

    #[tokio::test]
    async fn test_default_host_accepts_ipv4_clients() {
        let mut config = BridgeConfig::default();
        config.listen.port = 0;
        assert_eq!(config.listen.host, "localhost");

        let listener = Listener::bind(Arc::new(config)).await.unwrap();
        let local = listener.local_addr().unwrap();
        assert!(local.is_ipv4(), "bound to {local}");

        let publisher = Arc::new(RecordingPublisher::new());
        let server = tokio::spawn(listener.run(Arc::clone(&publisher), Arc::new(JsonEncoder)));

        let mut client = TcpStream::connect(("127.0.0.1", local.port())).await.unwrap();
        client.write_all(b"over ipv4\n").await.unwrap();

        let messages = publisher.wait_for(1, Duration::from_secs(5)).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(publisher.envelopes().await[0].ip_from, "127.0.0.1");

        server.abort();
    }

    #[tokio::test]
    async fn test_ephemeral_port() {
        let listener = Listener::bind(Arc::new(BridgeConfig::test_config()))
            .await
            .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let listener = Listener::bind(Arc::new(BridgeConfig::test_config()))
            .await
            .unwrap();
        let publisher = Arc::new(RecordingPublisher::new());

        let result = listener
            .run_until(publisher, Arc::new(JsonEncoder), async {})
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_worker_failure_stops_listener() {
        let listener = Listener::bind(Arc::new(BridgeConfig::test_config()))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(listener.run(Arc::new(FailingPublisher), Arc::new(JsonEncoder)));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello\n").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("listener should stop")
            .unwrap();
        assert!(matches!(result, Err(BridgeError::Broker(_))));
    }
}

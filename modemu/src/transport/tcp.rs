use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_modbus::server::tcp::Server;

use crate::error::{LifecycleError, TransportError};
use crate::transport::bridge::ServiceVector;
use crate::transport::lifecycle::{CarrierHandle, CarrierLifecycle, SessionGuard};
use crate::transport::service::EmulatorService;
use crate::transport::{FrameHandler, HandlerSlot, Transport, TransportState};
use crate::types::UnitId;

/// Default bound on `start()`
pub(crate) const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Modbus TCP listener carrier
///
/// Sessions belong to the start cycle that accepted them. `stop()` closes the listening
/// socket and every session, including one waiting on a delayed response.
pub struct TcpTransport {
    host: String,
    port: u16,
    handler: HandlerSlot,
    lifecycle: CarrierLifecycle,
}

impl TcpTransport {
    /// Create a stopped transport that will listen on `host:port` (port 0 picks a free port)
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            handler: HandlerSlot::default(),
            lifecycle: CarrierLifecycle::new("tcp", DEFAULT_INIT_TIMEOUT),
        }
    }

    /// Bound the time `start()` waits for the listener
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_init_timeout(timeout);
        self
    }

    /// Configured host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configured port
    pub fn port(&self) -> u16 {
        self.port
    }
}

async fn run_server(
    host: String,
    port: u16,
    service: EmulatorService,
    mut handle: CarrierHandle,
) -> Result<(), String> {
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|err| format!("unable to bind {host}:{port}: {err}"))?;
    let local_addr = listener.local_addr().map_err(|err| err.to_string())?;
    tracing::info!("listening on {}", local_addr);

    let server = Server::new(listener);
    let guard = handle.session_guard();
    let service = service.with_session(guard.clone());
    let on_connected = move |stream: TcpStream, addr: SocketAddr| {
        let service = service.clone();
        let stream = SessionStream::new(stream, guard.clone());
        async move {
            tracing::info!("accepted connection from {}", addr);
            Ok::<_, io::Error>(Some((service, stream)))
        }
    };
    let on_process_error = |err: io::Error| {
        if err.kind() == io::ErrorKind::ConnectionAborted {
            tracing::debug!("session closed: {}", err);
        } else {
            tracing::warn!("session error: {}", err);
        }
    };

    handle.ready(Some(local_addr));

    tokio::select! {
        _ = handle.shutdown_requested() => {
            tracing::info!("closing listener on {}", local_addr);
            Ok(())
        }
        result = server.serve(&on_connected, on_process_error) => {
            result.map_err(|err| format!("listener on {local_addr} failed: {err}"))
        }
    }
}

/// Accepted socket that fails all IO once its start cycle stops
struct SessionStream {
    inner: TcpStream,
    stopped: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    _guard: SessionGuard,
}

impl SessionStream {
    fn new(inner: TcpStream, guard: SessionGuard) -> Self {
        Self {
            inner,
            stopped: Some(Box::pin(guard.stopped())),
            _guard: guard,
        }
    }

    fn poll_stopped(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        let Some(stopped) = self.stopped.as_mut() else {
            return Err(transport_stopped());
        };
        match stopped.as_mut().poll(cx) {
            Poll::Pending => Ok(()),
            Poll::Ready(()) => {
                self.stopped = None;
                Err(transport_stopped())
            }
        }
    }
}

fn transport_stopped() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "transport stopped")
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(err) = this.poll_stopped(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(err) = this.poll_stopped(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(err) = this.poll_stopped(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn state(&self) -> TransportState {
        self.lifecycle.state()
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        let service = EmulatorService::new(
            ServiceVector::new(self.handler.clone()),
            UnitId::wildcard(),
        );
        let host = self.host.clone();
        let port = self.port;
        self.lifecycle
            .start(move |handle| run_server(host, port, service, handle))
            .await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        self.lifecycle.stop().await?;
        Ok(())
    }

    fn on_request(&self, handler: FrameHandler) {
        self.handler.set(handler);
    }

    async fn send(&self, _unit: UnitId, _frame: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        match self.lifecycle.state() {
            TransportState::Started => Ok(None),
            _ => Err(LifecycleError::NotStarted.into()),
        }
    }

    fn listener_count(&self) -> usize {
        self.lifecycle.listener_count()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }
}

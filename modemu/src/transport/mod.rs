//! Carriers that deliver raw request frames to the engine
//!
//! Every carrier implements [`Transport`]. The memory carrier calls the frame
//! handler directly. The TCP and RTU carriers run a `tokio-modbus` server whose
//! per-request callbacks are bridged into raw frames.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{BridgeError, TransportError};
use crate::types::UnitId;

pub(crate) mod bridge;
pub(crate) mod lifecycle;
mod memory;
mod rtu;
pub(crate) mod service;
mod tcp;

pub use memory::MemoryTransport;
pub use rtu::{DataBits, Parity, RtuSettings, RtuTransport, StopBits};
pub use tcp::TcpTransport;

/// Future returned by a [`FrameHandler`]
pub type FrameFuture = Pin<Box<dyn Future<Output = Vec<u8>> + Send>>;

/// Handler invoked for every transaction: `(unit id, request frame) -> response frame`
pub type FrameHandler = Arc<dyn Fn(UnitId, Vec<u8>) -> FrameFuture + Send + Sync>;

/// Lifecycle state of a transport
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TransportState {
    /// not running, `start()` is allowed
    #[default]
    Stopped,
    /// `start()` is waiting for the carrier to become ready
    Starting,
    /// carrier is serving requests
    Started,
    /// `stop()` is closing the carrier
    Stopping,
}

/// Contract shared by every carrier
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// short carrier name used in logs
    fn kind(&self) -> &'static str;

    /// current lifecycle state
    fn state(&self) -> TransportState;

    /// Initialize the carrier, failing if it is not stopped or does not become ready
    async fn start(&mut self) -> Result<(), TransportError>;

    /// Close the carrier; resolves immediately when already stopped
    async fn stop(&mut self) -> Result<(), TransportError>;

    /// Register the frame handler, replacing any previous one
    fn on_request(&self, handler: FrameHandler);

    /// Low level write primitive
    ///
    /// The memory carrier returns the handler's response. Listener based carriers
    /// answer through the wire library and return `None` once started.
    async fn send(&self, unit: UnitId, frame: &[u8]) -> Result<Option<Vec<u8>>, TransportError>;

    /// Listeners currently attached to the underlying carrier
    fn listener_count(&self) -> usize;

    /// Bound address for socket based carriers
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Shared slot holding the active frame handler
#[derive(Clone, Default)]
pub(crate) struct HandlerSlot {
    inner: Arc<RwLock<Option<FrameHandler>>>,
}

impl HandlerSlot {
    pub(crate) fn set(&self, handler: FrameHandler) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub(crate) fn get(&self) -> Option<FrameHandler> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) async fn exchange(
        &self,
        unit: UnitId,
        frame: Vec<u8>,
    ) -> Result<Vec<u8>, BridgeError> {
        let handler = self.get().ok_or(BridgeError::NoHandler)?;
        Ok(handler(unit, frame).await)
    }
}

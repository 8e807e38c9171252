use crate::error::{BridgeError, LifecycleError, TransportError};
use crate::transport::{FrameHandler, HandlerSlot, Transport, TransportState};
use crate::types::UnitId;

/// Carrier that calls the frame handler in-process
#[derive(Default)]
pub struct MemoryTransport {
    state: TransportState,
    handler: HandlerSlot,
}

impl MemoryTransport {
    /// Create a stopped memory transport
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        if self.state != TransportState::Stopped {
            return Err(LifecycleError::AlreadyStarted.into());
        }
        self.state = TransportState::Started;
        tracing::debug!("memory transport started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        if self.state != TransportState::Stopped {
            tracing::debug!("memory transport stopped");
        }
        self.state = TransportState::Stopped;
        Ok(())
    }

    fn on_request(&self, handler: FrameHandler) {
        self.handler.set(handler);
    }

    async fn send(&self, unit: UnitId, frame: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        if self.state != TransportState::Started {
            return Err(LifecycleError::NotStarted.into());
        }
        let handler = self.handler.get().ok_or(BridgeError::NoHandler)?;
        Ok(Some(handler(unit, frame.to_vec()).await))
    }

    fn listener_count(&self) -> usize {
        0
    }
}

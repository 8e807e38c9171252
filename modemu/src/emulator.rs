use std::sync::Arc;

use crate::codec::Dispatcher;
use crate::config::{EmulatorConfig, TransportConfig};
use crate::decode::DecodeLevel;
use crate::error::{DeviceError, EmulatorError};
use crate::store::{Device, RegisterStore};
use crate::transport::{
    FrameFuture, FrameHandler, MemoryTransport, RtuTransport, TcpTransport, Transport,
};
use crate::types::UnitId;

/// A set of virtual devices served through one transport
///
/// Every request frame delivered by the transport is decoded by the [`Dispatcher`],
/// delayed by the timing simulator of the addressed device (if it has one) and then
/// executed against the shared [`RegisterStore`].
pub struct Emulator {
    dispatcher: Arc<Dispatcher>,
    transport: Box<dyn Transport>,
}

impl Emulator {
    /// Create an engine with no devices that serves requests from `transport`
    pub fn new(transport: Box<dyn Transport>, decode: DecodeLevel) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(RegisterStore::new()), decode));
        transport.on_request(frame_handler(dispatcher.clone()));
        Self {
            dispatcher,
            transport,
        }
    }

    /// Engine served by a [`MemoryTransport`]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryTransport::new()), DecodeLevel::Nothing)
    }

    /// Build the transport and devices described by a configuration
    pub fn from_config(config: &EmulatorConfig) -> Result<Self, EmulatorError> {
        let transport: Box<dyn Transport> = match &config.transport {
            TransportConfig::Memory => Box::new(MemoryTransport::new()),
            TransportConfig::Tcp { host, port } => Box::new(
                TcpTransport::new(host.clone(), *port).with_init_timeout(config.init_timeout()),
            ),
            TransportConfig::Rtu(serial) => Box::new(
                RtuTransport::new(serial.settings()?).with_init_timeout(config.init_timeout()),
            ),
        };

        let emulator = Self::new(transport, config.decode_level);
        for device in &config.devices {
            emulator.add_device(device.to_device()?)?;
        }
        Ok(emulator)
    }

    /// Add a device; unit ids must be unique and within 1..=247
    pub fn add_device(&self, device: Device) -> Result<(), DeviceError> {
        let unit_id = device.unit_id();
        let timed = device.timing().is_some();
        self.store().insert(device)?;
        tracing::info!("added device {} (timing: {})", unit_id, timed);
        Ok(())
    }

    /// Remove a device, returning true if it existed
    ///
    /// Requests for the unit id are answered with a gateway exception afterwards.
    pub fn remove_device(&self, unit_id: UnitId) -> bool {
        let removed = self.store().remove(unit_id);
        if removed {
            tracing::info!("removed device {}", unit_id);
        }
        removed
    }

    /// Configured unit ids in ascending order
    pub fn device_ids(&self) -> Vec<UnitId> {
        self.store().unit_ids()
    }

    /// Register store shared by every device of this engine
    pub fn store(&self) -> &Arc<RegisterStore> {
        self.dispatcher.store()
    }

    /// Active transport
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Active transport, mutably
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Start the transport
    pub async fn start(&mut self) -> Result<(), EmulatorError> {
        self.transport.start().await?;
        match self.transport.local_addr() {
            Some(addr) => tracing::info!("{} transport listening on {}", self.transport.kind(), addr),
            None => tracing::info!("{} transport started", self.transport.kind()),
        }
        Ok(())
    }

    /// Stop the transport; a no-op when it is not running
    pub async fn stop(&mut self) -> Result<(), EmulatorError> {
        self.transport.stop().await?;
        tracing::info!("{} transport stopped", self.transport.kind());
        Ok(())
    }

    /// Process one raw request frame in-process, applying the device's timing
    pub async fn handle_request(&self, unit_id: UnitId, frame: Vec<u8>) -> Vec<u8> {
        process(self.dispatcher.clone(), unit_id, frame).await
    }
}

fn frame_handler(dispatcher: Arc<Dispatcher>) -> FrameHandler {
    Arc::new(move |unit: UnitId, frame: Vec<u8>| -> FrameFuture {
        Box::pin(process(dispatcher.clone(), unit, frame))
    })
}

async fn process(dispatcher: Arc<Dispatcher>, unit_id: UnitId, frame: Vec<u8>) -> Vec<u8> {
    let transaction = match dispatcher.decode(unit_id, &frame) {
        Ok(x) => x,
        Err(response) => return response,
    };

    // the device may be removed during the delay, execute() answers that case
    if let Ok(Some(timing)) = dispatcher.store().timing(transaction.unit_id()) {
        let elapsed = timing.delay(&frame, transaction.register_count()).await;
        tracing::debug!(
            "delayed fc {:#04X} for unit {} by {:?}",
            transaction.function_code(),
            transaction.unit_id(),
            elapsed
        );
    }

    dispatcher.execute(&transaction)
}

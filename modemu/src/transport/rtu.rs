use std::time::Duration;

use tokio_modbus::server::rtu::Server;
use tokio_serial::SerialStream;

use crate::error::{LifecycleError, TransportError};
use crate::transport::bridge::ServiceVector;
use crate::transport::lifecycle::{CarrierHandle, CarrierLifecycle};
use crate::transport::service::EmulatorService;
use crate::transport::tcp::DEFAULT_INIT_TIMEOUT;
use crate::transport::{FrameHandler, HandlerSlot, Transport, TransportState};
use crate::types::UnitId;

/// Serial parity
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// no parity bit
    #[default]
    None,
    /// even parity
    Even,
    /// odd parity
    Odd,
}

/// Number of data bits per character
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    #[default]
    Eight,
}

/// Number of stop bits per character
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StopBits {
    /// 1 stop bit
    #[default]
    One,
    /// 2 stop bits
    Two,
}

impl TryFrom<u8> for DataBits {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(value),
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => Err(value),
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Serial line settings of an [`RtuTransport`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtuSettings {
    /// serial device path, e.g. `/dev/ttyUSB0`
    pub path: String,
    /// line speed
    pub baud_rate: u32,
    /// parity
    pub parity: Parity,
    /// data bits
    pub data_bits: DataBits,
    /// stop bits
    pub stop_bits: StopBits,
    /// open the port exclusively
    pub lock: bool,
    /// unit id served on the bus, [`UnitId::wildcard`] serves every device
    pub unit_id: UnitId,
}

impl RtuSettings {
    /// 9600 baud, 8N1, exclusive lock, all unit ids
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            lock: true,
            unit_id: UnitId::wildcard(),
        }
    }

    fn open(&self) -> Result<SerialStream, String> {
        let builder = tokio_serial::new(self.path.as_str(), self.baud_rate)
            .parity(self.parity.into())
            .data_bits(self.data_bits.into())
            .stop_bits(self.stop_bits.into());
        #[allow(unused_mut)]
        let mut stream = SerialStream::open(&builder)
            .map_err(|err| format!("unable to open {}: {}", self.path, err))?;
        #[cfg(unix)]
        stream
            .set_exclusive(self.lock)
            .map_err(|err| format!("unable to lock {}: {}", self.path, err))?;
        Ok(stream)
    }
}

/// Modbus RTU listener carrier on a serial port
pub struct RtuTransport {
    settings: RtuSettings,
    handler: HandlerSlot,
    lifecycle: CarrierLifecycle,
}

impl RtuTransport {
    /// Create a stopped transport
    pub fn new(settings: RtuSettings) -> Self {
        Self {
            settings,
            handler: HandlerSlot::default(),
            lifecycle: CarrierLifecycle::new("rtu", DEFAULT_INIT_TIMEOUT),
        }
    }

    /// Bound the time `start()` waits for the port to open
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_init_timeout(timeout);
        self
    }

    /// Serial settings in use
    pub fn settings(&self) -> &RtuSettings {
        &self.settings
    }
}

async fn run_server(
    settings: RtuSettings,
    service: EmulatorService,
    mut handle: CarrierHandle,
) -> Result<(), String> {
    let stream = settings.open()?;
    tracing::info!(
        "opened {} at {} baud (unit filter: {})",
        settings.path,
        settings.baud_rate,
        settings.unit_id
    );

    let server = Server::new(stream);
    let service = service.with_session(handle.session_guard());
    handle.ready(None);

    tokio::select! {
        _ = handle.shutdown_requested() => {
            tracing::info!("closing {}", settings.path);
            Ok(())
        }
        result = server.serve_forever(service) => {
            result.map_err(|err| format!("serial port {} failed: {}", settings.path, err))
        }
    }
}

#[async_trait::async_trait]
impl Transport for RtuTransport {
    fn kind(&self) -> &'static str {
        "rtu"
    }

    fn state(&self) -> TransportState {
        self.lifecycle.state()
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        let service = EmulatorService::new(
            ServiceVector::new(self.handler.clone()),
            self.settings.unit_id,
        );
        let settings = self.settings.clone();
        self.lifecycle
            .start(move |handle| run_server(settings, service, handle))
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
}

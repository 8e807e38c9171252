use std::time::Duration;

use crate::exception::ExceptionCode;
use crate::types::UnitId;

/// Errors that occur while parsing a raw request frame
///
/// Every variant is answered on the wire with [`ExceptionCode::IllegalDataValue`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The frame ended before all declared fields were read
    #[error("insufficient bytes for the declared request fields")]
    InsufficientBytes,
    /// The frame contains bytes after the last declared field
    #[error("request contains {0} trailing byte(s)")]
    TrailingBytes(usize),
    /// A quantity of zero was requested
    #[error("range contains count == 0")]
    CountOfZero,
    /// The quantity exceeds the limit for the function code
    #[error("count of {0} exceeds the maximum of {1} allowed for this function")]
    CountTooLarge(u16, u16),
    /// The start address plus count exceeds the 16-bit address space
    #[error("start == {0} and count = {1} would overflow the representation of u16")]
    AddressOverflow(u16, u16),
    /// The byte count field does not match the quantity
    #[error("byte count of {0} does not match the expected value of {1}")]
    ByteCountMismatch(usize, usize),
}

impl From<scursor::ReadError> for RequestError {
    fn from(_: scursor::ReadError) -> Self {
        RequestError::InsufficientBytes
    }
}

/// Errors raised by the register store
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No device is registered under the unit id
    #[error("no device registered for unit id {0}")]
    DeviceNotFound(UnitId),
}

/// Errors raised when adding devices to an emulator
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// 0 is the broadcast address and 248..=255 are reserved
    #[error("unit id {0} is reserved, devices must use 1..=247")]
    InvalidUnitId(u8),
    /// A device with the same unit id is already registered
    #[error("a device with unit id {0} already exists")]
    DuplicateUnitId(u8),
}

/// Errors that reject a transport `start()` or `stop()` call
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// `start()` was called while the transport was not stopped
    #[error("transport is already started")]
    AlreadyStarted,
    /// An operation that requires a running transport was attempted
    #[error("transport is not started")]
    NotStarted,
    /// The carrier did not signal readiness in time
    #[error("transport did not initialize within {0:?}")]
    InitTimeout(Duration),
    /// The carrier reported an error while initializing
    #[error("transport failed to initialize: {0}")]
    InitFailure(String),
    /// The carrier reported an error while closing
    #[error("transport failed to close: {0}")]
    CloseFailure(String),
}

/// Errors raised to a wire-library callback while bridging it to the frame handler
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// `on_request` was never called on the transport
    #[error("No request handler set")]
    NoHandler,
    /// The response frame is too short or does not match the request
    #[error("Invalid response")]
    InvalidResponse,
    /// The handler answered with an exception response
    #[error("exception response: {0}")]
    Exception(ExceptionCode),
}

/// Errors returned by the [`Transport`](crate::transport::Transport) contract
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// lifecycle failure
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// frame bridging failure
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("unable to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration is not valid JSON or does not match the schema
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// A delay range has min > max or a negative bound
    #[error("invalid delay range [{0}, {1}]")]
    InvalidDelayRange(f64, f64),
    /// A delay or timing value is negative or not finite
    #[error("invalid timing value {1} for '{0}'")]
    InvalidTimingValue(&'static str, f64),
    /// A register map key is not a 16-bit address
    #[error("invalid register address '{0}'")]
    InvalidAddress(String),
    /// A serial port setting is out of range
    #[error("invalid serial setting: {0}")]
    InvalidSerialSetting(String),
    /// The host and port do not form a socket address
    #[error("invalid socket address '{0}'")]
    InvalidSocketAddress(String),
    /// A device definition is invalid
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Top-level error type returned by the [`Emulator`](crate::Emulator)
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    /// transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// device set failure
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<LifecycleError> for EmulatorError {
    fn from(err: LifecycleError) -> Self {
        EmulatorError::Transport(err.into())
    }
}

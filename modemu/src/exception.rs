use crate::constants::exceptions;

/// Exception codes carried by `[unit, fc | 0x80, code]` response frames
///
/// The dispatcher only ever produces three of them. The rest can still arrive from a
/// custom frame handler and are passed to the wire unchanged.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub enum ExceptionCode {
    /// 0x01, answered for every function code other than 0x01 to 0x06 and 0x10
    IllegalFunction,
    /// 0x02, never produced by the dispatcher: unset addresses read as zero
    IllegalDataAddress,
    /// 0x03, answered for malformed requests: short or trailing bytes, a quantity of
    /// zero or above the function limit, address overflow, or a byte count mismatch
    IllegalDataValue,
    /// 0x04, produced at the wire when no frame handler is set or the handler
    /// returns a frame that does not match the request
    ServerDeviceFailure,
    /// 0x05, only forwarded from a custom handler
    Acknowledge,
    /// 0x06, only forwarded from a custom handler
    ServerDeviceBusy,
    /// 0x08, only forwarded from a custom handler
    MemoryParityError,
    /// 0x0A, only forwarded from a custom handler
    GatewayPathUnavailable,
    /// 0x0B, answered for a unit id with no device, including a device removed while
    /// its response was delayed
    GatewayTargetDeviceFailedToRespond,
    /// Any other code returned by a custom handler
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(value: u8) -> Self {
        match value {
            exceptions::ILLEGAL_FUNCTION => ExceptionCode::IllegalFunction,
            exceptions::ILLEGAL_DATA_ADDRESS => ExceptionCode::IllegalDataAddress,
            exceptions::ILLEGAL_DATA_VALUE => ExceptionCode::IllegalDataValue,
            exceptions::SERVER_DEVICE_FAILURE => ExceptionCode::ServerDeviceFailure,
            exceptions::ACKNOWLEDGE => ExceptionCode::Acknowledge,
            exceptions::SERVER_DEVICE_BUSY => ExceptionCode::ServerDeviceBusy,
            exceptions::MEMORY_PARITY_ERROR => ExceptionCode::MemoryParityError,
            exceptions::GATEWAY_PATH_UNAVAILABLE => ExceptionCode::GatewayPathUnavailable,
            exceptions::GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND => {
                ExceptionCode::GatewayTargetDeviceFailedToRespond
            }
            _ => ExceptionCode::Unknown(value),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(ex: ExceptionCode) -> Self {
        match ex {
            ExceptionCode::IllegalFunction => exceptions::ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => exceptions::ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => exceptions::ILLEGAL_DATA_VALUE,
            ExceptionCode::ServerDeviceFailure => exceptions::SERVER_DEVICE_FAILURE,
            ExceptionCode::Acknowledge => exceptions::ACKNOWLEDGE,
            ExceptionCode::ServerDeviceBusy => exceptions::SERVER_DEVICE_BUSY,
            ExceptionCode::MemoryParityError => exceptions::MEMORY_PARITY_ERROR,
            ExceptionCode::GatewayPathUnavailable => exceptions::GATEWAY_PATH_UNAVAILABLE,
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                exceptions::GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND
            }
            ExceptionCode::Unknown(value) => value,
        }
    }
}

impl std::error::Error for ExceptionCode {}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        match self {
            ExceptionCode::IllegalFunction => f.write_str("function code is not emulated"),
            ExceptionCode::IllegalDataAddress => f.write_str("data address is not allowed"),
            ExceptionCode::IllegalDataValue => f.write_str("request is malformed or exceeds the protocol limits"),
            ExceptionCode::ServerDeviceFailure => f.write_str("request could not be passed to the emulated device"),
            ExceptionCode::Acknowledge => f.write_str("server has accepted the request and is processing it"),
            ExceptionCode::ServerDeviceBusy => f.write_str("server is engaged in processing a long-duration program command, try again later"),
            ExceptionCode::MemoryParityError => f.write_str("server detected a parity error in the memory"),
            ExceptionCode::GatewayPathUnavailable => f.write_str("gateway was unable to allocate an internal communication path"),
            ExceptionCode::GatewayTargetDeviceFailedToRespond => f.write_str("no emulated device has this unit id"),
            ExceptionCode::Unknown(code) => write!(f, "non-standard exception code {code:#04X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_used_by_the_dispatcher_have_standard_values() {
        assert_eq!(u8::from(ExceptionCode::IllegalFunction), 0x01);
        assert_eq!(u8::from(ExceptionCode::IllegalDataValue), 0x03);
        assert_eq!(u8::from(ExceptionCode::GatewayTargetDeviceFailedToRespond), 0x0B);
    }

    #[test]
    fn display_describes_the_emulator_condition() {
        assert_eq!(
            ExceptionCode::GatewayTargetDeviceFailedToRespond.to_string(),
            "no emulated device has this unit id"
        );
        assert_eq!(
            ExceptionCode::Unknown(0x42).to_string(),
            "non-standard exception code 0x42"
        );
    }

    #[test]
    fn unknown_codes_are_preserved() {
        assert_eq!(ExceptionCode::from(0x7F), ExceptionCode::Unknown(0x7F));
        assert_eq!(u8::from(ExceptionCode::Unknown(0x7F)), 0x7F);
    }
}

use std::sync::Arc;

use scursor::ReadCursor;

use crate::common::function::FunctionCode;
use crate::decode::{DecodeLevel, FrameDisplay};
use crate::error::StoreError;
use crate::exception::ExceptionCode;
use crate::store::RegisterStore;
use crate::types::{coil_from_u16, UnitId};

use super::request::{Request, RequestDisplay};
use super::response::{encode, encode_exception, Reply};

/// A decoded request that passed unit id and function code checks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    unit: UnitId,
    request: Request,
}

impl Transaction {
    /// Unit id the request is addressed to
    pub fn unit_id(&self) -> UnitId {
        self.unit
    }

    /// Function code of the request
    pub fn function_code(&self) -> u8 {
        self.request.get_function().get_value()
    }

    /// Registers addressed by the request, 1 for single writes
    pub fn register_count(&self) -> u16 {
        self.request.register_count()
    }
}

/// Decodes raw request frames and executes them against a [`RegisterStore`]
///
/// Protocol faults never surface as errors: every path produces a response frame,
/// either a success reply or `[unit, fc | 0x80, code]`.
pub struct Dispatcher {
    store: Arc<RegisterStore>,
    decode: DecodeLevel,
}

impl Dispatcher {
    /// Create a dispatcher over a shared store
    pub fn new(store: Arc<RegisterStore>, decode: DecodeLevel) -> Self {
        Self { store, decode }
    }

    /// Store the dispatcher executes against
    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    /// Decode and validate a frame, or produce the exception frame that answers it
    ///
    /// `unit_hint` is only used when the frame is too short to carry a unit id.
    pub fn decode(&self, unit_hint: UnitId, frame: &[u8]) -> Result<Transaction, Vec<u8>> {
        if self.decode.enabled() {
            tracing::info!("FRAME RX - {}", FrameDisplay::new(self.decode, frame));
        }

        let (unit, fc, body) = match frame {
            [unit, fc, body @ ..] => (UnitId::new(*unit), *fc, body),
            [unit] => {
                let unit = UnitId::new(*unit);
                return Err(self.reject(unit, 0, self.missing_device_or(unit, ExceptionCode::IllegalDataValue)));
            }
            [] => {
                tracing::debug!("empty request frame for unit {}", unit_hint);
                return Err(self.reject(unit_hint, 0, ExceptionCode::IllegalDataValue));
            }
        };

        if !self.store.contains(unit) {
            tracing::debug!("no device for unit {}", unit);
            return Err(self.reject(unit, fc, ExceptionCode::GatewayTargetDeviceFailedToRespond));
        }

        let function = match FunctionCode::get(fc) {
            Some(x) => x,
            None => {
                tracing::debug!("unsupported function code {:#04X} for unit {}", fc, unit);
                return Err(self.reject(unit, fc, ExceptionCode::IllegalFunction));
            }
        };

        let mut cursor = ReadCursor::new(body);
        match Request::parse(function, &mut cursor) {
            Ok(request) => {
                if self.decode.header_enabled() {
                    tracing::info!("PDU RX - {}", RequestDisplay::new(self.decode, &request));
                }
                Ok(Transaction { unit, request })
            }
            Err(err) => {
                tracing::debug!("malformed {} for unit {}: {}", function, unit, err);
                Err(self.reject(unit, fc, ExceptionCode::IllegalDataValue))
            }
        }
    }

    /// Perform the register operation of a decoded transaction and encode the reply
    pub fn execute(&self, transaction: &Transaction) -> Vec<u8> {
        let unit = transaction.unit;
        let function = transaction.request.get_function();
        let store = &self.store;

        let result = match &transaction.request {
            Request::ReadCoils(range) => store
                .read_coils(unit, range.start, range.count)
                .map(Reply::Bits),
            Request::ReadDiscreteInputs(range) => store
                .read_discrete(unit, range.start, range.count)
                .map(Reply::Bits),
            Request::ReadHoldingRegisters(range) => store
                .read_holding(unit, range.start, range.count)
                .map(Reply::Registers),
            Request::ReadInputRegisters(range) => store
                .read_input(unit, range.start, range.count)
                .map(Reply::Registers),
            Request::WriteSingleCoil(x) => store
                .write_coil(unit, x.index, coil_from_u16(x.value))
                .map(|_| Reply::Echo(*x)),
            Request::WriteSingleRegister(x) => store
                .write_holding(unit, x.index, &[x.value])
                .map(|_| Reply::Echo(*x)),
            Request::WriteMultipleRegisters(range, values) => store
                .write_holding(unit, range.start, values)
                .map(|_| Reply::WriteMultiple(*range)),
        };

        match result {
            Ok(reply) => match encode(unit, function, &reply) {
                Ok(frame) => self.respond(frame),
                Err(err) => {
                    tracing::error!("unable to encode {} reply: {}", function, err);
                    self.reject(unit, function.get_value(), ExceptionCode::ServerDeviceFailure)
                }
            },
            Err(StoreError::DeviceNotFound(_)) => {
                // removed while the response was delayed
                tracing::debug!("device {} removed before {} completed", unit, function);
                self.reject(
                    unit,
                    function.get_value(),
                    ExceptionCode::GatewayTargetDeviceFailedToRespond,
                )
            }
        }
    }

    /// Decode and execute in one step, without any artificial delay
    pub fn dispatch(&self, unit_hint: UnitId, frame: &[u8]) -> Vec<u8> {
        match self.decode(unit_hint, frame) {
            Ok(transaction) => self.execute(&transaction),
            Err(response) => response,
        }
    }

    fn missing_device_or(&self, unit: UnitId, otherwise: ExceptionCode) -> ExceptionCode {
        if self.store.contains(unit) {
            otherwise
        } else {
            ExceptionCode::GatewayTargetDeviceFailedToRespond
        }
    }

    fn reject(&self, unit: UnitId, fc: u8, exception: ExceptionCode) -> Vec<u8> {
        if self.decode.header_enabled() {
            tracing::info!("PDU TX - exception {:#04X}: {}", u8::from(exception), exception);
        }
        self.respond(encode_exception(unit, fc, exception))
    }

    fn respond(&self, frame: Vec<u8>) -> Vec<u8> {
        if self.decode.enabled() {
            tracing::info!("FRAME TX - {}", FrameDisplay::new(self.decode, &frame));
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Device;

    fn dispatcher() -> Dispatcher {
        let store = RegisterStore::new();
        store
            .insert(
                Device::new(1)
                    .with_holding(0, 230)
                    .with_holding(1, 52)
                    .with_input(5, 0xBEEF)
                    .with_discrete(2, true),
            )
            .unwrap();
        store.insert(Device::new(2)).unwrap();
        Dispatcher::new(Arc::new(store), DecodeLevel::Payload)
    }

    fn dispatch(frame: &[u8]) -> Vec<u8> {
        dispatcher().dispatch(UnitId::new(frame.first().copied().unwrap_or(0)), frame)
    }

    #[test]
    fn reads_holding_registers() {
        assert_eq!(
            dispatch(&[1, 0x03, 0, 0, 0, 2]),
            vec![1, 0x03, 4, 0x00, 0xE6, 0x00, 0x34]
        );
    }

    #[test]
    fn reads_input_registers_and_discrete_inputs() {
        assert_eq!(dispatch(&[1, 0x04, 0, 5, 0, 1]), vec![1, 0x04, 2, 0xBE, 0xEF]);
        assert_eq!(dispatch(&[1, 0x02, 0, 0, 0, 3]), vec![1, 0x02, 1, 0b100]);
    }

    #[test]
    fn write_single_coil_echoes_the_request() {
        let dispatcher = dispatcher();
        let request = [1, 0x05, 0, 0, 0xFF, 0x00];
        assert_eq!(dispatcher.dispatch(UnitId::new(1), &request), request.to_vec());
        assert_eq!(
            dispatcher.dispatch(UnitId::new(1), &[1, 0x01, 0, 0, 0, 1]),
            vec![1, 0x01, 1, 0x01]
        );
    }

    #[test]
    fn write_single_register_echoes_and_stores() {
        let dispatcher = dispatcher();
        let request = [2, 0x06, 0, 9, 0x12, 0x34];
        assert_eq!(dispatcher.dispatch(UnitId::new(2), &request), request.to_vec());
        assert_eq!(
            dispatcher.store().read_holding(UnitId::new(2), 9, 1),
            Ok(vec![0x1234])
        );
    }

    #[test]
    fn write_multiple_registers_replies_with_range() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher.dispatch(UnitId::new(2), &[2, 0x10, 0, 1, 0, 2, 4, 0xCA, 0xFE, 0xBB, 0xDD]),
            vec![2, 0x10, 0, 1, 0, 2]
        );
        assert_eq!(
            dispatcher.store().read_holding(UnitId::new(2), 0, 3),
            Ok(vec![0, 0xCAFE, 0xBBDD])
        );
    }

    #[test]
    fn unknown_unit_is_a_gateway_exception() {
        assert_eq!(dispatch(&[9, 0x03, 0, 0, 0, 1]), vec![9, 0x83, 0x0B]);
        assert_eq!(dispatch(&[9, 0x2B, 0x0E]), vec![9, 0xAB, 0x0B]);
        assert_eq!(dispatch(&[9]), vec![9, 0x80, 0x0B]);
    }

    #[test]
    fn unsupported_function_is_illegal_function() {
        assert_eq!(dispatch(&[1, 0x0F, 0, 0, 0, 1, 1, 1]), vec![1, 0x8F, 0x01]);
        assert_eq!(dispatch(&[1, 0x07]), vec![1, 0x87, 0x01]);
    }

    #[test]
    fn malformed_requests_are_illegal_data_value() {
        assert_eq!(dispatch(&[1, 0x03, 0, 0]), vec![1, 0x83, 0x03]);
        assert_eq!(dispatch(&[1, 0x03, 0, 0, 0, 0]), vec![1, 0x83, 0x03]);
        assert_eq!(dispatch(&[1, 0x03, 0xFF, 0xFF, 0, 2]), vec![1, 0x83, 0x03]);
        assert_eq!(dispatch(&[1, 0x06, 0, 0, 0, 1, 0]), vec![1, 0x86, 0x03]);
        assert_eq!(dispatch(&[1]), vec![1, 0x80, 0x03]);
        assert_eq!(
            dispatcher().dispatch(UnitId::new(4), &[]),
            vec![4, 0x80, 0x03]
        );
    }

    #[test]
    fn register_count_follows_the_request() {
        let dispatcher = dispatcher();
        let count = |frame: &[u8]| {
            dispatcher
                .decode(UnitId::new(1), frame)
                .map(|x| x.register_count())
        };
        assert_eq!(count(&[1, 0x01, 0, 0, 0, 16]), Ok(16));
        assert_eq!(count(&[1, 0x05, 0, 0, 0, 0]), Ok(1));
        assert_eq!(count(&[1, 0x10, 0, 0, 0, 1, 2, 0, 1]), Ok(1));
    }

    #[test]
    fn device_removed_after_decode_is_a_gateway_exception() {
        let dispatcher = dispatcher();
        let transaction = dispatcher.decode(UnitId::new(2), &[2, 0x03, 0, 0, 0, 1]).unwrap();
        assert!(dispatcher.store().remove(UnitId::new(2)));
        assert_eq!(dispatcher.execute(&transaction), vec![2, 0x83, 0x0B]);
    }
}

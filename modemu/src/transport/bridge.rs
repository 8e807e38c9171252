use crate::codec::request::Request;
use crate::codec::response::{parse_reply, Reply};
use crate::common::bits::pack_bits;
use crate::common::cursor::WriteCursor;
use crate::constants::EXCEPTION_MASK;
use crate::error::BridgeError;
use crate::exception::ExceptionCode;
use crate::transport::HandlerSlot;
use crate::types::{coil_to_u16, AddressRange, Indexed, UnitId};

/// Turns per-operation service calls into raw frames passed through the frame handler
#[derive(Clone, Default)]
pub(crate) struct ServiceVector {
    handler: HandlerSlot,
}

impl ServiceVector {
    pub(crate) fn new(handler: HandlerSlot) -> Self {
        Self { handler }
    }

    pub(crate) async fn get_coils(
        &self,
        unit: UnitId,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, BridgeError> {
        match self
            .read(unit, 0x01, start, count, Request::ReadCoils)
            .await?
        {
            Reply::Bits(bits) => Ok(bits),
            _ => Err(BridgeError::InvalidResponse),
        }
    }

    pub(crate) async fn get_discrete_inputs(
        &self,
        unit: UnitId,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, BridgeError> {
        match self
            .read(unit, 0x02, start, count, Request::ReadDiscreteInputs)
            .await?
        {
            Reply::Bits(bits) => Ok(bits),
            _ => Err(BridgeError::InvalidResponse),
        }
    }

    pub(crate) async fn get_holding_registers(
        &self,
        unit: UnitId,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, BridgeError> {
        match self
            .read(unit, 0x03, start, count, Request::ReadHoldingRegisters)
            .await?
        {
            Reply::Registers(values) => Ok(values),
            _ => Err(BridgeError::InvalidResponse),
        }
    }

    pub(crate) async fn get_input_registers(
        &self,
        unit: UnitId,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, BridgeError> {
        match self
            .read(unit, 0x04, start, count, Request::ReadInputRegisters)
            .await?
        {
            Reply::Registers(values) => Ok(values),
            _ => Err(BridgeError::InvalidResponse),
        }
    }

    /// returns the echoed address and coil state
    pub(crate) async fn set_coil(
        &self,
        unit: UnitId,
        address: u16,
        value: bool,
    ) -> Result<(u16, bool), BridgeError> {
        let request = Request::WriteSingleCoil(Indexed::new(address, coil_to_u16(value)));
        match self.exchange(unit, &request).await? {
            Reply::Echo(x) => Ok((x.index, crate::types::coil_from_u16(x.value))),
            _ => Err(BridgeError::InvalidResponse),
        }
    }

    /// returns the echoed address and value
    pub(crate) async fn set_register(
        &self,
        unit: UnitId,
        address: u16,
        value: u16,
    ) -> Result<(u16, u16), BridgeError> {
        let request = Request::WriteSingleRegister(Indexed::new(address, value));
        match self.exchange(unit, &request).await? {
            Reply::Echo(x) => Ok((x.index, x.value)),
            _ => Err(BridgeError::InvalidResponse),
        }
    }

    /// returns the start address and quantity written
    pub(crate) async fn set_registers(
        &self,
        unit: UnitId,
        start: u16,
        values: &[u16],
    ) -> Result<(u16, u16), BridgeError> {
        let range = u16::try_from(values.len())
            .ok()
            .and_then(|count| AddressRange::try_from(start, count).ok());

        let range = match range {
            Some(range) => range,
            None => {
                let mut frame = vec![unit.value, 0x10];
                frame.extend_from_slice(&start.to_be_bytes());
                frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
                frame.push((2 * values.len()) as u8);
                return Err(self.reject(unit, frame).await);
            }
        };

        let request = Request::WriteMultipleRegisters(range, values.to_vec());
        match self.exchange(unit, &request).await? {
            Reply::WriteMultiple(range) => Ok((range.start, range.count)),
            _ => Err(BridgeError::InvalidResponse),
        }
    }

    /// forward write multiple coils, which the engine does not emulate
    pub(crate) async fn set_coils(&self, unit: UnitId, start: u16, values: &[bool]) -> BridgeError {
        let packed = pack_bits(values);
        let mut frame = vec![unit.value, 0x0F];
        frame.extend_from_slice(&start.to_be_bytes());
        frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
        frame.push(packed.len() as u8);
        frame.extend_from_slice(&packed);
        self.reject(unit, frame).await
    }

    /// forward a request for a function the engine does not emulate
    pub(crate) async fn unsupported(&self, unit: UnitId, function: u8, data: &[u8]) -> BridgeError {
        let mut frame = vec![unit.value, function];
        frame.extend_from_slice(data);
        self.reject(unit, frame).await
    }

    async fn read(
        &self,
        unit: UnitId,
        function: u8,
        start: u16,
        count: u16,
        request: fn(AddressRange) -> Request,
    ) -> Result<Reply, BridgeError> {
        match AddressRange::try_from(start, count) {
            Ok(range) => self.exchange(unit, &request(range)).await,
            Err(_) => {
                let mut frame = vec![unit.value, function];
                frame.extend_from_slice(&start.to_be_bytes());
                frame.extend_from_slice(&count.to_be_bytes());
                Err(self.reject(unit, frame).await)
            }
        }
    }

    async fn exchange(&self, unit: UnitId, request: &Request) -> Result<Reply, BridgeError> {
        let mut buffer = vec![0u8; request.encoded_len()];
        let mut cursor = WriteCursor::new(&mut buffer);
        if let Err(err) = request.serialize(unit, &mut cursor) {
            tracing::error!("unable to synthesize request frame: {}", err);
            return Err(BridgeError::InvalidResponse);
        }
        let frame = cursor.written().to_vec();
        let response = self.handler.exchange(unit, frame).await?;
        parse_reply(request, &response)
    }

    /// send a frame the engine will refuse and surface its exception code
    async fn reject(&self, unit: UnitId, frame: Vec<u8>) -> BridgeError {
        match self.handler.exchange(unit, frame).await {
            Ok(response) => match response.as_slice() {
                [_, fc, code, ..] if fc & EXCEPTION_MASK != 0 => {
                    BridgeError::Exception(ExceptionCode::from(*code))
                }
                _ => BridgeError::InvalidResponse,
            },
            Err(err) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::Dispatcher;
    use crate::decode::DecodeLevel;
    use crate::store::{Device, RegisterStore};
    use crate::transport::{FrameFuture, FrameHandler};

    fn vector_over(store: RegisterStore) -> ServiceVector {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(store), DecodeLevel::Nothing));
        let slot = HandlerSlot::default();
        let handler: FrameHandler = Arc::new(move |unit: UnitId, frame: Vec<u8>| -> FrameFuture {
            let dispatcher = dispatcher.clone();
            Box::pin(async move { dispatcher.dispatch(unit, &frame) })
        });
        slot.set(handler);
        ServiceVector::new(slot)
    }

    fn fixed(response: Vec<u8>) -> ServiceVector {
        let slot = HandlerSlot::default();
        slot.set(Arc::new(move |_unit: UnitId, _frame: Vec<u8>| -> FrameFuture {
            let response = response.clone();
            Box::pin(async move { response })
        }));
        ServiceVector::new(slot)
    }

    fn store() -> RegisterStore {
        let store = RegisterStore::new();
        store
            .insert(Device::new(1).with_holding(0, 230).with_holding(1, 52))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn reads_and_writes_through_the_dispatcher() {
        let vector = vector_over(store());
        let unit = UnitId::new(1);
        assert_eq!(vector.get_holding_registers(unit, 0, 2).await, Ok(vec![230, 52]));
        assert_eq!(vector.set_register(unit, 5, 0xABCD).await, Ok((5, 0xABCD)));
        assert_eq!(vector.set_registers(unit, 6, &[1, 2]).await, Ok((6, 2)));
        assert_eq!(
            vector.get_holding_registers(unit, 5, 3).await,
            Ok(vec![0xABCD, 1, 2])
        );
        assert_eq!(vector.set_coil(unit, 3, true).await, Ok((3, true)));
        assert_eq!(
            vector.get_coils(unit, 2, 2).await,
            Ok(vec![false, true])
        );
        assert_eq!(vector.get_input_registers(unit, 0, 1).await, Ok(vec![0]));
        assert_eq!(vector.get_discrete_inputs(unit, 0, 1).await, Ok(vec![false]));
    }

    #[tokio::test]
    async fn protocol_exceptions_are_surfaced() {
        let vector = vector_over(store());
        assert_eq!(
            vector.get_holding_registers(UnitId::new(2), 0, 1).await,
            Err(BridgeError::Exception(
                ExceptionCode::GatewayTargetDeviceFailedToRespond
            ))
        );
        assert_eq!(
            vector.get_holding_registers(UnitId::new(1), 0, 0).await,
            Err(BridgeError::Exception(ExceptionCode::IllegalDataValue))
        );
        assert_eq!(
            vector.set_coils(UnitId::new(1), 0, &[true]).await,
            BridgeError::Exception(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            vector.unsupported(UnitId::new(1), 0x2B, &[0x0E, 0x01, 0x00]).await,
            BridgeError::Exception(ExceptionCode::IllegalFunction)
        );
    }

    #[tokio::test]
    async fn missing_handler_is_reported() {
        let vector = ServiceVector::default();
        assert_eq!(
            vector.get_coils(UnitId::new(1), 0, 1).await,
            Err(BridgeError::NoHandler)
        );
    }

    #[tokio::test]
    async fn truncated_response_is_invalid() {
        let vector = fixed(vec![0x01, 0x03, 0x04, 0x00]);
        assert_eq!(
            vector.get_holding_registers(UnitId::new(1), 0, 2).await,
            Err(BridgeError::InvalidResponse)
        );
        let vector = fixed(vec![0x01]);
        assert_eq!(
            vector.set_register(UnitId::new(1), 0, 1).await,
            Err(BridgeError::InvalidResponse)
        );
    }
}

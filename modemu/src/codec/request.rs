use scursor::ReadCursor;

use crate::common::cursor::{InsufficientWriteSpace, WriteCursor};
use crate::common::function::FunctionCode;
use crate::constants::limits;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::types::{AddressRange, Indexed, UnitId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Request {
    ReadCoils(AddressRange),
    ReadDiscreteInputs(AddressRange),
    ReadHoldingRegisters(AddressRange),
    ReadInputRegisters(AddressRange),
    /// raw coil value as it appeared on the wire
    WriteSingleCoil(Indexed<u16>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleRegisters(AddressRange, Vec<u16>),
}

impl Request {
    pub(crate) fn get_function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// number of registers addressed, used for the per-register delay
    pub(crate) fn register_count(&self) -> u16 {
        match self {
            Request::ReadCoils(range)
            | Request::ReadDiscreteInputs(range)
            | Request::ReadHoldingRegisters(range)
            | Request::ReadInputRegisters(range)
            | Request::WriteMultipleRegisters(range, _) => range.count,
            Request::WriteSingleCoil(_) | Request::WriteSingleRegister(_) => 1,
        }
    }

    pub(crate) fn parse(
        function: FunctionCode,
        cursor: &mut ReadCursor,
    ) -> Result<Self, RequestError> {
        let request = match function {
            FunctionCode::ReadCoils => {
                Request::ReadCoils(parse_range(cursor, limits::MAX_READ_COILS_COUNT)?)
            }
            FunctionCode::ReadDiscreteInputs => {
                Request::ReadDiscreteInputs(parse_range(cursor, limits::MAX_READ_COILS_COUNT)?)
            }
            FunctionCode::ReadHoldingRegisters => Request::ReadHoldingRegisters(parse_range(
                cursor,
                limits::MAX_READ_REGISTERS_COUNT,
            )?),
            FunctionCode::ReadInputRegisters => Request::ReadInputRegisters(parse_range(
                cursor,
                limits::MAX_READ_REGISTERS_COUNT,
            )?),
            FunctionCode::WriteSingleCoil => {
                Request::WriteSingleCoil(Indexed::new(cursor.read_u16_be()?, cursor.read_u16_be()?))
            }
            FunctionCode::WriteSingleRegister => Request::WriteSingleRegister(Indexed::new(
                cursor.read_u16_be()?,
                cursor.read_u16_be()?,
            )),
            FunctionCode::WriteMultipleRegisters => {
                let range = parse_range(cursor, limits::MAX_WRITE_REGISTERS_COUNT)?;
                let byte_count = cursor.read_u8()? as usize;
                let expected = 2 * range.count as usize;
                if byte_count != expected {
                    return Err(RequestError::ByteCountMismatch(byte_count, expected));
                }
                let values = range
                    .iter()
                    .map(|_| cursor.read_u16_be())
                    .collect::<Result<Vec<u16>, scursor::ReadError>>()?;
                Request::WriteMultipleRegisters(range, values)
            }
        };
        expect_empty(cursor)?;
        Ok(request)
    }

    /// write `[unit, fc, fields...]` as a master would send it
    pub(crate) fn serialize(
        &self,
        unit: UnitId,
        cursor: &mut WriteCursor,
    ) -> Result<(), InsufficientWriteSpace> {
        cursor.write_u8(unit.value)?;
        cursor.write_u8(self.get_function().get_value())?;
        match self {
            Request::ReadCoils(range)
            | Request::ReadDiscreteInputs(range)
            | Request::ReadHoldingRegisters(range)
            | Request::ReadInputRegisters(range) => {
                cursor.write_u16_be(range.start)?;
                cursor.write_u16_be(range.count)?;
            }
            Request::WriteSingleCoil(x) | Request::WriteSingleRegister(x) => {
                cursor.write_u16_be(x.index)?;
                cursor.write_u16_be(x.value)?;
            }
            Request::WriteMultipleRegisters(range, values) => {
                cursor.write_u16_be(range.start)?;
                cursor.write_u16_be(range.count)?;
                cursor.write_u8((2 * values.len()) as u8)?;
                for value in values {
                    cursor.write_u16_be(*value)?;
                }
            }
        }
        Ok(())
    }

    /// length of the frame written by [`Request::serialize`]
    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            Request::WriteMultipleRegisters(_, values) => 7 + 2 * values.len(),
            _ => 6,
        }
    }
}

fn expect_empty(cursor: &ReadCursor) -> Result<(), RequestError> {
    cursor
        .expect_empty()
        .map_err(|_| RequestError::TrailingBytes(cursor.remaining()))
}

fn parse_range(cursor: &mut ReadCursor, limit: u16) -> Result<AddressRange, RequestError> {
    let start = cursor.read_u16_be()?;
    let count = cursor.read_u16_be()?;
    AddressRange::limited(start, count, limit)
}

pub(crate) struct RequestDisplay<'a> {
    request: &'a Request,
    level: DecodeLevel,
}

impl<'a> RequestDisplay<'a> {
    pub(crate) fn new(level: DecodeLevel, request: &'a Request) -> Self {
        Self { request, level }
    }
}

impl std::fmt::Display for RequestDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.request.get_function())?;

        match self.request {
            Request::ReadCoils(range)
            | Request::ReadDiscreteInputs(range)
            | Request::ReadHoldingRegisters(range)
            | Request::ReadInputRegisters(range) => {
                write!(f, " {range}")?;
            }
            Request::WriteSingleCoil(request) | Request::WriteSingleRegister(request) => {
                write!(f, " {request}")?;
            }
            Request::WriteMultipleRegisters(range, values) => {
                write!(f, " {range}")?;
                if self.level.payload_enabled() {
                    for (index, value) in range.iter().zip(values) {
                        write!(f, "\n{}", Indexed::new(index, *value))?;
                    }
                }
            }
        }

        Ok(())
    }
}

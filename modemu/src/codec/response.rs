use scursor::ReadCursor;

use crate::common::bits::{num_bytes_for_bits, pack_bits, unpack_bits};
use crate::common::cursor::{InsufficientWriteSpace, WriteCursor};
use crate::common::function::FunctionCode;
use crate::constants::{EXCEPTION_MASK, MAX_PDU_LENGTH};
use crate::error::{BridgeError, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{AddressRange, Indexed, UnitId};

use super::request::Request;

/// Body of a successful response
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    /// write single coil/register echo the address and raw value
    Echo(Indexed<u16>),
    WriteMultiple(AddressRange),
}

impl Reply {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InsufficientWriteSpace> {
        match self {
            Reply::Bits(bits) => {
                let packed = pack_bits(bits);
                cursor.write_u8(packed.len() as u8)?;
                cursor.write_bytes(&packed)
            }
            Reply::Registers(values) => {
                cursor.write_u8((2 * values.len()) as u8)?;
                for value in values {
                    cursor.write_u16_be(*value)?;
                }
                Ok(())
            }
            Reply::Echo(x) => {
                cursor.write_u16_be(x.index)?;
                cursor.write_u16_be(x.value)
            }
            Reply::WriteMultiple(range) => {
                cursor.write_u16_be(range.start)?;
                cursor.write_u16_be(range.count)
            }
        }
    }
}

/// `[unit, fc, body...]`
pub(crate) fn encode(
    unit: UnitId,
    function: FunctionCode,
    reply: &Reply,
) -> Result<Vec<u8>, InsufficientWriteSpace> {
    let mut buffer = [0u8; MAX_PDU_LENGTH + 1];
    let mut cursor = WriteCursor::new(&mut buffer);
    cursor.write_u8(unit.value)?;
    cursor.write_u8(function.get_value())?;
    reply.serialize(&mut cursor)?;
    Ok(cursor.written().to_vec())
}

/// `[unit, fc | 0x80, code]`
pub(crate) fn encode_exception(unit: UnitId, function: u8, exception: ExceptionCode) -> Vec<u8> {
    vec![unit.value, function | EXCEPTION_MASK, exception.into()]
}

/// Decode a response frame into the shape expected for `request`
pub(crate) fn parse_reply(request: &Request, frame: &[u8]) -> Result<Reply, BridgeError> {
    let function = request.get_function();
    let (fc, body) = match frame {
        [_unit, fc, body @ ..] => (*fc, body),
        _ => return Err(BridgeError::InvalidResponse),
    };

    if fc == function.as_error() {
        return match body.first() {
            Some(code) => Err(BridgeError::Exception(ExceptionCode::from(*code))),
            None => Err(BridgeError::InvalidResponse),
        };
    }

    if fc != function.get_value() {
        return Err(BridgeError::InvalidResponse);
    }

    let mut cursor = ReadCursor::new(body);
    parse_body(request, &mut cursor).map_err(|_| BridgeError::InvalidResponse)
}

fn parse_body(request: &Request, cursor: &mut ReadCursor) -> Result<Reply, RequestError> {
    match request {
        Request::ReadCoils(range) | Request::ReadDiscreteInputs(range) => {
            let byte_count = cursor.read_u8()? as usize;
            let expected = num_bytes_for_bits(range.count);
            if byte_count < expected {
                return Err(RequestError::ByteCountMismatch(byte_count, expected));
            }
            let bytes = cursor.read_bytes(byte_count)?;
            unpack_bits(bytes, range.count)
                .map(Reply::Bits)
                .ok_or(RequestError::InsufficientBytes)
        }
        Request::ReadHoldingRegisters(range) | Request::ReadInputRegisters(range) => {
            let byte_count = cursor.read_u8()? as usize;
            let expected = 2 * range.count as usize;
            if byte_count < expected {
                return Err(RequestError::ByteCountMismatch(byte_count, expected));
            }
            let values = range
                .iter()
                .map(|_| cursor.read_u16_be())
                .collect::<Result<Vec<u16>, scursor::ReadError>>()?;
            Ok(Reply::Registers(values))
        }
        Request::WriteSingleCoil(_) | Request::WriteSingleRegister(_) => Ok(Reply::Echo(
            Indexed::new(cursor.read_u16_be()?, cursor.read_u16_be()?),
        )),
        Request::WriteMultipleRegisters(_, _) => {
            let start = cursor.read_u16_be()?;
            let count = cursor.read_u16_be()?;
            Ok(Reply::WriteMultiple(AddressRange::try_from(start, count)?))
        }
    }
}

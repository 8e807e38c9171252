use std::future::Future;
use std::pin::Pin;

use tokio_modbus::prelude::{
    ExceptionCode as WireException, Request as WireRequest, Response as WireResponse,
    SlaveRequest,
};

use crate::error::BridgeError;
use crate::exception::ExceptionCode;
use crate::transport::bridge::ServiceVector;
use crate::transport::lifecycle::SessionGuard;
use crate::types::UnitId;

/// `tokio-modbus` server service backed by the frame handler
///
/// A response of `None` leaves the request unanswered.
#[derive(Clone)]
pub(crate) struct EmulatorService {
    vector: ServiceVector,
    filter: UnitId,
    session: Option<SessionGuard>,
}

impl EmulatorService {
    /// `filter` restricts the unit ids served, the wildcard serves every unit
    pub(crate) fn new(vector: ServiceVector, filter: UnitId) -> Self {
        Self {
            vector,
            filter,
            session: None,
        }
    }

    /// Abandon in-flight requests once the start cycle of `session` stops
    pub(crate) fn with_session(mut self, session: SessionGuard) -> Self {
        self.session = Some(session);
        self
    }

    async fn process(
        vector: ServiceVector,
        filter: UnitId,
        request: SlaveRequest<'static>,
    ) -> Result<Option<WireResponse>, WireException> {
        let unit = UnitId::new(request.slave);
        if !filter.is_wildcard() && filter != unit {
            tracing::debug!("ignoring request for unit {} (listening for {})", unit, filter);
            return Ok(None);
        }

        let result = match request.request {
            WireRequest::ReadCoils(start, count) => vector
                .get_coils(unit, start, count)
                .await
                .map(WireResponse::ReadCoils),
            WireRequest::ReadDiscreteInputs(start, count) => vector
                .get_discrete_inputs(unit, start, count)
                .await
                .map(WireResponse::ReadDiscreteInputs),
            WireRequest::ReadHoldingRegisters(start, count) => vector
                .get_holding_registers(unit, start, count)
                .await
                .map(WireResponse::ReadHoldingRegisters),
            WireRequest::ReadInputRegisters(start, count) => vector
                .get_input_registers(unit, start, count)
                .await
                .map(WireResponse::ReadInputRegisters),
            WireRequest::WriteSingleCoil(address, value) => vector
                .set_coil(unit, address, value)
                .await
                .map(|(address, value)| WireResponse::WriteSingleCoil(address, value)),
            WireRequest::WriteSingleRegister(address, value) => vector
                .set_register(unit, address, value)
                .await
                .map(|(address, value)| WireResponse::WriteSingleRegister(address, value)),
            WireRequest::WriteMultipleRegisters(start, values) => vector
                .set_registers(unit, start, &values)
                .await
                .map(|(start, count)| WireResponse::WriteMultipleRegisters(start, count)),
            WireRequest::WriteMultipleCoils(start, values) => {
                Err(vector.set_coils(unit, start, &values).await)
            }
            WireRequest::Custom(function, data) => {
                Err(vector.unsupported(unit, function, &data).await)
            }
            other => Err(vector
                .unsupported(unit, other.function_code().value(), &[])
                .await),
        };

        result.map(Some).map_err(into_wire_exception)
    }
}

impl tokio_modbus::server::Service for EmulatorService {
    type Request = SlaveRequest<'static>;
    type Response = Option<WireResponse>;
    type Exception = WireException;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Exception>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let work = Self::process(self.vector.clone(), self.filter, req);
        let Some(session) = &self.session else {
            return Box::pin(work);
        };
        let stopped = session.stopped();
        Box::pin(async move {
            tokio::select! {
                result = work => result,
                _ = stopped => {
                    tracing::debug!("transport stopped, request abandoned");
                    Ok(None)
                }
            }
        })
    }
}

fn into_wire_exception(err: BridgeError) -> WireException {
    match err {
        BridgeError::Exception(code) => match code {
            ExceptionCode::IllegalFunction => WireException::IllegalFunction,
            ExceptionCode::IllegalDataAddress => WireException::IllegalDataAddress,
            ExceptionCode::IllegalDataValue => WireException::IllegalDataValue,
            ExceptionCode::ServerDeviceFailure => WireException::ServerDeviceFailure,
            ExceptionCode::Acknowledge => WireException::Acknowledge,
            ExceptionCode::ServerDeviceBusy => WireException::ServerDeviceBusy,
            ExceptionCode::MemoryParityError => WireException::MemoryParityError,
            ExceptionCode::GatewayPathUnavailable => WireException::GatewayPathUnavailable,
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                WireException::GatewayTargetDevice
            }
            ExceptionCode::Unknown(value) => WireException::Custom(value),
        },
        BridgeError::NoHandler | BridgeError::InvalidResponse => {
            tracing::warn!("unable to bridge request: {}", err);
            WireException::ServerDeviceFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_failures_become_device_failures() {
        assert_eq!(
            into_wire_exception(BridgeError::NoHandler),
            WireException::ServerDeviceFailure
        );
        assert_eq!(
            into_wire_exception(BridgeError::InvalidResponse),
            WireException::ServerDeviceFailure
        );
        assert_eq!(
            into_wire_exception(BridgeError::Exception(
                ExceptionCode::GatewayTargetDeviceFailedToRespond
            )),
            WireException::GatewayTargetDevice
        );
    }

    #[tokio::test]
    async fn filter_rejects_other_units() {
        let service = EmulatorService::new(ServiceVector::default(), UnitId::new(3));
        let result = EmulatorService::process(
            service.vector.clone(),
            service.filter,
            SlaveRequest {
                slave: 4,
                request: WireRequest::ReadCoils(0, 1),
            },
        )
        .await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn filter_answers_its_own_unit() {
        let service = EmulatorService::new(ServiceVector::default(), UnitId::new(3));
        let result = EmulatorService::process(
            service.vector.clone(),
            service.filter,
            SlaveRequest {
                slave: 3,
                request: WireRequest::ReadCoils(0, 1),
            },
        )
        .await;
        // no handler installed, but the unit is served
        assert_eq!(result, Err(WireException::ServerDeviceFailure));
    }

    #[tokio::test]
    async fn missing_handler_is_a_device_failure() {
        let service = EmulatorService::new(ServiceVector::default(), UnitId::wildcard());
        let result = EmulatorService::process(
            service.vector.clone(),
            service.filter,
            SlaveRequest {
                slave: 1,
                request: WireRequest::ReadHoldingRegisters(0, 1),
            },
        )
        .await;
        assert_eq!(result, Err(WireException::ServerDeviceFailure));
    }
}

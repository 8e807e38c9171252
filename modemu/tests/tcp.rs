use std::net::SocketAddr;
use std::time::{Duration, Instant};

use modemu::error::{LifecycleError, TransportError};
use modemu::transport::{TcpTransport, Transport, TransportState};
use modemu::{DecodeLevel, DelaySpec, Device, Emulator, EmulatorError, TimingConfig, UnitId};
use tokio_modbus::prelude::*;

fn emulator() -> Emulator {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let emulator = Emulator::new(
        Box::new(TcpTransport::new("127.0.0.1", 0)),
        DecodeLevel::Header,
    );
    emulator
        .add_device(Device::new(1).with_holding(0, 230).with_holding(1, 52))
        .unwrap();
    emulator
        .add_device(Device::new(2).with_discrete(0, true).with_input(3, 0xBEEF))
        .unwrap();
    emulator
}

fn bound(emulator: &Emulator) -> SocketAddr {
    emulator.transport().local_addr().unwrap()
}

#[tokio::test]
async fn serves_requests_through_the_wire_library() {
    let mut emulator = emulator();
    emulator.start().await.unwrap();

    let mut ctx = client::tcp::connect_slave(bound(&emulator), Slave(1))
        .await
        .unwrap();

    assert_eq!(
        ctx.read_holding_registers(0, 2).await.unwrap(),
        Ok(vec![230, 52])
    );
    ctx.write_single_register(5, 0xCAFE).await.unwrap().unwrap();
    ctx.write_multiple_registers(6, &[1, 2]).await.unwrap().unwrap();
    ctx.write_single_coil(3, true).await.unwrap().unwrap();
    assert_eq!(
        ctx.read_holding_registers(5, 3).await.unwrap(),
        Ok(vec![0xCAFE, 1, 2])
    );
    assert_eq!(
        ctx.read_coils(0, 4).await.unwrap(),
        Ok(vec![false, false, false, true])
    );

    ctx.set_slave(Slave(2));
    assert_eq!(ctx.read_discrete_inputs(0, 2).await.unwrap(), Ok(vec![true, false]));
    assert_eq!(ctx.read_input_registers(3, 1).await.unwrap(), Ok(vec![0xBEEF]));
    // unit 2 is untouched by the writes to unit 1
    assert_eq!(ctx.read_holding_registers(5, 1).await.unwrap(), Ok(vec![0]));

    assert_eq!(
        emulator.store().read_holding(UnitId::new(1), 5, 1),
        Ok(vec![0xCAFE])
    );

    drop(ctx);
    emulator.stop().await.unwrap();
}

#[tokio::test]
async fn protocol_exceptions_reach_the_client() {
    let mut emulator = emulator();
    emulator.start().await.unwrap();

    let mut ctx = client::tcp::connect_slave(bound(&emulator), Slave(9))
        .await
        .unwrap();
    assert_eq!(
        ctx.read_holding_registers(0, 1).await.unwrap(),
        Err(ExceptionCode::GatewayTargetDevice)
    );

    ctx.set_slave(Slave(1));
    assert_eq!(
        ctx.write_multiple_coils(0, &[true, false]).await.unwrap(),
        Err(ExceptionCode::IllegalFunction)
    );

    drop(ctx);
    emulator.stop().await.unwrap();
}

#[tokio::test]
async fn start_stop_cycles_do_not_accumulate_listeners() {
    let mut emulator = emulator();
    assert_eq!(emulator.transport().listener_count(), 0);

    let mut counts = Vec::new();
    let mut previous = None;
    for _ in 0..5 {
        emulator.start().await.unwrap();
        assert_eq!(emulator.transport().state(), TransportState::Started);
        counts.push(emulator.transport().listener_count());

        let mut ctx = client::tcp::connect_slave(bound(&emulator), Slave(1))
            .await
            .unwrap();
        assert_eq!(ctx.read_holding_registers(0, 1).await.unwrap(), Ok(vec![230]));
        emulator.stop().await.unwrap();
        assert_eq!(emulator.transport().listener_count(), 0);

        // a session from an earlier cycle is never served again
        if let Some(mut old) = previous.replace(ctx) {
            assert!(old.read_holding_registers(0, 1).await.is_err());
        }
    }

    assert!(counts.iter().all(|x| *x == counts[0]));
    assert_eq!(counts[0], 1);
}

#[tokio::test]
async fn stop_closes_connected_sessions() {
    let mut emulator = emulator();
    emulator.start().await.unwrap();

    let mut ctx = client::tcp::connect_slave(bound(&emulator), Slave(1))
        .await
        .unwrap();
    assert_eq!(ctx.read_holding_registers(0, 1).await.unwrap(), Ok(vec![230]));

    emulator.stop().await.unwrap();
    assert!(ctx.read_holding_registers(0, 1).await.is_err());

    emulator.start().await.unwrap();
    assert!(ctx.read_holding_registers(0, 1).await.is_err());

    let mut fresh = client::tcp::connect_slave(bound(&emulator), Slave(1))
        .await
        .unwrap();
    assert_eq!(fresh.read_holding_registers(0, 1).await.unwrap(), Ok(vec![230]));

    drop(fresh);
    emulator.stop().await.unwrap();
}

#[tokio::test]
async fn stop_abandons_a_delayed_response() {
    let mut emulator = emulator();
    emulator
        .add_device(Device::new(7).with_timing(TimingConfig {
            processing_delay: Some(DelaySpec::Fixed(60_000.0)),
            ..TimingConfig::default()
        }))
        .unwrap();
    emulator.start().await.unwrap();

    let mut ctx = client::tcp::connect_slave(bound(&emulator), Slave(7))
        .await
        .unwrap();
    let pending = tokio::spawn(async move { ctx.write_single_register(4, 0xABCD).await });

    // the request is waiting on the device delay by now
    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    emulator.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_err());
    assert_eq!(
        emulator.store().read_holding(UnitId::new(7), 4, 1),
        Ok(vec![0])
    );
}

#[tokio::test]
async fn double_start_is_rejected_and_stop_without_start_succeeds() {
    let mut transport = TcpTransport::new("127.0.0.1", 0);
    transport.stop().await.unwrap();

    transport.start().await.unwrap();
    assert_eq!(
        transport.start().await,
        Err(TransportError::Lifecycle(LifecycleError::AlreadyStarted))
    );
    assert_eq!(transport.listener_count(), 1);
    assert_eq!(transport.send(UnitId::new(1), &[1, 3, 0, 0, 0, 1]).await, Ok(None));

    transport.stop().await.unwrap();
    transport.stop().await.unwrap();
    assert_eq!(
        transport.send(UnitId::new(1), &[1, 3, 0, 0, 0, 1]).await,
        Err(TransportError::Lifecycle(LifecycleError::NotStarted))
    );
}

#[tokio::test]
async fn port_in_use_fails_without_leaking_listeners() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut emulator = Emulator::new(
        Box::new(TcpTransport::new("127.0.0.1", port)),
        DecodeLevel::Nothing,
    );
    for _ in 0..2 {
        assert!(matches!(
            emulator.start().await,
            Err(EmulatorError::Transport(TransportError::Lifecycle(
                LifecycleError::InitFailure(_)
            )))
        ));
        assert_eq!(emulator.transport().state(), TransportState::Stopped);
        assert_eq!(emulator.transport().listener_count(), 0);
    }

    drop(occupied);
    emulator.start().await.unwrap();
    assert_eq!(emulator.transport().listener_count(), 1);
    emulator.stop().await.unwrap();
}

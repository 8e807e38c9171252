use modemu::config::{SerialConfig, TransportConfig};
use modemu::error::{LifecycleError, TransportError};
use modemu::transport::TransportState;
use modemu::{Emulator, EmulatorConfig, EmulatorError};

#[tokio::test]
async fn absent_serial_device_is_an_init_failure() {
    let config = EmulatorConfig {
        transport: TransportConfig::Rtu(SerialConfig::new("/dev/modemu-absent-port")),
        ..Default::default()
    };
    let mut emulator = Emulator::from_config(&config).unwrap();

    for _ in 0..3 {
        match emulator.start().await {
            Err(EmulatorError::Transport(TransportError::Lifecycle(
                LifecycleError::InitFailure(msg),
            ))) => assert!(msg.contains("/dev/modemu-absent-port")),
            other => panic!("unexpected start result: {other:?}"),
        }
        assert_eq!(emulator.transport().state(), TransportState::Stopped);
        assert_eq!(emulator.transport().listener_count(), 0);
    }

    emulator.stop().await.unwrap();
}

#[test]
fn invalid_serial_settings_are_rejected_when_building() {
    let config = EmulatorConfig {
        transport: TransportConfig::Rtu(SerialConfig {
            stop_bits: 3,
            ..SerialConfig::new("/dev/ttyS0")
        }),
        ..Default::default()
    };
    assert!(matches!(
        Emulator::from_config(&config),
        Err(EmulatorError::Config(_))
    ));
}

//! An emulator of [Modbus](http://modbus.org/) devices built on [Tokio](https://docs.rs/tokio)
//!
//! Any number of virtual devices, each addressed by a unit id, are served behind a single
//! carrier. Requests are decoded bit-exactly, executed against per-device register maps
//! and answered with either a normal response or a standard protocol exception.
//!
//! # Features
//!
//! * In-memory, Modbus TCP and Modbus RTU carriers behind one [`Transport`](transport::Transport) trait
//! * Per-device timing: detection, processing, per-register and transmission delays
//! * Panic-free parsing of raw request frames
//! * Leak-free start/stop cycles with bounded initialization
//!
//! # Supported Functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Registers
//!
//! Every other function code is answered with `ILLEGAL FUNCTION`.
//!
//! # Example
//!
//! ```
//! use modemu::{Device, Emulator, UnitId};
//!
//! # tokio_test::block_on(async {
//! let mut emulator = Emulator::in_memory();
//! emulator.add_device(Device::new(1).with_holding(0, 230).with_holding(1, 52))?;
//! emulator.start().await?;
//!
//! let response = emulator
//!     .handle_request(UnitId::new(1), vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
//!     .await;
//! assert_eq!(response, vec![0x01, 0x03, 0x04, 0x00, 0xE6, 0x00, 0x34]);
//!
//! emulator.stop().await?;
//! # Ok::<(), modemu::EmulatorError>(())
//! # }).unwrap();
//! ```

pub mod config;
/// Error types
pub mod error;
pub mod transport;

mod codec;
mod common;
mod constants;
mod decode;
mod emulator;
mod exception;
mod store;
mod timing;
mod types;

pub use crate::codec::{Dispatcher, Transaction};
pub use crate::config::EmulatorConfig;
pub use crate::constants::{MAX_UNIT_ID, UNIT_ID_WILDCARD};
pub use crate::decode::{DecodeLevel, HexDisplay};
pub use crate::emulator::Emulator;
pub use crate::error::EmulatorError;
pub use crate::exception::ExceptionCode;
pub use crate::store::{Device, RegisterBank, RegisterStore};
pub use crate::timing::{calculate_delay, DelaySpec, TimingConfig, TimingSimulator};
pub use crate::types::{AddressRange, Indexed, UnitId};

//! Raw frame codec and dispatcher
//!
//! Frames are PDUs prefixed by the unit id byte: `[unit, fc, data...]`.

pub(crate) mod dispatcher;
pub(crate) mod request;
pub(crate) mod response;

pub use dispatcher::{Dispatcher, Transaction};

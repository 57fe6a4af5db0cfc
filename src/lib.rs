//! Two-way ranging engine for Decawave/Qorvo UWB transceivers
//!
//! Measures the distance between a mobile tag and a fixed anchor using
//! single-sided two-way ranging (SS-TWR). The tag sends a POLL, the anchor
//! answers with a RESPONSE that carries its receive and transmit timestamps,
//! and the tag computes the time of flight from those and its own two
//! timestamps. A FINAL with the result goes back to the anchor.
//!
//! The crate is split into layers:
//!
//! - [`frame`]: the wire format of the ranging messages
//! - [`time`] and [`ranging`]: 40-bit timestamp arithmetic and the distance
//!   formulas
//! - [`session`]: one POLL → RESPONSE → FINAL exchange
//! - [`supervisor`]: the loop that runs sessions on a fixed cadence and
//!   recovers the transceiver after repeated failures
//!
//! The hardware is reached only through the [`Transceiver`] and
//! [`Indicator`] traits, together with `embedded-hal` timers and delays.
//! With the `sim` feature enabled, `sim` contains a simulated transceiver
//! for running all of this on a host.
//!
//! Logging goes through the [`log`] facade. Nothing is logged unless the
//! application installs a logger.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]


pub mod configs;
pub mod frame;
pub mod ranging;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod supervisor;
pub mod time;
pub mod transceiver;

mod error;


pub use embedded_hal;
pub use embedded_timeout_macros::{block_timeout, TimeoutError};

pub use crate::{
    error::{Error, ErrorKind, FrameError},
    frame::{FrameCodec, MessageType, RangingFrame},
    ranging::{compute_distance, Confidence, Distance, TwrFormula},
    session::{Measurement, Session},
    supervisor::{Clock, Supervisor, SupervisorState},
    time::{Duration, Instant, TIME_MAX},
    transceiver::{DeviceId, Indicator, Status, Transceiver},
};

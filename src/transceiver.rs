//! What the ranging engine needs from the hardware
//!
//! The engine never touches registers. It drives the radio through the
//! [`Transceiver`] trait and flashes an LED through the [`Indicator`] trait.
//! Both are implemented by the board support code. [`Led`] and [`ResetLine`]
//! cover the two pieces that are plain `embedded-hal` pin work.

use core::fmt;

use embedded_hal::{blocking::delay::DelayMs, digital::v2::OutputPin};

use crate::configs::RadioConfig;


/// Condensed view of the transceiver's status register
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// Neither transmitting nor receiving
    Idle,
    /// The last transmission has finished
    TxDone,
    /// A frame with a good FCS is waiting in the receive buffer
    RxGood,
    /// Reception failed (FCS, PHY header, SFD timeout and the like)
    RxError,
    /// A transmission or reception is still in progress
    Busy,
}


/// Radio transceiver capabilities used by the ranging engine
///
/// Status flags must stay set until [`Transceiver::clear_status`] is called.
/// While the TX-done flag is set, [`Transceiver::status`] reports
/// [`Status::TxDone`] no matter what the receiver is doing.
pub trait Transceiver {
    /// Bus or driver error
    type Error: fmt::Debug;

    /// Runs the hardware reset sequence
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Reads the chip's device ID register
    fn read_device_id(&mut self) -> Result<u32, Self::Error>;

    /// Applies channel, data rate, preamble, antenna delay and power settings
    fn configure(&mut self, config: &RadioConfig) -> Result<(), Self::Error>;

    /// Aborts any ongoing transmission or reception
    fn force_idle(&mut self) -> Result<(), Self::Error>;

    /// Starts transmitting `frame`
    ///
    /// If `ranging` is set, the transmission is timestamped precisely and the
    /// receiver is armed as soon as the frame is out.
    fn transmit(&mut self, frame: &[u8], ranging: bool) -> Result<(), Self::Error>;

    /// Arms the receiver
    fn start_receive(&mut self) -> Result<(), Self::Error>;

    /// Reads the current status
    fn status(&mut self) -> Result<Status, Self::Error>;

    /// Clears the flags behind `status`
    ///
    /// Clearing [`Status::TxDone`] leaves the receiver flags alone, so a
    /// response that arrives right after the POLL isn't lost.
    fn clear_status(&mut self, status: Status) -> Result<(), Self::Error>;

    /// Copies the received frame into `buffer`, without FCS, and returns its
    /// length
    fn read_frame(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;

    /// Reads the raw timestamp of the last transmission
    fn read_tx_timestamp(&mut self) -> Result<u64, Self::Error>;

    /// Reads the raw timestamp of the last reception
    fn read_rx_timestamp(&mut self) -> Result<u64, Self::Error>;
}


/// Identity of the radio chip, decoded from its device ID register
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceId {
    /// DW3000 revision C0
    Dw3000C0 {
        /// Whether the chip supports phase difference of arrival
        pdoa: bool,
    },
    /// DW3000 revision B0
    Dw3000B0 {
        /// Whether the chip supports phase difference of arrival
        pdoa: bool,
    },
    /// Something answered, but not with an ID we know
    Unknown(u32),
}

impl DeviceId {
    /// Decodes a raw device ID
    ///
    /// Returns `None` for all-zeroes and all-ones, which is what a dead bus
    /// reads as.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x0000_0000 | 0xffff_ffff => None,
            0xdeca_0302 => Some(DeviceId::Dw3000C0 { pdoa: false }),
            0xdeca_0312 => Some(DeviceId::Dw3000C0 { pdoa: true }),
            0xdeca_0301 => Some(DeviceId::Dw3000B0 { pdoa: false }),
            0xdeca_0311 => Some(DeviceId::Dw3000B0 { pdoa: true }),
            other => Some(DeviceId::Unknown(other)),
        }
    }

    /// Whether this is one of the known chip revisions
    pub fn is_known(&self) -> bool {
        !matches!(self, DeviceId::Unknown(_))
    }
}


/// A status indicator, usually an LED
///
/// Purely cosmetic. Implementations must neither block nor fail.
pub trait Indicator {
    /// Turns the indicator on; it stays on until [`Indicator::off`]
    fn pulse(&mut self);

    /// Turns the indicator off
    fn off(&mut self) {}
}

/// No indicator
impl Indicator for () {
    fn pulse(&mut self) {}
}

/// An LED driven by an output pin
///
/// [`Indicator::pulse`] switches the LED on without waiting. The supervisor
/// switches it off at the start of each cycle, so every transmitted frame
/// shows up as a flash.
pub struct Led<P>(P, Polarity);

/// Which pin level lights an LED
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Polarity {
    /// Pin high lights the LED
    ActiveHigh,
    /// Pin low lights the LED
    ActiveLow,
}

impl<P> Led<P>
where
    P: OutputPin,
{
    /// Wraps a pin. The LED starts switched off.
    pub fn new(pin: P, polarity: Polarity) -> Self {
        let mut led = Led(pin, polarity);
        led.disable();
        led
    }

    /// Enable the LED
    pub fn enable(&mut self) {
        // Pin errors are ignored.
        let _ = match self.1 {
            Polarity::ActiveHigh => self.0.set_high(),
            Polarity::ActiveLow => self.0.set_low(),
        };
    }

    /// Disable the LED
    pub fn disable(&mut self) {
        let _ = match self.1 {
            Polarity::ActiveHigh => self.0.set_low(),
            Polarity::ActiveLow => self.0.set_high(),
        };
    }

    /// Releases the pin
    pub fn free(self) -> P {
        self.0
    }
}

impl<P> Indicator for Led<P>
where
    P: OutputPin,
{
    fn pulse(&mut self) {
        self.enable();
    }

    fn off(&mut self) {
        self.disable();
    }
}

impl<P> fmt::Debug for Led<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Led({:?})", self.1)
    }
}


/// The transceiver's active-low reset input
///
/// Meant for use inside [`Transceiver::reset`] implementations.
pub struct ResetLine<P>(P);

impl<P> ResetLine<P>
where
    P: OutputPin,
{
    /// How long the reset line is held low, in milliseconds
    pub const ASSERT_MS: u32 = 10;

    /// How long the chip needs to start up after release, in milliseconds
    pub const STARTUP_MS: u32 = 50;

    /// Wraps the pin connected to the reset input and releases it
    pub fn new(pin: P) -> Result<Self, P::Error> {
        let mut line = ResetLine(pin);
        line.0.set_high()?;
        Ok(line)
    }

    /// Externally resets the transceiver
    ///
    /// Holds the line low for [`Self::ASSERT_MS`], releases it, then waits
    /// [`Self::STARTUP_MS`] for the chip to come up. There is no way to tell
    /// when the chip is ready, so the wait is a fixed delay.
    pub fn reset<D>(&mut self, delay: &mut D) -> Result<(), P::Error>
    where
        D: DelayMs<u32>,
    {
        log::info!("resetting transceiver");

        self.0.set_low()?;
        delay.delay_ms(Self::ASSERT_MS);

        self.0.set_high()?;
        delay.delay_ms(Self::STARTUP_MS);

        log::info!("transceiver reset complete");
        Ok(())
    }

    /// Releases the pin
    pub fn free(self) -> P {
        self.0
    }
}

impl<P> fmt::Debug for ResetLine<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResetLine")
    }
}

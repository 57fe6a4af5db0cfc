//! Configuration structs for the radio, the ranging exchange and the
//! supervisor loop
//!
//! All structs implement `Default` with the values the tag firmware ships
//! with, so most users only override the one or two fields they care about.

use serde::{Deserialize, Serialize};

use crate::ranging::SPEED_OF_LIGHT_AIR;


/// Radio configuration, handed to [`Transceiver::configure`]
///
/// [`Transceiver::configure`]: ../transceiver/trait.Transceiver.html#tymethod.configure
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RadioConfig {
    /// The channel that the transceiver will transmit and listen at
    pub channel: UwbChannel,
    /// Sets the bitrate of the transmission
    pub bitrate: BitRate,
    /// The length of the preamble
    pub preamble_length: PreambleLength,
    /// The preamble code used for TX and RX
    pub preamble_code: u8,
    /// SFD detection timeout, in symbols
    pub sfd_timeout: u16,
    /// Antenna delays that the transceiver adds to its timestamps
    pub antenna_delay: AntennaDelay,
    /// Transmit power and pulse shape
    pub tx_power: TxPower,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            channel: Default::default(),
            bitrate: Default::default(),
            preamble_length: Default::default(),
            preamble_code: 9,
            // preamble length + 1 + SFD length - PAC size
            sfd_timeout: 129 + 8 - 8,
            antenna_delay: Default::default(),
            tx_power: Default::default(),
        }
    }
}


#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// The bitrate at which a message is transmitted
pub enum BitRate {
    /// 850 kilobits per second.
    Kbps850 = 0b0,
    /// 6.8 megabits per second.
    Kbps6800 = 0b1,
}

impl Default for BitRate {
    fn default() -> Self {
        BitRate::Kbps6800
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// An enum that specifies the length of the preamble.
///
/// Longer preambles improve the reception quality and thus range.
/// This comes at the cost of longer transmission times and thus power consumption and bandwidth use.
pub enum PreambleLength {
    /// 32 symbols of preamble.
    Symbols32,
    /// 64 symbols of preamble.
    Symbols64,
    /// 128 symbols of preamble.
    Symbols128,
    /// 256 symbols of preamble.
    Symbols256,
    /// 512 symbols of preamble.
    Symbols512,
    /// 1024 symbols of preamble.
    Symbols1024,
}

impl Default for PreambleLength {
    fn default() -> Self {
        PreambleLength::Symbols128
    }
}

impl PreambleLength {
    /// Returns the preamble length in symbols
    pub fn symbols(&self) -> u16 {
        match self {
            PreambleLength::Symbols32 => 32,
            PreambleLength::Symbols64 => 64,
            PreambleLength::Symbols128 => 128,
            PreambleLength::Symbols256 => 256,
            PreambleLength::Symbols512 => 512,
            PreambleLength::Symbols1024 => 1024,
        }
    }

    /// Gets the recommended PAC size based on the preamble length.
    pub fn get_recommended_pac_size(&self) -> u8 {
        match self {
            PreambleLength::Symbols32 => 4,
            PreambleLength::Symbols64 => 8,
            PreambleLength::Symbols128 => 8,
            PreambleLength::Symbols256 => 16,
            PreambleLength::Symbols512 => 16,
            PreambleLength::Symbols1024 => 32,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// The UWB channels supported by the DW3000 family.
pub enum UwbChannel {
    /// Channel 5
    /// - Center frequency: 6489.6 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel5 = 5,
    /// Channel 9
    /// - Center frequency: 7987.2 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel9 = 9,
}

impl Default for UwbChannel {
    fn default() -> Self {
        UwbChannel::Channel5
    }
}

/// TX and RX antenna delays, in device time units
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct AntennaDelay {
    /// Added to every TX timestamp
    pub tx: u16,
    /// Subtracted from every RX timestamp
    pub rx: u16,
}

impl Default for AntennaDelay {
    fn default() -> Self {
        // Factory default for uncalibrated DW3000 modules
        AntennaDelay { tx: 16385, rx: 16385 }
    }
}

/// Transmit power settings
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct TxPower {
    /// Pulse generator delay
    pub pg_delay: u8,
    /// Per-segment power register value
    pub power: u32,
    /// Pulse generator count, 0 to skip PG calibration
    pub pg_count: u16,
}

impl Default for TxPower {
    fn default() -> Self {
        TxPower {
            pg_delay: 0x34,
            power: 0xfdfdfdfd,
            pg_count: 0,
        }
    }
}


/// Short addresses used in every ranging frame
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Addressing {
    /// The PAN that tag and anchor share
    pub pan_id: u16,
    /// This tag's short address
    pub tag: u16,
    /// The anchor's short address, or `0xffff` for broadcast
    pub anchor: u16,
}

impl Default for Addressing {
    fn default() -> Self {
        Addressing {
            pan_id: 0xdeca,
            tag: 0x0001,
            anchor: 0xffff,
        }
    }
}


/// Parameters of a single ranging exchange
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RangingConfig {
    /// How long to wait for the transceiver to report a finished
    /// transmission, in timer ticks (microseconds on most HALs)
    pub tx_timeout: u32,
    /// How long to wait for a valid RESPONSE, in timer ticks
    pub response_timeout: u32,
    /// Propagation speed used to convert time of flight to distance, in m/s
    pub speed_of_light: f64,
}

impl Default for RangingConfig {
    fn default() -> Self {
        RangingConfig {
            tx_timeout: 10_000,
            response_timeout: 3_000_000,
            speed_of_light: SPEED_OF_LIGHT_AIR,
        }
    }
}


/// Parameters of the ranging loop
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SupervisorConfig {
    /// Target cycle period, in milliseconds
    pub period_ms: u32,
    /// Consecutive failed cycles that trigger a re-initialization
    pub failure_threshold: u32,
    /// Pause after a re-initialization, in milliseconds
    pub reinit_settle_ms: u32,
    /// Pause between failed initialization attempts, in milliseconds
    pub init_retry_ms: u32,
    /// How long the indicator is lit at the start of each such pause, in
    /// milliseconds
    pub init_flash_ms: u32,
    /// Pause between a successful initialization and the first cycle, in
    /// milliseconds
    pub startup_settle_ms: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            period_ms: 1000,
            failure_threshold: 10,
            reinit_settle_ms: 100,
            init_retry_ms: 1000,
            init_flash_ms: 100,
            startup_settle_ms: 500,
        }
    }
}

impl SupervisorConfig {
    /// 20 Hz update rate
    pub fn fast() -> Self {
        SupervisorConfig {
            period_ms: 50,
            ..Default::default()
        }
    }
}

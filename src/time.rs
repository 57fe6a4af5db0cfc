//! Time-related types based on the transceiver's 40-bit system time
//!
//! The radio timestamps every frame it sends and receives with a 40-bit
//! counter running at 499.2 MHz × 128. One tick is called a device time unit
//! (DTU) and is roughly 15.65 ps. The counter wraps around about every 17.2
//! seconds, so every interval between two timestamps has to be computed
//! modulo 2^40.


use core::ops::Add;

use serde::{Deserialize, Serialize};


/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xffffffffff;

/// The number of distinct 40-bit time stamps
pub const TIME_MODULUS: u64 = TIME_MAX + 1;

/// Seconds per device time unit: 1 / (499.2 MHz × 128)
pub const DTU_SECONDS: f64 = 1.0 / (499.2e6 * 128.0);


/// Represents an instant in time
///
/// Internally uses the same 40-bit timestamps that the transceiver uses.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[repr(C)]
pub struct Instant(u64);

impl Instant {
    /// The zero instant, used to reset per-cycle timestamps
    pub const ZERO: Instant = Instant(0);

    /// Creates a new instance of `Instant`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_twr::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// let valid_instant   = Instant::new(TIME_MAX);
    /// let invalid_instant = Instant::new(TIME_MAX + 1);
    ///
    /// assert!(valid_instant.is_some());
    /// assert!(invalid_instant.is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        }
        else {
            None
        }
    }

    /// Creates an `Instant` from a raw register value, discarding everything
    /// above bit 39
    ///
    /// Timestamp registers are read into 64-bit integers, so the upper bits
    /// may carry garbage from neighbouring register fields.
    pub fn masked(raw: u64) -> Self {
        Instant(raw & TIME_MAX)
    }

    /// Decodes a 40-bit little-endian timestamp from the first 5 bytes of
    /// `bytes`
    ///
    /// Returns `None`, if fewer than 5 bytes are available.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..5)?;

        let mut buf = [0; 8];
        buf[..5].copy_from_slice(bytes);

        Some(Instant(u64::from_le_bytes(buf)))
    }

    /// Encodes the timestamp as 5 little-endian bytes
    pub fn to_le_bytes(&self) -> [u8; 5] {
        let bytes = self.0.to_le_bytes();

        let mut buf = [0; 5];
        buf.copy_from_slice(&bytes[..5]);
        buf
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. The counter wraps around, so comparing the numerical values
    /// doesn't tell anything about order. The result is always within
    /// `[0, 2^40)`.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_twr::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// // `unwrap`ing here is okay, since we're passing constants that we know
    /// // are in the valid range.
    /// let instant_1 = Instant::new(TIME_MAX - 50).unwrap();
    /// let instant_2 = Instant::new(TIME_MAX).unwrap();
    /// let instant_3 = Instant::new(49).unwrap();
    ///
    /// // Works as expected, if the later timestamp is larger than the earlier
    /// // one.
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.value(), 50);
    ///
    /// // Still works as expected, if the later timestamp is the numerically
    /// // smaller value.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        if self.value() >= earlier.value() {
            Duration(self.value() - earlier.value())
        }
        else {
            Duration(TIME_MAX - earlier.value() + self.value() + 1)
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        // Both operands are 40-bit numbers, so the sum fits comfortably in a
        // `u64` before the modulo brings it back into range.
        Instant((self.value() + rhs.value()) % TIME_MODULUS)
    }
}


/// A duration between two instants in transceiver system time
///
/// Internally uses the same 40-bit timestamps that the transceiver uses.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[repr(C)]
pub struct Duration(u64);

impl Duration {
    /// Creates a new instance of `Duration`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_twr::time::{
    ///     TIME_MAX,
    ///     Duration,
    /// };
    ///
    /// let valid_duration   = Duration::new(TIME_MAX);
    /// let invalid_duration = Duration::new(TIME_MAX + 1);
    ///
    /// assert!(valid_duration.is_some());
    /// assert!(invalid_duration.is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        }
        else {
            None
        }
    }

    /// Returns the raw 40-bit duration in device time units
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Converts the duration to seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 * DTU_SECONDS
    }
}


/// Determines the interval between two time stamps
///
/// This is the free-function form of [`Instant::duration_since`], returning
/// the raw number of device time units. Every interval used in a distance
/// formula goes through here, never through plain subtraction.
///
/// ``` rust
/// use uwb_twr::time::{elapsed, Instant, TIME_MODULUS};
///
/// let later   = Instant::new(5).unwrap();
/// let earlier = Instant::new(TIME_MODULUS - 3).unwrap();
///
/// assert_eq!(elapsed(later, earlier), 8);
/// ```
pub fn elapsed(later: Instant, earlier: Instant) -> i64 {
    // A 40-bit value always fits into an `i64`.
    later.duration_since(earlier).value() as i64
}

//! Distance computation from ranging timestamps
//!
//! Two formulas are provided behind the [`TwrFormula`] trait:
//!
//! - [`SingleSided`] uses the four timestamps of one POLL/RESPONSE round trip.
//!   It assumes both clocks run at the same rate, so clock drift over the
//!   anchor's reply delay shows up directly in the result.
//! - [`DoubleSided`] adds a second round trip (RESPONSE/FINAL) and cancels
//!   most of the drift. It needs the anchor's FINAL receive time, which the
//!   three-message exchange in this crate doesn't carry back to the tag, so
//!   it is only usable with timestamps collected by other means.
//!
//! ``` text
//! tag                         anchor
//!  poll_tx  |-----____               |
//!           |         ------->       | poll_rx
//!           |               ____-----| resp_tx
//!  resp_rx  | <-------------         |
//! ```
//!
//! The time of flight is half of what remains of the tag's round trip after
//! subtracting the anchor's reply delay.

use crate::time::{elapsed, Instant, DTU_SECONDS};


/// Speed of light in vacuum, in m/s
pub const SPEED_OF_LIGHT_VACUUM: f64 = 299_792_458.0;

/// Speed of light in air, in m/s
pub const SPEED_OF_LIGHT_AIR: f64 = 299_702_547.0;


/// How far a computed distance can be trusted
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Confidence {
    /// The timestamps were consistent
    Normal,
    /// The raw time of flight came out negative and was clamped to zero
    ///
    /// This points to clock drift or corrupted timestamps.
    Low,
}

/// A time of flight, in device time units
///
/// Fractional, since halving an odd round-trip difference is legitimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeOfFlight {
    /// Device time units, never negative
    pub dtu: f64,
    /// Whether the value had to be clamped
    pub confidence: Confidence,
}

impl TimeOfFlight {
    /// Clamps a raw time of flight to zero, downgrading the confidence if
    /// clamping was necessary
    pub fn from_raw(dtu: f64) -> Self {
        if dtu < 0.0 {
            TimeOfFlight {
                dtu: 0.0,
                confidence: Confidence::Low,
            }
        }
        else {
            TimeOfFlight {
                dtu,
                confidence: Confidence::Normal,
            }
        }
    }

    /// Converts to seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.dtu * DTU_SECONDS
    }
}

/// A measured distance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distance {
    /// The time of flight the distance was derived from
    pub time_of_flight: TimeOfFlight,
    /// Distance in meters, never negative
    pub meters: f64,
}

impl Distance {
    /// The confidence of the underlying time of flight
    pub fn confidence(&self) -> Confidence {
        self.time_of_flight.confidence
    }

    /// Returns the distance in millimeters, rounded to the nearest one
    ///
    /// Saturates at `u32::MAX`.
    pub fn millimeters(&self) -> u32 {
        let mm = self.meters * 1000.0 + 0.5;

        // Float-to-int casts saturate, and `meters` is never negative.
        mm as u32
    }
}


/// A ranging formula
pub trait TwrFormula {
    /// Computes the time of flight from the formula's timestamps
    fn time_of_flight(&self) -> TimeOfFlight;
}

/// Computes the distance for any formula
///
/// `speed_of_light` is the propagation speed in m/s, usually
/// [`SPEED_OF_LIGHT_AIR`].
pub fn compute_distance<F>(formula: &F, speed_of_light: f64) -> Distance
where
    F: TwrFormula + ?Sized,
{
    let time_of_flight = formula.time_of_flight();

    Distance {
        time_of_flight,
        meters: time_of_flight.as_secs_f64() * speed_of_light,
    }
}


/// Timestamps of a single-sided exchange
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SingleSided {
    /// When the tag sent the POLL, in tag time
    pub poll_tx: Instant,
    /// When the tag received the RESPONSE, in tag time
    pub resp_rx: Instant,
    /// When the anchor received the POLL, in anchor time
    pub poll_rx_remote: Instant,
    /// When the anchor sent the RESPONSE, in anchor time
    pub resp_tx_remote: Instant,
}

impl SingleSided {
    /// The tag's round-trip time, in device time units
    pub fn round_trip(&self) -> i64 {
        elapsed(self.resp_rx, self.poll_tx)
    }

    /// The anchor's processing delay, in device time units
    pub fn reply_delay(&self) -> i64 {
        elapsed(self.resp_tx_remote, self.poll_rx_remote)
    }
}

impl TwrFormula for SingleSided {
    fn time_of_flight(&self) -> TimeOfFlight {
        let difference = self.round_trip() - self.reply_delay();
        TimeOfFlight::from_raw(difference as f64 / 2.0)
    }
}


/// Timestamps of a double-sided exchange
///
/// Uses the asymmetric formula from the DW1000/DW3000 user manuals:
///
/// ``` text
/// tof = (Ra·Rb − Da·Db) / (Ra + Rb + Da + Db)
/// ```
///
/// where `Ra`/`Rb` are the two round trips and `Da`/`Db` the two reply
/// delays.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DoubleSided {
    /// When the tag sent the POLL, in tag time
    pub poll_tx: Instant,
    /// When the anchor received the POLL, in anchor time
    pub poll_rx: Instant,
    /// When the anchor sent the RESPONSE, in anchor time
    pub resp_tx: Instant,
    /// When the tag received the RESPONSE, in tag time
    pub resp_rx: Instant,
    /// When the tag sent the FINAL, in tag time
    pub final_tx: Instant,
    /// When the anchor received the FINAL, in anchor time
    pub final_rx: Instant,
}

impl TwrFormula for DoubleSided {
    fn time_of_flight(&self) -> TimeOfFlight {
        let round_a = elapsed(self.resp_rx, self.poll_tx) as i128;
        let reply_b = elapsed(self.resp_tx, self.poll_rx) as i128;
        let round_b = elapsed(self.final_rx, self.resp_tx) as i128;
        let reply_a = elapsed(self.final_tx, self.resp_rx) as i128;

        let sum = round_a + round_b + reply_a + reply_b;
        if sum == 0 {
            return TimeOfFlight::from_raw(0.0);
        }

        // Products of two 40-bit intervals need up to 80 bits.
        let numerator = round_a * round_b - reply_a * reply_b;

        TimeOfFlight::from_raw(numerator as f64 / sum as f64)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TIME_MODULUS;

    fn single_sided(poll_tx: u64, resp_rx: u64, poll_rx: u64, resp_tx: u64) -> SingleSided {
        SingleSided {
            poll_tx: Instant::masked(poll_tx),
            resp_rx: Instant::masked(resp_rx),
            poll_rx_remote: Instant::masked(poll_rx),
            resp_tx_remote: Instant::masked(resp_tx),
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "{} is not close to {}",
            actual,
            expected,
        );
    }

    #[test]
    fn equal_round_trip_and_reply_delay_is_zero_distance() {
        let timestamps = single_sided(0, 500, 10_000, 10_500);
        let distance = compute_distance(&timestamps, SPEED_OF_LIGHT_VACUUM);

        assert_eq!(distance.meters, 0.0);
        assert_eq!(distance.confidence(), Confidence::Normal);
        assert_eq!(distance.millimeters(), 0);
    }

    #[test]
    fn time_of_flight_is_half_the_excess_round_trip() {
        let reply_delay = 40_000;
        let excess = 2_000;
        let timestamps = single_sided(0, reply_delay + excess, 7, 7 + reply_delay);

        let tof = timestamps.time_of_flight();
        assert_close(tof.dtu, excess as f64 / 2.0);

        let distance = compute_distance(&timestamps, SPEED_OF_LIGHT_VACUUM);
        assert_close(distance.meters, 1_000.0 * DTU_SECONDS * SPEED_OF_LIGHT_VACUUM);
    }

    #[test]
    fn reference_exchange_is_about_47_centimeters() {
        let timestamps = single_sided(0, 300, 1000, 1100);

        assert_eq!(timestamps.round_trip(), 300);
        assert_eq!(timestamps.reply_delay(), 100);
        assert_close(timestamps.time_of_flight().dtu, 100.0);

        let distance = compute_distance(&timestamps, SPEED_OF_LIGHT_VACUUM);
        assert!((distance.meters - 0.469).abs() < 0.001);
        assert_eq!(distance.millimeters(), 469);
    }

    #[test]
    fn intervals_survive_counter_wraparound() {
        let poll_tx = TIME_MODULUS - 100;
        let poll_rx = TIME_MODULUS - 30;
        let timestamps = single_sided(poll_tx, 200, poll_rx, 70);

        assert_eq!(timestamps.round_trip(), 300);
        assert_eq!(timestamps.reply_delay(), 100);
        assert_close(timestamps.time_of_flight().dtu, 100.0);
    }

    #[test]
    fn negative_time_of_flight_is_clamped() {
        let timestamps = single_sided(0, 100, 0, 300);
        let distance = compute_distance(&timestamps, SPEED_OF_LIGHT_AIR);

        assert_eq!(distance.meters, 0.0);
        assert_eq!(distance.confidence(), Confidence::Low);
        assert_eq!(distance.millimeters(), 0);
    }

    #[test]
    fn double_sided_cancels_clock_drift() {
        // Anchor clock runs 20 ppm fast. True time of flight is 1000 DTU,
        // both reply delays are 1_000_000 DTU in their own clock.
        let tof = 1_000.0;
        let drift = 1.0 + 20e-6;
        let reply = 1_000_000.0;

        let poll_tx = 0.0;
        let poll_rx = 5_000.0;
        let resp_tx = poll_rx + reply;
        let resp_rx = poll_tx + tof + reply / drift + tof;
        let final_tx = resp_rx + reply;
        // The anchor saw the POLL at tag time `tof`, and the FINAL arrives
        // `tof` after it was sent.
        let final_rx = poll_rx + drift * final_tx;

        let timestamps = DoubleSided {
            poll_tx: Instant::masked(poll_tx as u64),
            poll_rx: Instant::masked(poll_rx as u64),
            resp_tx: Instant::masked(resp_tx as u64),
            resp_rx: Instant::masked(resp_rx as u64),
            final_tx: Instant::masked(final_tx as u64),
            final_rx: Instant::masked(final_rx as u64),
        };

        let double = timestamps.time_of_flight();
        assert!((double.dtu - tof).abs() < 2.0, "{}", double.dtu);
        assert_eq!(double.confidence, Confidence::Normal);

        // The single-sided estimate of the same exchange is off by roughly
        // half the drift over the reply delay.
        let single = SingleSided {
            poll_tx: timestamps.poll_tx,
            resp_rx: timestamps.resp_rx,
            poll_rx_remote: timestamps.poll_rx,
            resp_tx_remote: timestamps.resp_tx,
        }
        .time_of_flight();
        assert!((single.dtu - tof).abs() > 5.0, "{}", single.dtu);
    }

    #[test]
    fn double_sided_with_identical_timestamps_is_zero() {
        let distance = compute_distance(&DoubleSided::default(), SPEED_OF_LIGHT_AIR);

        assert_eq!(distance.meters, 0.0);
        assert_eq!(distance.confidence(), Confidence::Normal);
    }

    #[test]
    fn millimeters_round_to_nearest() {
        let distance = Distance {
            time_of_flight: TimeOfFlight::from_raw(1.0),
            meters: 1.2345,
        };
        assert_eq!(distance.millimeters(), 1235);
    }
}

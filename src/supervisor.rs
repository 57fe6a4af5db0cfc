//! The ranging loop
//!
//! [`Supervisor`] owns the transceiver and everything needed to run ranging
//! sessions back to back: a timer for the session's waits, a delay and a
//! clock for the cycle cadence, and an indicator. It brings the transceiver
//! up, runs one session per period and re-initializes the transceiver once
//! too many cycles in a row have failed. No error ever stops the loop.
//!
//! ``` no_run
//! # fn main() {}
//! # fn demo<T, I, C, D, K>(radio: T, led: I, timer: C, delay: D, clock: K) -> !
//! # where
//! #     T: uwb_twr::Transceiver,
//! #     I: uwb_twr::Indicator,
//! #     C: embedded_hal::timer::CountDown,
//! #     C::Time: From<u32>,
//! #     D: embedded_hal::blocking::delay::DelayMs<u32>,
//! #     K: uwb_twr::supervisor::Clock,
//! # {
//! use uwb_twr::{configs::SupervisorConfig, Supervisor};
//!
//! Supervisor::new(radio, led, timer, delay, clock)
//!     .with_supervisor_config(SupervisorConfig::fast())
//!     .run()
//! # }
//! ```

use embedded_hal::{blocking::delay::DelayMs, timer::CountDown};

use crate::{
    configs::{Addressing, RadioConfig, RangingConfig, SupervisorConfig},
    frame::FrameCodec,
    ranging::Confidence,
    session::{Measurement, Session},
    transceiver::{DeviceId, Indicator, Transceiver},
    Error,
};


/// A millisecond clock used to keep the cycle cadence
pub trait Clock {
    /// Milliseconds since some fixed point in the past
    fn now_ms(&mut self) -> u64;
}


/// Counters kept across cycles
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SupervisorState {
    /// Cycles started so far, wrapping
    pub cycle_count: u32,
    /// Failed cycles since the last success or re-initialization
    pub consecutive_failures: u32,
    /// Cycles that produced a distance
    pub successes: u32,
    /// Re-initializations triggered by repeated failures
    pub reinitializations: u32,
}


/// Runs ranging sessions on a fixed cadence
pub struct Supervisor<T, I, C, D, K> {
    radio: T,
    indicator: I,
    timer: C,
    delay: D,
    clock: K,

    codec: FrameCodec,
    radio_config: RadioConfig,
    ranging_config: RangingConfig,
    config: SupervisorConfig,
    state: SupervisorState,
}

impl<T, I, C, D, K> Supervisor<T, I, C, D, K>
where
    T: Transceiver,
    I: Indicator,
    C: CountDown,
    C::Time: From<u32>,
    D: DelayMs<u32>,
    K: Clock,
{
    /// Creates a supervisor with default configuration
    ///
    /// Nothing touches the transceiver until [`Supervisor::initialize`] or
    /// one of the methods that call it.
    pub fn new(radio: T, indicator: I, timer: C, delay: D, clock: K) -> Self {
        Supervisor {
            radio,
            indicator,
            timer,
            delay,
            clock,

            codec: FrameCodec::new(Addressing::default()),
            radio_config: RadioConfig::default(),
            ranging_config: RangingConfig::default(),
            config: SupervisorConfig::default(),
            state: SupervisorState::default(),
        }
    }

    /// Replaces the radio configuration applied at initialization
    pub fn with_radio_config(mut self, config: RadioConfig) -> Self {
        self.radio_config = config;
        self
    }

    /// Replaces the configuration of each exchange
    pub fn with_ranging_config(mut self, config: RangingConfig) -> Self {
        self.ranging_config = config;
        self
    }

    /// Replaces the loop configuration
    pub fn with_supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the addresses used in frames
    ///
    /// Restarts the sequence numbers at zero.
    pub fn with_addressing(mut self, addressing: Addressing) -> Self {
        self.codec = FrameCodec::new(addressing);
        self
    }

    /// The counters
    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Shared access to the transceiver
    pub fn radio(&self) -> &T {
        &self.radio
    }

    /// Exclusive access to the transceiver
    pub fn radio_mut(&mut self) -> &mut T {
        &mut self.radio
    }

    /// Resets, identifies and configures the transceiver
    ///
    /// A failed reset is only logged, since the device ID check that follows
    /// tells whether the chip is usable. A device ID of all zeroes or all
    /// ones means nothing is answering on the bus.
    pub fn initialize(&mut self) -> Result<DeviceId, Error<T::Error>> {
        if let Err(error) = self.radio.reset() {
            log::warn!("transceiver reset failed: {:?}", error);
        }

        let raw = self.radio.read_device_id().map_err(Error::Transceiver)?;
        let device_id = match DeviceId::from_raw(raw) {
            Some(device_id) => device_id,
            None => {
                log::error!("invalid device id {:#010x}, check wiring", raw);
                return Err(Error::TransportFault { device_id: raw });
            }
        };

        match device_id {
            DeviceId::Unknown(raw) => {
                log::warn!("unknown device id {:#010x}, proceeding anyway", raw)
            }
            known => log::info!("found {:?}", known),
        }

        self.radio
            .configure(&self.radio_config)
            .map_err(Error::Transceiver)?;
        log::info!(
            "transceiver configured [channel: {:?}, bitrate: {:?}, preamble: {:?}]",
            self.radio_config.channel,
            self.radio_config.bitrate,
            self.radio_config.preamble_length,
        );

        Ok(device_id)
    }

    /// Initializes the transceiver, retrying until it works
    ///
    /// Flashes the indicator briefly after each failed attempt, then gives the transceiver
    /// [`SupervisorConfig::startup_settle_ms`] to settle.
    pub fn initialize_with_retry(&mut self) -> DeviceId {
        let mut attempt: u32 = 1;

        let device_id = loop {
            match self.initialize() {
                Ok(device_id) => break device_id,
                Err(error) => {
                    log::error!("initialization attempt {} failed: {}", attempt, error);
                    attempt = attempt.wrapping_add(1);

                    let flash = self.config.init_flash_ms.min(self.config.init_retry_ms);
                    self.indicator.pulse();
                    self.delay.delay_ms(flash);
                    self.indicator.off();
                    self.delay.delay_ms(self.config.init_retry_ms - flash);
                }
            }
        };

        self.indicator.off();
        self.delay.delay_ms(self.config.startup_settle_ms);
        log::info!("ready to range");

        device_id
    }

    /// Runs a single ranging session and updates the counters
    ///
    /// Re-initializes the transceiver if this cycle brought the consecutive
    /// failures up to [`SupervisorConfig::failure_threshold`].
    pub fn run_cycle(&mut self) -> Result<Measurement, Error<T::Error>> {
        self.indicator.off();
        self.state.cycle_count = self.state.cycle_count.wrapping_add(1);

        let result = Session::new(
            &mut self.radio,
            &mut self.indicator,
            &mut self.codec,
            &self.ranging_config,
        )
        .run(&mut self.timer);

        match &result {
            Ok(measurement) => {
                log::info!(
                    "cycle {}: {:.3} m ({} mm) to {:04x}",
                    self.state.cycle_count,
                    measurement.distance.meters,
                    measurement.distance.millimeters(),
                    measurement.anchor,
                );
                if measurement.distance.confidence() == Confidence::Low {
                    log::warn!("negative time of flight clamped to zero");
                }

                self.state.consecutive_failures = 0;
                self.state.successes = self.state.successes.wrapping_add(1);
            }
            Err(error) => {
                self.state.consecutive_failures += 1;
                log::warn!(
                    "cycle {} failed: {} ({} in a row)",
                    self.state.cycle_count,
                    error,
                    self.state.consecutive_failures,
                );

                if self.state.consecutive_failures >= self.config.failure_threshold {
                    self.reinitialize();
                }
            }
        }

        result
    }

    /// Runs one cycle, then sleeps for the rest of the period
    ///
    /// A cycle that takes longer than the period is followed by the next one
    /// right away.
    pub fn step(&mut self) -> Result<Measurement, Error<T::Error>> {
        let start = self.clock.now_ms();
        let result = self.run_cycle();
        let elapsed = self.clock.now_ms().saturating_sub(start);

        let period = u64::from(self.config.period_ms);
        if elapsed < period {
            // Fits, since it's less than a `u32` period.
            self.delay.delay_ms((period - elapsed) as u32);
        }
        else {
            log::debug!("cycle took {} ms, period is {} ms", elapsed, period);
        }

        result
    }

    /// Initializes the transceiver and ranges forever
    pub fn run(mut self) -> ! {
        self.initialize_with_retry();

        loop {
            let _ = self.step();
        }
    }

    /// Releases the owned resources
    pub fn free(self) -> (T, I, C, D, K) {
        (self.radio, self.indicator, self.timer, self.delay, self.clock)
    }

    fn reinitialize(&mut self) {
        log::warn!(
            "{} consecutive failures, re-initializing transceiver",
            self.state.consecutive_failures,
        );

        match self.initialize() {
            Ok(_) => log::info!("re-initialization complete"),
            Err(error) => log::error!("re-initialization failed: {}", error),
        }

        self.state.consecutive_failures = 0;
        self.state.reinitializations = self.state.reinitializations.wrapping_add(1);
        self.delay.delay_ms(self.config.reinit_settle_ms);
    }
}

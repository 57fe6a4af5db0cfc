//! One POLL → RESPONSE → FINAL exchange
//!
//! A [`Session`] lives for exactly one ranging cycle. It borrows the
//! transceiver and drives it through the exchange, either one [`State`] at a
//! time with [`Session::step`] or to the end with [`Session::run`], which
//! hands back a [`Measurement`] or an [`Error`]. Timestamps start out zeroed for every
//! session, so nothing from an earlier cycle can leak into a result.
//!
//! All waiting is bounded by a [`CountDown`] timer: [`RangingConfig::tx_timeout`]
//! for each transmission, [`RangingConfig::response_timeout`] for the
//! RESPONSE.

use embedded_hal::timer::CountDown;
use embedded_timeout_macros::{block_timeout, TimeoutError};

use crate::{
    configs::RangingConfig,
    frame::{self, FrameCodec, ResponseTimestamps, MAX_FRAME_LEN},
    ranging::{compute_distance, Distance, SingleSided},
    time::Instant,
    transceiver::{Indicator, Status, Transceiver},
    Error,
    ErrorKind,
};


/// Where a session is in the exchange
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Nothing sent yet
    Idle,
    /// The POLL was handed to the transceiver
    PollSent,
    /// The POLL is out and the receiver is listening
    AwaitingResponse,
    /// A valid RESPONSE arrived
    ResponseReceived,
    /// The FINAL was handed to the transceiver
    FinalSent,
    /// The exchange finished and produced a distance
    Complete,
    /// The exchange was abandoned
    Error(ErrorKind),
}

impl State {
    /// Whether the session has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Complete | State::Error(_))
    }
}


/// The result of a completed exchange
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    /// Sequence number of the POLL that started the exchange
    pub sequence_number: u8,
    /// Short address of the anchor that answered
    pub anchor: u16,
    /// The four timestamps the distance was computed from
    pub timestamps: SingleSided,
    /// The measured distance
    pub distance: Distance,
}


/// A single ranging exchange
pub struct Session<'r, T, I> {
    radio: &'r mut T,
    indicator: &'r mut I,
    codec: &'r mut FrameCodec,
    config: &'r RangingConfig,

    state: State,
    timestamps: SingleSided,
    sequence_number: u8,
    anchor: u16,
    buffer: [u8; MAX_FRAME_LEN],
}

impl<'r, T, I> Session<'r, T, I>
where
    T: Transceiver,
    I: Indicator,
{
    /// Creates an idle session with all timestamps zeroed
    pub fn new(
        radio: &'r mut T,
        indicator: &'r mut I,
        codec: &'r mut FrameCodec,
        config: &'r RangingConfig,
    ) -> Self {
        Session {
            radio,
            indicator,
            codec,
            config,
            state: State::Idle,
            timestamps: SingleSided::default(),
            sequence_number: 0,
            anchor: 0,
            buffer: [0; MAX_FRAME_LEN],
        }
    }

    /// The current state
    pub fn state(&self) -> State {
        self.state
    }

    /// The timestamps captured so far
    pub fn timestamps(&self) -> &SingleSided {
        &self.timestamps
    }

    /// The result, once the session is [`State::Complete`]
    pub fn measurement(&self) -> Option<Measurement> {
        if self.state != State::Complete {
            return None;
        }

        Some(Measurement {
            sequence_number: self.sequence_number,
            anchor: self.anchor,
            timestamps: self.timestamps,
            distance: compute_distance(&self.timestamps, self.config.speed_of_light),
        })
    }

    /// Advances the exchange by one state and returns the new state
    ///
    /// `timer` bounds the waits of the states that wait for the transceiver.
    /// On error the session moves to [`State::Error`] with the kind of the
    /// returned error and forces the transceiver idle. A failure to do so is
    /// logged and otherwise ignored.
    ///
    /// A session that has finished stays where it is and returns its state.
    pub fn step<C>(&mut self, timer: &mut C) -> Result<State, Error<T::Error>>
    where
        C: CountDown,
        C::Time: From<u32>,
    {
        let result = match self.state {
            State::Idle => self.send_poll(),
            State::PollSent => self.finish_poll(timer),
            State::AwaitingResponse => self.receive_response(timer),
            State::ResponseReceived => self.send_final(),
            State::FinalSent => self.finish_final(timer),
            State::Complete | State::Error(_) => return Ok(self.state),
        };

        if let Err(error) = result {
            self.transition(State::Error(error.kind()));
            if let Err(error) = self.radio.force_idle() {
                log::warn!("failed to force transceiver idle: {:?}", error);
            }
            return Err(error);
        }

        Ok(self.state)
    }

    /// Runs the whole exchange
    pub fn run<C>(mut self, timer: &mut C) -> Result<Measurement, Error<T::Error>>
    where
        C: CountDown,
        C::Time: From<u32>,
    {
        loop {
            self.step(timer)?;

            if let Some(measurement) = self.measurement() {
                return Ok(measurement);
            }
        }
    }

    fn finish_poll<C>(&mut self, timer: &mut C) -> Result<(), Error<T::Error>>
    where
        C: CountDown,
        C::Time: From<u32>,
    {
        self.wait_transmit(timer)?;
        self.timestamps.poll_tx = Instant::masked(
            self.radio.read_tx_timestamp().map_err(Error::Transceiver)?,
        );
        self.transition(State::AwaitingResponse);

        Ok(())
    }

    fn receive_response<C>(&mut self, timer: &mut C) -> Result<(), Error<T::Error>>
    where
        C: CountDown,
        C::Time: From<u32>,
    {
        timer.start(self.config.response_timeout);
        let (rx_time, response) = block_timeout!(&mut *timer, self.wait_response())
            .map_err(|error| match error {
                TimeoutError::Timeout => {
                    log::warn!("no response within the wait window");
                    Error::ResponseTimeout
                }
                TimeoutError::Other(error) => error,
            })?;

        self.timestamps.resp_rx = rx_time;
        self.timestamps.poll_rx_remote = response.poll_rx;
        self.timestamps.resp_tx_remote = response.resp_tx;
        self.anchor = response.source;
        self.transition(State::ResponseReceived);

        log::debug!(
            "RX RESPONSE from {:04x} [seq: {}, round trip: {}, reply delay: {}]",
            response.source,
            response.sequence_number,
            self.timestamps.round_trip(),
            self.timestamps.reply_delay(),
        );

        Ok(())
    }

    fn finish_final<C>(&mut self, timer: &mut C) -> Result<(), Error<T::Error>>
    where
        C: CountDown,
        C::Time: From<u32>,
    {
        self.wait_transmit(timer)?;
        self.transition(State::Complete);

        Ok(())
    }

    fn send_poll(&mut self) -> Result<(), Error<T::Error>> {
        self.radio.force_idle().map_err(|error| {
            log::warn!("failed to force transceiver idle before POLL: {:?}", error);
            Error::TxFault
        })?;

        self.sequence_number = self.codec.next_sequence_number();
        let poll = self.codec.encode_poll();

        self.radio.transmit(&poll, true).map_err(|error| {
            log::warn!("POLL rejected: {:?}", error);
            Error::TxFault
        })?;
        self.indicator.pulse();

        log::debug!("TX POLL [seq: {}]", self.sequence_number);
        self.transition(State::PollSent);

        Ok(())
    }

    fn send_final(&mut self) -> Result<(), Error<T::Error>> {
        let distance_mm = compute_distance(&self.timestamps, self.config.speed_of_light)
            .millimeters();

        self.radio.force_idle().map_err(|error| {
            log::warn!("failed to force transceiver idle before FINAL: {:?}", error);
            Error::TxFault
        })?;

        let seq = self.codec.next_sequence_number();
        let report = self.codec.encode_final(distance_mm);

        self.radio.transmit(&report, false).map_err(|error| {
            log::warn!("FINAL rejected: {:?}", error);
            Error::TxFault
        })?;
        self.indicator.pulse();

        log::debug!("TX FINAL [seq: {}, distance: {} mm]", seq, distance_mm);
        self.transition(State::FinalSent);

        Ok(())
    }

    /// Waits for the TX-done flag and clears it
    fn wait_transmit<C>(&mut self, timer: &mut C) -> Result<(), Error<T::Error>>
    where
        C: CountDown,
        C::Time: From<u32>,
    {
        timer.start(self.config.tx_timeout);
        block_timeout!(&mut *timer, self.poll_transmit()).map_err(|error| match error {
            TimeoutError::Timeout => {
                log::warn!("transmission not completed in time ({:?})", self.state);
                Error::TxFault
            }
            TimeoutError::Other(error) => error,
        })
    }

    fn poll_transmit(&mut self) -> nb::Result<(), Error<T::Error>> {
        let status = self
            .radio
            .status()
            .map_err(|error| nb::Error::Other(Error::Transceiver(error)))?;

        if status != Status::TxDone {
            return Err(nb::Error::WouldBlock);
        }

        self.radio
            .clear_status(Status::TxDone)
            .map_err(|error| nb::Error::Other(Error::Transceiver(error)))?;

        Ok(())
    }

    /// Checks once for a valid RESPONSE
    ///
    /// Anything that isn't one is dropped and the receiver re-armed, so only
    /// the response window can end the wait.
    fn wait_response(&mut self) -> nb::Result<(Instant, ResponseTimestamps), Error<T::Error>> {
        let status = self
            .radio
            .status()
            .map_err(|error| nb::Error::Other(Error::Transceiver(error)))?;

        match status {
            Status::RxGood => {
                let len = self
                    .radio
                    .read_frame(&mut self.buffer)
                    .map_err(|error| nb::Error::Other(Error::Transceiver(error)))?;
                let rx_time = self
                    .radio
                    .read_rx_timestamp()
                    .map_err(|error| nb::Error::Other(Error::Transceiver(error)))?;
                self.radio
                    .clear_status(Status::RxGood)
                    .map_err(|error| nb::Error::Other(Error::Transceiver(error)))?;

                let len = len.min(self.buffer.len());
                let tag = self.codec.addressing().tag;
                if let Some(response) = frame::decode_response(&self.buffer[..len], tag) {
                    return Ok((Instant::masked(rx_time), response));
                }

                log::trace!("dropping {} byte frame that is not a RESPONSE", len);
                self.rearm()?;
            }
            Status::RxError => {
                log::debug!("receive error, listening again");
                self.radio
                    .clear_status(Status::RxError)
                    .map_err(|error| nb::Error::Other(Error::Transceiver(error)))?;
                self.rearm()?;
            }
            Status::Idle => {
                log::trace!("receiver went idle, listening again");
                self.rearm()?;
            }
            Status::TxDone | Status::Busy => (),
        }

        Err(nb::Error::WouldBlock)
    }

    fn rearm(&mut self) -> nb::Result<(), Error<T::Error>> {
        self.radio
            .force_idle()
            .and_then(|()| self.radio.start_receive())
            .map_err(|error| nb::Error::Other(Error::Transceiver(error)))
    }

    fn transition(&mut self, next: State) {
        log::trace!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        configs::{Addressing, RangingConfig},
        frame::MessageType,
        ranging::{Confidence, SPEED_OF_LIGHT_VACUUM},
        sim::{SimError, SimulatedAnchor, SimulatedTimer},
    };

    fn config() -> RangingConfig {
        RangingConfig {
            tx_timeout: 1_000,
            response_timeout: 100_000,
            speed_of_light: SPEED_OF_LIGHT_VACUUM,
        }
    }

    fn run_once(
        radio: &mut SimulatedAnchor,
        codec: &mut FrameCodec,
    ) -> Result<Measurement, Error<SimError>> {
        let config = config();
        let mut timer = SimulatedTimer::new(100);
        let mut indicator = ();
        let session = Session::new(radio, &mut indicator, codec, &config);

        assert_eq!(session.state(), State::Idle);
        assert_eq!(session.timestamps(), &SingleSided::default());

        session.run(&mut timer)
    }

    #[test]
    fn exchange_produces_reference_distance() {
        let mut radio = SimulatedAnchor::new(100, 100);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);
        let measurement = result.unwrap();

        assert_eq!(measurement.sequence_number, 0);
        assert_eq!(measurement.anchor, 0xffff);
        assert_eq!(measurement.timestamps.round_trip(), 300);
        assert_eq!(measurement.timestamps.reply_delay(), 100);
        assert_eq!(measurement.distance.millimeters(), 469);
        assert_eq!(measurement.distance.confidence(), Confidence::Normal);

        // POLL, then FINAL with the tag's estimate
        assert_eq!(radio.sent_types(), &[MessageType::Poll, MessageType::Final]);
        assert_eq!(radio.last_final().unwrap().distance_mm, 469);
        assert_eq!(codec.next_sequence_number(), 2);
    }

    #[test]
    fn garbage_is_dropped_until_the_response_arrives() {
        let mut radio = SimulatedAnchor::new(100, 100);
        // Includes a complete RESPONSE addressed to another tag
        radio.inject_garbage(4);
        radio.inject_rx_errors(2);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);

        let measurement = result.unwrap();
        assert_eq!(measurement.distance.millimeters(), 469);
        assert_eq!(measurement.timestamps.poll_rx_remote.value(), 1000);
        assert!(radio.receiver_arms() >= 6);
    }

    #[test]
    fn missing_response_times_out() {
        let mut radio = SimulatedAnchor::new(100, 100);
        radio.drop_responses(1);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);

        let error = result.unwrap_err();
        assert!(matches!(error, Error::ResponseTimeout));
        assert_eq!(error.kind(), ErrorKind::ResponseTimeout);
        assert_eq!(radio.sent_types(), &[MessageType::Poll]);
        assert!(!radio.is_receiving());
    }

    #[test]
    fn rejected_poll_is_a_tx_fault() {
        let mut radio = SimulatedAnchor::new(100, 100);
        radio.reject_transmissions(1);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::TxFault);
        assert!(radio.sent_types().is_empty());
    }

    #[test]
    fn stuck_transmitter_is_a_tx_fault() {
        let mut radio = SimulatedAnchor::new(100, 100);
        radio.stall_transmitter(true);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::TxFault);
    }

    #[test]
    fn dead_bus_is_a_tx_fault() {
        let mut radio = SimulatedAnchor::new(100, 100);
        radio.fail_bus(true);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);

        // The first thing a session does is forcing the radio idle
        assert_eq!(result.unwrap_err().kind(), ErrorKind::TxFault);
    }

    #[test]
    fn status_read_errors_are_reported() {
        let mut radio = SimulatedAnchor::new(100, 100);
        radio.fail_status(true);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);

        assert!(matches!(result, Err(Error::Transceiver(SimError::Bus))));
        assert_eq!(radio.sent_types(), &[MessageType::Poll]);
    }

    #[test]
    fn terminal_states() {
        assert!(State::Complete.is_terminal());
        assert!(State::Error(ErrorKind::TxFault).is_terminal());
        assert!(!State::AwaitingResponse.is_terminal());
    }

    #[test]
    fn anchor_slower_than_round_trip_gives_low_confidence() {
        // The anchor claims a reply delay longer than the tag's round trip.
        let mut radio = SimulatedAnchor::new(0, 100);
        radio.skew_reply_delay(500);
        let mut codec = FrameCodec::new(Addressing::default());

        let result = run_once(&mut radio, &mut codec);
        let measurement = result.unwrap();

        assert_eq!(measurement.distance.meters, 0.0);
        assert_eq!(measurement.distance.confidence(), Confidence::Low);
        assert_eq!(radio.last_final().unwrap().distance_mm, 0);
    }

    #[test]
    fn stepping_visits_every_state() {
        let config = config();
        let mut radio = SimulatedAnchor::new(100, 100);
        let mut codec = FrameCodec::new(Addressing::default());
        let mut indicator = ();
        let mut timer = SimulatedTimer::new(100);
        let mut session = Session::new(&mut radio, &mut indicator, &mut codec, &config);

        assert_eq!(session.step(&mut timer).unwrap(), State::PollSent);
        assert_eq!(session.measurement(), None);

        assert_eq!(session.step(&mut timer).unwrap(), State::AwaitingResponse);
        assert_eq!(session.timestamps().poll_tx.value(), 0);

        assert_eq!(session.step(&mut timer).unwrap(), State::ResponseReceived);
        assert_eq!(session.timestamps().resp_rx.value(), 300);
        assert_eq!(session.measurement(), None);

        assert_eq!(session.step(&mut timer).unwrap(), State::FinalSent);
        assert_eq!(session.step(&mut timer).unwrap(), State::Complete);
        assert_eq!(session.state(), State::Complete);
        assert_eq!(session.measurement().unwrap().distance.millimeters(), 469);

        // Finished sessions don't touch the radio again
        assert_eq!(session.step(&mut timer).unwrap(), State::Complete);
        assert_eq!(radio.sent_types(), &[MessageType::Poll, MessageType::Final]);
    }

    #[test]
    fn lost_response_ends_in_timeout_state() {
        let config = config();
        let mut radio = SimulatedAnchor::new(100, 100);
        radio.drop_responses(1);
        let mut codec = FrameCodec::new(Addressing::default());
        let mut indicator = ();
        let mut timer = SimulatedTimer::new(100);
        let mut session = Session::new(&mut radio, &mut indicator, &mut codec, &config);

        assert_eq!(session.step(&mut timer).unwrap(), State::PollSent);
        assert_eq!(session.step(&mut timer).unwrap(), State::AwaitingResponse);

        let error = session.step(&mut timer).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResponseTimeout);
        assert_eq!(session.state(), State::Error(ErrorKind::ResponseTimeout));
        assert_eq!(session.measurement(), None);

        assert_eq!(
            session.step(&mut timer).unwrap(),
            State::Error(ErrorKind::ResponseTimeout),
        );
        assert!(!radio.is_receiving());
    }

    #[test]
    fn rejected_final_ends_in_tx_fault_state() {
        let config = config();
        let mut radio = SimulatedAnchor::new(100, 100);
        radio.reject_finals(1);
        let mut codec = FrameCodec::new(Addressing::default());
        let mut indicator = ();
        let mut timer = SimulatedTimer::new(100);
        let mut session = Session::new(&mut radio, &mut indicator, &mut codec, &config);

        assert_eq!(session.step(&mut timer).unwrap(), State::PollSent);
        assert_eq!(session.step(&mut timer).unwrap(), State::AwaitingResponse);
        assert_eq!(session.step(&mut timer).unwrap(), State::ResponseReceived);

        let error = session.step(&mut timer).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TxFault);
        assert_eq!(session.state(), State::Error(ErrorKind::TxFault));
        assert_eq!(session.measurement(), None);

        assert_eq!(radio.sent_types(), &[MessageType::Poll]);
        assert_eq!(radio.last_final(), None);
    }
}

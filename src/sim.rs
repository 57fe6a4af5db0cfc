//! A simulated transceiver with an anchor on the other end
//!
//! [`SimulatedAnchor`] implements [`Transceiver`] without any hardware. It
//! keeps a tag clock and an anchor clock in device time units, answers every
//! POLL with a RESPONSE as a real anchor at a fixed time of flight would, and
//! records what the tag sent. Faults can be injected to exercise the error
//! paths: rejected or stalled transmissions, lost responses, interfering
//! frames, receive errors and a dead bus.
//!
//! [`SimulatedTimer`] is a [`CountDown`] that expires after a fixed number of
//! polls, so timeouts happen without waiting.
//!
//! Used by this crate's tests and the host demo.

use core::convert::TryFrom as _;

use embedded_hal::timer::CountDown;
use heapless::{Deque, Vec};
use void::Void;

use crate::{
    configs::{Addressing, RadioConfig},
    frame::{self, FinalReport, FrameCodec, MessageType, MAX_FRAME_LEN, MESSAGE_TYPE_OFFSET},
    time::{Instant, TIME_MAX},
    transceiver::{Status, Transceiver},
};


/// Device ID a DW3000 C0 reports
pub const DW3000_C0_DEVICE_ID: u32 = 0xdeca_0302;

/// Number of transmitted message types [`SimulatedAnchor::sent_types`] keeps
pub const SENT_HISTORY_LEN: usize = 16;

const INBOX_LEN: usize = 16;

/// Tag clock advance between exchanges, in device time units
const IDLE_ADVANCE: u64 = 1_000;


/// Errors of the simulated transceiver
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimError {
    /// The bus is dead, every access fails
    Bus,
    /// The transceiver refused to transmit
    Rejected,
}


enum Incoming {
    Frame {
        bytes: Vec<u8, MAX_FRAME_LEN>,
        rx_time: u64,
    },
    Error,
}


/// A transceiver that talks to a simulated anchor
#[derive(Debug)]
pub struct SimulatedAnchor {
    time_of_flight: u64,
    reply_delay: u64,
    reply_skew: u64,
    tag_clock: u64,
    anchor_offset: u64,
    device_id: u32,
    garbled_reads: u32,
    anchor: FrameCodec,
    interferer: FrameCodec,

    tx_done: bool,
    receiving: bool,
    tx_timestamp: u64,
    rx_timestamp: u64,
    inbox: Deque<Incoming, INBOX_LEN>,

    reject_tx: u32,
    reject_finals: u32,
    drop_responses: u32,
    garbage: u32,
    rx_errors: u32,
    stalled: bool,
    wedged: bool,
    bus_dead: bool,
    status_dead: bool,

    sent: Vec<MessageType, SENT_HISTORY_LEN>,
    last_final: Option<FinalReport>,
    resets: u32,
    configurations: u32,
    receiver_arms: u32,
}

impl SimulatedAnchor {
    /// Creates an anchor at `time_of_flight` that replies after
    /// `reply_delay`, both in device time units
    ///
    /// The tag clock starts at zero and the anchor clock runs 900 units
    /// ahead of it.
    pub fn new(time_of_flight: u64, reply_delay: u64) -> Self {
        SimulatedAnchor {
            time_of_flight,
            reply_delay,
            reply_skew: 0,
            tag_clock: 0,
            anchor_offset: 900,
            device_id: DW3000_C0_DEVICE_ID,
            garbled_reads: 0,
            anchor: FrameCodec::new(Addressing::default()),
            interferer: FrameCodec::new(Addressing {
                tag: 0x0002,
                ..Addressing::default()
            }),

            tx_done: false,
            receiving: false,
            tx_timestamp: 0,
            rx_timestamp: 0,
            inbox: Deque::new(),

            reject_tx: 0,
            reject_finals: 0,
            drop_responses: 0,
            garbage: 0,
            rx_errors: 0,
            stalled: false,
            wedged: false,
            bus_dead: false,
            status_dead: false,

            sent: Vec::new(),
            last_final: None,
            resets: 0,
            configurations: 0,
            receiver_arms: 0,
        }
    }

    /// Sets both clocks
    ///
    /// Values are taken modulo 2^40, so clocks close to the end of the range
    /// can be used to exercise wraparound.
    pub fn set_clocks(&mut self, tag_clock: u64, anchor_offset: u64) {
        self.tag_clock = tag_clock & TIME_MAX;
        self.anchor_offset = anchor_offset & TIME_MAX;
    }

    /// Sets the value returned by [`Transceiver::read_device_id`]
    pub fn set_device_id(&mut self, device_id: u32) {
        self.device_id = device_id;
    }

    /// Makes the next `count` device ID reads return all ones, like a
    /// floating bus does
    pub fn garble_device_id(&mut self, count: u32) {
        self.garbled_reads = count;
    }

    /// Makes the anchor report a reply delay `skew` units longer than the
    /// real one
    pub fn skew_reply_delay(&mut self, skew: u64) {
        self.reply_skew = skew;
    }

    /// Rejects the next `count` transmissions
    pub fn reject_transmissions(&mut self, count: u32) {
        self.reject_tx = count;
    }

    /// Rejects the next `count` FINALs, other transmissions go through
    pub fn reject_finals(&mut self, count: u32) {
        self.reject_finals = count;
    }

    /// Loses the responses to the next `count` POLLs
    pub fn drop_responses(&mut self, count: u32) {
        self.drop_responses = count;
    }

    /// Delivers `count` frames that aren't RESPONSEs before the next one
    pub fn inject_garbage(&mut self, count: u32) {
        self.garbage = count;
    }

    /// Reports `count` receive errors before the next RESPONSE
    pub fn inject_rx_errors(&mut self, count: u32) {
        self.rx_errors = count;
    }

    /// Keeps transmissions from ever completing
    pub fn stall_transmitter(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Loses every response until the next [`Transceiver::reset`]
    pub fn wedge(&mut self) {
        self.wedged = true;
    }

    /// Fails every bus access
    pub fn fail_bus(&mut self, dead: bool) {
        self.bus_dead = dead;
    }

    /// Fails status reads only
    pub fn fail_status(&mut self, dead: bool) {
        self.status_dead = dead;
    }

    /// Message types of the most recent transmissions, oldest first
    pub fn sent_types(&self) -> &[MessageType] {
        &self.sent
    }

    /// The last FINAL the anchor received
    pub fn last_final(&self) -> Option<FinalReport> {
        self.last_final
    }

    /// How often the transceiver was reset
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// How often the transceiver was configured
    pub fn configurations(&self) -> u32 {
        self.configurations
    }

    /// How often the receiver was armed explicitly
    pub fn receiver_arms(&self) -> u32 {
        self.receiver_arms
    }

    /// Whether the receiver is armed
    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    fn bus(&self) -> Result<(), SimError> {
        if self.bus_dead {
            return Err(SimError::Bus);
        }
        Ok(())
    }

    fn record(&mut self, message_type: MessageType) {
        if self.sent.is_full() {
            self.sent.remove(0);
        }
        let _ = self.sent.push(message_type);
    }

    fn deliver(&mut self, incoming: Incoming) {
        if self.inbox.push_back(incoming).is_err() {
            log::warn!("simulated inbox full, frame lost");
        }
    }

    fn answer_poll(&mut self, poll_tx: u64) {
        for i in 0..self.garbage {
            let bytes = match i % 4 {
                0 => Vec::from_slice(&self.interferer.encode_beacon()[..]),
                1 => Vec::from_slice(&[0x41, 0x88, 0x00]),
                2 => {
                    let response = self.interferer.encode_response(Instant::ZERO, Instant::ZERO);
                    Vec::from_slice(&response[..response.len() - 1])
                }
                // A complete RESPONSE, but for another tag
                _ => Vec::from_slice(
                    &self.interferer.encode_response(Instant::ZERO, Instant::ZERO)[..],
                ),
            };
            if let Ok(bytes) = bytes {
                self.deliver(Incoming::Frame { bytes, rx_time: poll_tx });
            }
        }
        self.garbage = 0;

        for _ in 0..self.rx_errors {
            self.deliver(Incoming::Error);
        }
        self.rx_errors = 0;

        if self.wedged {
            log::trace!("simulated anchor is wedged");
            return;
        }
        if self.drop_responses > 0 {
            self.drop_responses -= 1;
            return;
        }

        let poll_rx = poll_tx + self.time_of_flight + self.anchor_offset;
        let resp_tx = poll_rx + self.reply_delay + self.reply_skew;
        let resp_rx = poll_tx + 2 * self.time_of_flight + self.reply_delay;

        let response = self
            .anchor
            .encode_response(Instant::masked(poll_rx), Instant::masked(resp_tx));
        if let Ok(bytes) = Vec::from_slice(&response) {
            self.deliver(Incoming::Frame {
                bytes,
                rx_time: resp_rx & TIME_MAX,
            });
        }

        self.tag_clock = resp_rx & TIME_MAX;
    }
}

impl Transceiver for SimulatedAnchor {
    type Error = SimError;

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.bus()?;

        self.resets += 1;
        self.wedged = false;
        self.stalled = false;
        self.tx_done = false;
        self.receiving = false;
        self.inbox.clear();

        Ok(())
    }

    fn read_device_id(&mut self) -> Result<u32, Self::Error> {
        self.bus()?;

        if self.garbled_reads > 0 {
            self.garbled_reads -= 1;
            return Ok(0xffff_ffff);
        }
        Ok(self.device_id)
    }

    fn configure(&mut self, _: &RadioConfig) -> Result<(), Self::Error> {
        self.bus()?;
        self.configurations += 1;
        Ok(())
    }

    fn force_idle(&mut self) -> Result<(), Self::Error> {
        self.bus()?;
        self.receiving = false;
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8], ranging: bool) -> Result<(), Self::Error> {
        self.bus()?;

        if self.reject_tx > 0 {
            self.reject_tx -= 1;
            return Err(SimError::Rejected);
        }

        let message_type = frame
            .get(MESSAGE_TYPE_OFFSET)
            .and_then(|&byte| MessageType::try_from(byte).ok());
        if message_type == Some(MessageType::Final) && self.reject_finals > 0 {
            self.reject_finals -= 1;
            return Err(SimError::Rejected);
        }
        if let Some(message_type) = message_type {
            self.record(message_type);
        }

        self.tx_timestamp = self.tag_clock;
        self.tx_done = !self.stalled;
        self.tag_clock = (self.tag_clock + IDLE_ADVANCE) & TIME_MAX;

        match message_type {
            Some(MessageType::Poll) if ranging && !self.stalled => {
                self.receiving = true;
                self.answer_poll(self.tx_timestamp);
            }
            Some(MessageType::Final) => {
                self.last_final = frame::decode_final(frame);
            }
            _ => (),
        }

        Ok(())
    }

    fn start_receive(&mut self) -> Result<(), Self::Error> {
        self.bus()?;
        self.receiving = true;
        self.receiver_arms += 1;
        Ok(())
    }

    fn status(&mut self) -> Result<Status, Self::Error> {
        self.bus()?;
        if self.status_dead {
            return Err(SimError::Bus);
        }

        if self.tx_done {
            return Ok(Status::TxDone);
        }
        if !self.receiving {
            return Ok(Status::Idle);
        }

        let status = match self.inbox.front() {
            Some(Incoming::Frame { .. }) => Status::RxGood,
            Some(Incoming::Error) => Status::RxError,
            None => Status::Busy,
        };
        Ok(status)
    }

    fn clear_status(&mut self, status: Status) -> Result<(), Self::Error> {
        self.bus()?;

        match status {
            Status::TxDone => self.tx_done = false,
            Status::RxGood | Status::RxError => {
                // The receiver switches itself off after every frame
                if let Some(Incoming::Frame { rx_time, .. }) = self.inbox.pop_front() {
                    self.rx_timestamp = rx_time;
                }
                self.receiving = false;
            }
            Status::Idle | Status::Busy => (),
        }

        Ok(())
    }

    fn read_frame(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        self.bus()?;

        match self.inbox.front() {
            Some(Incoming::Frame { bytes, .. }) => {
                let len = bytes.len().min(buffer.len());
                buffer[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            _ => Ok(0),
        }
    }

    fn read_tx_timestamp(&mut self) -> Result<u64, Self::Error> {
        self.bus()?;
        Ok(self.tx_timestamp)
    }

    fn read_rx_timestamp(&mut self) -> Result<u64, Self::Error> {
        self.bus()?;

        match self.inbox.front() {
            Some(Incoming::Frame { rx_time, .. }) => Ok(*rx_time),
            _ => Ok(self.rx_timestamp),
        }
    }
}

impl core::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Incoming::Frame { bytes, rx_time } => {
                write!(f, "Frame({} bytes @ {})", bytes.len(), rx_time)
            }
            Incoming::Error => write!(f, "Error"),
        }
    }
}


/// A timer that expires after a fixed number of polls
///
/// Every call to `wait` that doesn't expire consumes `step` ticks of the
/// duration passed to `start`.
#[derive(Debug)]
pub struct SimulatedTimer {
    step: u32,
    remaining: u32,
    polls: u32,
}

impl SimulatedTimer {
    /// Creates a timer that consumes `step` ticks per poll
    pub fn new(step: u32) -> Self {
        SimulatedTimer {
            step: step.max(1),
            remaining: 0,
            polls: 0,
        }
    }

    /// Number of `wait` calls since creation
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl CountDown for SimulatedTimer {
    type Time = u32;

    fn start<T>(&mut self, count: T)
    where
        T: Into<Self::Time>,
    {
        self.remaining = count.into();
    }

    fn wait(&mut self) -> nb::Result<(), Void> {
        self.polls += 1;

        if self.remaining == 0 {
            return Ok(());
        }
        self.remaining = self.remaining.saturating_sub(self.step);
        Err(nb::Error::WouldBlock)
    }
}

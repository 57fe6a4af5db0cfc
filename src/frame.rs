//! Ranging frames and their wire format
//!
//! All ranging messages are IEEE 802.15.4 data frames with PAN ID compression
//! and 16-bit short addresses on both ends. The MAC header is followed by a
//! one-byte message type and a message-specific payload:
//!
//! ``` text
//! offset  0      2     3        5      7      9      10
//!         +------+-----+--------+------+------+------+---------+
//!         | 0x41 | seq | PAN ID | dest | src  | type | payload |
//!         | 0x88 |     |        |      |      |      |         |
//!         +------+-----+--------+------+------+------+---------+
//! ```
//!
//! Multi-byte fields are little-endian. The FCS is appended by the
//! transceiver and is not part of the frames built here.
//!
//! A tag sends [`MessageType::Poll`], the anchor answers with
//! [`MessageType::Response`] carrying its own receive and transmit timestamps,
//! and the tag wraps up with [`MessageType::Final`] carrying its distance
//! estimate.

use core::num::Wrapping;

use byte::{BytesExt as _, LE};
use heapless::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{configs::Addressing, time::Instant, FrameError};


/// Frame control field: data frame, PAN ID compression, short addresses
pub const FRAME_CONTROL: [u8; 2] = [0x41, 0x88];

/// Short address that every device accepts
pub const BROADCAST: u16 = 0xffff;

/// Offset of the message type byte, right after the MAC header
pub const MESSAGE_TYPE_OFFSET: usize = 9;

/// Offset of the first payload byte
pub const PAYLOAD_OFFSET: usize = 10;

/// Largest payload a [`RangingFrame`] can carry
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Largest frame the transceiver accepts, not counting the 2-byte FCS
pub const MAX_FRAME_LEN: usize = 125;

/// Length of an encoded POLL
pub const POLL_LEN: usize = PAYLOAD_OFFSET;

/// Minimum length of a RESPONSE
pub const RESPONSE_LEN: usize = PAYLOAD_OFFSET + 10;

/// Length of an encoded FINAL
pub const FINAL_LEN: usize = PAYLOAD_OFFSET + 4;

/// Length of an encoded BEACON
pub const BEACON_LEN: usize = PAYLOAD_OFFSET + 8;

/// Offset of the anchor's POLL receive timestamp within a RESPONSE
const RESPONSE_POLL_RX_OFFSET: usize = PAYLOAD_OFFSET;

/// Offset of the anchor's RESPONSE transmit timestamp within a RESPONSE
const RESPONSE_RESP_TX_OFFSET: usize = PAYLOAD_OFFSET + 5;

/// Version reported in the BEACON tag info
const TAG_VERSION: u8 = 0x01;


/// Identifies a ranging message
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    /// Sent by the tag to start an exchange
    Poll = 0x61,
    /// Sent by the anchor in reply to a POLL
    Response = 0x50,
    /// Sent by the tag to wrap up an exchange
    Final = 0x23,
    /// Announces the tag to anchors that aren't ranging with it yet
    Beacon = 0x70,
}


/// A decoded ranging frame
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangingFrame {
    /// The frame control field, as it appeared on the wire
    pub frame_control: [u8; 2],
    /// Sequence number, wrapping at 256
    pub sequence_number: u8,
    /// Destination (and, with PAN ID compression, source) PAN
    pub pan_id: u16,
    /// Destination short address
    pub destination: u16,
    /// Source short address
    pub source: u16,
    /// The kind of message
    pub message_type: MessageType,
    /// Message-specific payload
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl RangingFrame {
    /// Number of bytes [`RangingFrame::encode`] writes
    pub fn encoded_len(&self) -> usize {
        PAYLOAD_OFFSET + self.payload.len()
    }

    /// Writes the frame into `buf` and returns the number of bytes written
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(FrameError::BufferTooSmall { required_len: len });
        }

        let header = Header {
            frame_control: self.frame_control,
            sequence_number: self.sequence_number,
            pan_id: self.pan_id,
            destination: self.destination,
            source: self.source,
            message_type: self.message_type,
        };
        header.write(buf);
        buf[PAYLOAD_OFFSET..len].copy_from_slice(&self.payload);

        Ok(len)
    }

    /// Parses a frame
    ///
    /// Everything after the message type byte is taken as payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < PAYLOAD_OFFSET {
            return Err(FrameError::Truncated { len: bytes.len() });
        }

        let payload = &bytes[PAYLOAD_OFFSET..];
        let payload = Vec::from_slice(payload)
            .map_err(|_| FrameError::PayloadTooLong { len: payload.len() })?;

        let message_type = bytes[MESSAGE_TYPE_OFFSET];
        let message_type = MessageType::try_from_primitive(message_type)
            .map_err(|_| FrameError::UnknownMessageType(message_type))?;

        let mut offset = 3;
        let pan_id = bytes.read_with(&mut offset, LE)?;
        let destination = bytes.read_with(&mut offset, LE)?;
        let source = bytes.read_with(&mut offset, LE)?;

        Ok(RangingFrame {
            frame_control: [bytes[0], bytes[1]],
            sequence_number: bytes[2],
            pan_id,
            destination,
            source,
            message_type,
            payload,
        })
    }
}


/// Everything in front of the payload
struct Header {
    frame_control: [u8; 2],
    sequence_number: u8,
    pan_id: u16,
    destination: u16,
    source: u16,
    message_type: MessageType,
}

impl Header {
    /// Writes the header into the first [`PAYLOAD_OFFSET`] bytes of `buf`
    ///
    /// `buf` must be at least that long.
    fn write(&self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.frame_control);
        buf[2] = self.sequence_number;
        buf[3..5].copy_from_slice(&self.pan_id.to_le_bytes());
        buf[5..7].copy_from_slice(&self.destination.to_le_bytes());
        buf[7..9].copy_from_slice(&self.source.to_le_bytes());
        buf[MESSAGE_TYPE_OFFSET] = self.message_type.into();
    }
}


/// The anchor's timestamps, extracted from a RESPONSE
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResponseTimestamps {
    /// Sequence number of the RESPONSE
    pub sequence_number: u8,
    /// Short address of the anchor that sent it
    pub source: u16,
    /// When the anchor received the POLL, in anchor time
    pub poll_rx: Instant,
    /// When the anchor sent the RESPONSE, in anchor time
    pub resp_tx: Instant,
}

/// Extracts the anchor's timestamps from a received frame
///
/// Returns `None` for anything that isn't a RESPONSE of at least
/// [`RESPONSE_LEN`] bytes addressed to `tag` or to [`BROADCAST`]. Those are
/// frames from unrelated devices or for other tags and are meant to be
/// dropped, not reported.
pub fn decode_response(bytes: &[u8], tag: u16) -> Option<ResponseTimestamps> {
    if bytes.len() < RESPONSE_LEN {
        return None;
    }
    if bytes[MESSAGE_TYPE_OFFSET] != u8::from(MessageType::Response) {
        return None;
    }

    let destination = u16::from_le_bytes([bytes[5], bytes[6]]);
    if destination != tag && destination != BROADCAST {
        return None;
    }

    Some(ResponseTimestamps {
        sequence_number: bytes[2],
        source: u16::from_le_bytes([bytes[7], bytes[8]]),
        poll_rx: Instant::from_le_bytes(&bytes[RESPONSE_POLL_RX_OFFSET..])?,
        resp_tx: Instant::from_le_bytes(&bytes[RESPONSE_RESP_TX_OFFSET..])?,
    })
}


/// The contents of a FINAL, as seen by the anchor
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FinalReport {
    /// Sequence number of the FINAL
    pub sequence_number: u8,
    /// Short address of the tag that sent it
    pub source: u16,
    /// The tag's distance estimate
    pub distance_mm: u32,
}

/// Extracts the tag's report from a FINAL
///
/// Returns `None` for anything that isn't a FINAL of at least [`FINAL_LEN`]
/// bytes.
pub fn decode_final(bytes: &[u8]) -> Option<FinalReport> {
    if bytes.len() < FINAL_LEN {
        return None;
    }
    if bytes[MESSAGE_TYPE_OFFSET] != u8::from(MessageType::Final) {
        return None;
    }

    let mut distance = [0; 4];
    distance.copy_from_slice(&bytes[PAYLOAD_OFFSET..FINAL_LEN]);

    Some(FinalReport {
        sequence_number: bytes[2],
        source: u16::from_le_bytes([bytes[7], bytes[8]]),
        distance_mm: u32::from_le_bytes(distance),
    })
}


/// Builds ranging frames
///
/// Owns the sequence counter, which advances by one on every encoded frame and
/// wraps at 256. Each codec instance counts independently.
#[derive(Debug)]
pub struct FrameCodec {
    seq: Wrapping<u8>,
    addressing: Addressing,
}

impl FrameCodec {
    /// Creates a codec whose first frame gets sequence number 0
    pub fn new(addressing: Addressing) -> Self {
        FrameCodec {
            seq: Wrapping(0),
            addressing,
        }
    }

    /// The addresses this codec puts into frames
    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    /// The sequence number the next frame will get
    pub fn next_sequence_number(&self) -> u8 {
        self.seq.0
    }

    /// Builds a POLL from the tag to the anchor
    pub fn encode_poll(&mut self) -> [u8; POLL_LEN] {
        let mut buf = [0; POLL_LEN];
        self.write_header(&mut buf, MessageType::Poll, Direction::TagToAnchor);
        buf
    }

    /// Builds a FINAL carrying the tag's own distance estimate
    ///
    /// The distance is purely informational for the anchor, the tag never
    /// reads it back.
    pub fn encode_final(&mut self, distance_mm: u32) -> [u8; FINAL_LEN] {
        let mut buf = [0; FINAL_LEN];
        self.write_header(&mut buf, MessageType::Final, Direction::TagToAnchor);
        buf[PAYLOAD_OFFSET..].copy_from_slice(&distance_mm.to_le_bytes());
        buf
    }

    /// Builds a BEACON announcing the tag
    pub fn encode_beacon(&mut self) -> [u8; BEACON_LEN] {
        let mut buf = [0; BEACON_LEN];
        let seq = self.write_header(&mut buf, MessageType::Beacon, Direction::TagToAnchor);

        let tag = self.addressing.tag.to_le_bytes();
        let info = [tag[0], tag[1], TAG_VERSION, 0x00, seq, 0x00, 0x00, 0x00];
        buf[PAYLOAD_OFFSET..].copy_from_slice(&info);
        buf
    }

    /// Builds a RESPONSE from the anchor to the tag
    ///
    /// This is the anchor's half of the exchange. The tag never sends it, but
    /// simulated anchors and tests do.
    pub fn encode_response(&mut self, poll_rx: Instant, resp_tx: Instant) -> [u8; RESPONSE_LEN] {
        let mut buf = [0; RESPONSE_LEN];
        self.write_header(&mut buf, MessageType::Response, Direction::AnchorToTag);
        buf[RESPONSE_POLL_RX_OFFSET..RESPONSE_RESP_TX_OFFSET].copy_from_slice(&poll_rx.to_le_bytes());
        buf[RESPONSE_RESP_TX_OFFSET..].copy_from_slice(&resp_tx.to_le_bytes());
        buf
    }

    /// Writes the MAC header and message type, returns the sequence number used
    ///
    /// `buf` must be at least [`PAYLOAD_OFFSET`] bytes long.
    fn write_header(&mut self, buf: &mut [u8], message_type: MessageType, direction: Direction) -> u8 {
        let seq = self.seq.0;
        self.seq += Wrapping(1);

        let (destination, source) = match direction {
            Direction::TagToAnchor => (self.addressing.anchor, self.addressing.tag),
            Direction::AnchorToTag => (self.addressing.tag, self.addressing.anchor),
        };

        let header = Header {
            frame_control: FRAME_CONTROL,
            sequence_number: seq,
            pan_id: self.addressing.pan_id,
            destination,
            source,
            message_type,
        };
        header.write(buf);

        seq
    }
}

enum Direction {
    TagToAnchor,
    AnchorToTag,
}

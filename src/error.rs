use core::fmt;

use thiserror::Error;


/// An error that ends a ranging cycle or an initialization attempt
///
/// Generic over the error type of the [`Transceiver`] in use.
///
/// [`Transceiver`]: ../transceiver/trait.Transceiver.html
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: fmt::Debug,
{
    /// The transceiver rejected a transmission or didn't finish it in time
    #[error("transmission rejected or not completed")]
    TxFault,

    /// No valid RESPONSE arrived within the wait window
    #[error("no valid response within the wait window")]
    ResponseTimeout,

    /// The device ID read at initialization indicates a broken bus
    #[error("transport fault, device id {device_id:#010x}")]
    TransportFault {
        /// The value that was read
        device_id: u32,
    },

    /// The transceiver reported a bus error
    #[error("transceiver error: {0:?}")]
    Transceiver(E),
}

impl<E> Error<E>
where
    E: fmt::Debug,
{
    /// Returns the kind of this error, without the transceiver payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TxFault => ErrorKind::TxFault,
            Error::ResponseTimeout => ErrorKind::ResponseTimeout,
            Error::TransportFault { .. } => ErrorKind::TransportFault,
            Error::Transceiver(_) => ErrorKind::Transceiver,
        }
    }
}

/// The kind of an [`Error`], recorded in the session's error state
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// See [`Error::TxFault`]
    TxFault,
    /// See [`Error::ResponseTimeout`]
    ResponseTimeout,
    /// See [`Error::TransportFault`]
    TransportFault,
    /// See [`Error::Transceiver`]
    Transceiver,
}


/// An error that can occur while encoding or decoding a frame
#[derive(Debug, Eq, PartialEq, Error)]
pub enum FrameError {
    /// Buffer too small
    #[error("buffer too small, {required_len} bytes required")]
    BufferTooSmall {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },

    /// The payload doesn't fit into a frame
    #[error("payload of {len} bytes exceeds the maximum")]
    PayloadTooLong {
        /// Length of the rejected payload
        len: usize,
    },

    /// The frame ends before the message type byte
    #[error("frame truncated after {len} bytes")]
    Truncated {
        /// Length of the received frame
        len: usize,
    },

    /// The message type byte is not one this crate knows
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    /// Reading or writing a header field failed
    #[error("malformed frame header")]
    Malformed,
}

impl From<byte::Error> for FrameError {
    fn from(_: byte::Error) -> Self {
        FrameError::Malformed
    }
}

//! CAN frame codec.
//!
//! Every frame on the body bus ends with two integrity bytes: a packed
//! `(schema_version << 4) | counter` byte and an XOR checksum seeded with
//! [`CHECKSUM_SEED`]. Command frames are checked in a fixed order (length,
//! checksum, rolling counter) before a subsystem decodes them.

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

pub const CHECKSUM_SEED: u8 = 0xAA;
pub const SCHEMA_VERSION: u8 = 0x1;
pub const MAX_PAYLOAD: usize = 8;
pub const COUNTER_MODULO: u8 = 16;

/// Frame identifiers.
pub mod id {
    pub const DOOR_CMD: u16 = 0x100;
    pub const LIGHTING_CMD: u16 = 0x110;
    pub const TURN_CMD: u16 = 0x120;
    pub const DOOR_STATUS: u16 = 0x200;
    pub const LIGHTING_STATUS: u16 = 0x210;
    pub const TURN_STATUS: u16 = 0x220;
    pub const FAULT_STATUS: u16 = 0x230;
    pub const HEARTBEAT: u16 = 0x240;
}

/// Data length codes, including the version/counter and checksum bytes.
pub mod dlc {
    pub const COMMAND: usize = 4;
    pub const STATUS: usize = 6;
    pub const FAULT_STATUS: usize = 8;
    pub const HEARTBEAT: usize = 4;
}

/// Bytes appended by [`encode_frame`].
pub const TRAILER_LEN: usize = 2;

const_assert!(dlc::COMMAND >= TRAILER_LEN);
const_assert!(dlc::STATUS <= MAX_PAYLOAD);
const_assert!(dlc::FAULT_STATUS <= MAX_PAYLOAD);
const_assert!(SCHEMA_VERSION < 16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("wrong frame length: expected {expected}, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
    #[error("rolling counter mismatch: expected {expected}, got {received}")]
    CounterMismatch { expected: u8, received: u8 },
    #[error("command or parameter out of range")]
    CommandOutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the 8 byte frame limit")]
    PayloadTooLong(usize),
}

/// A classic CAN frame with an 11-bit identifier and up to 8 data bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    id: u16,
    data: ArrayVec<u8, MAX_PAYLOAD>,
}

impl CanFrame {
    pub fn new(id: u16, data: &[u8]) -> Result<Self, FrameError> {
        let mut buf = ArrayVec::new();
        buf.try_extend_from_slice(data)
            .map_err(|_| FrameError::PayloadTooLong(data.len()))?;
        Ok(Self { id, data: buf })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// XOR of `bytes` folded over [`CHECKSUM_SEED`].
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b)
}

pub fn pack_version_counter(counter: u8) -> u8 {
    (SCHEMA_VERSION << 4) | (counter & 0x0F)
}

pub fn counter_of(version_counter: u8) -> u8 {
    version_counter & 0x0F
}

pub fn version_of(version_counter: u8) -> u8 {
    version_counter >> 4
}

/// Receive-side rolling counter. `None` until the first frame is seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingCounter {
    last: Option<u8>,
}

impl RollingCounter {
    pub const fn new() -> Self {
        Self { last: None }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }

    pub fn expected(&self) -> Option<u8> {
        self.last.map(|c| (c + 1) % COUNTER_MODULO)
    }

    /// Checks `received` against the expected successor.
    ///
    /// The received value becomes the new baseline even when it is rejected,
    /// so the stream resynchronizes on the frame after a gap.
    pub fn accept(&mut self, received: u8) -> Result<(), ProtocolError> {
        let received = received & 0x0F;
        let expected = self.expected();
        self.last = Some(received);

        match expected {
            Some(expected) if expected != received => {
                Err(ProtocolError::CounterMismatch { expected, received })
            }
            _ => Ok(()),
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Transmit-side counter, advanced on every encoded frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCounter(u8);

impl TxCounter {
    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn starting_at(counter: u8) -> Self {
        Self(counter & 0x0F)
    }

    pub fn current(&self) -> u8 {
        self.0
    }

    fn advance(&mut self) -> u8 {
        let value = self.0;
        self.0 = (self.0 + 1) % COUNTER_MODULO;
        value
    }
}

/// Validates length, checksum and rolling counter of a command frame, in
/// that order. Length and checksum failures leave `counter` untouched.
pub fn validate(
    frame: &CanFrame,
    dlc_expected: usize,
    counter: &mut RollingCounter,
) -> Result<(), ProtocolError> {
    let data = frame.data();
    if data.len() != dlc_expected || dlc_expected < TRAILER_LEN {
        return Err(ProtocolError::WrongLength {
            expected: dlc_expected,
            actual: data.len(),
        });
    }

    let (body, trailer) = data.split_at(dlc_expected - 1);
    let expected = checksum(body);
    let actual = trailer[0];
    if actual != expected {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }

    counter.accept(counter_of(body[body.len() - 1]))
}

/// Builds a frame from `payload`, appending the version/counter byte and the
/// checksum. The counter advances on every call.
pub fn encode_frame(
    id: u16,
    payload: &[u8],
    counter: &mut TxCounter,
) -> Result<CanFrame, FrameError> {
    if payload.len() + TRAILER_LEN > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLong(payload.len() + TRAILER_LEN));
    }

    let mut data: ArrayVec<u8, MAX_PAYLOAD> = ArrayVec::new();
    data.extend(payload.iter().copied());
    data.push(pack_version_counter(counter.advance()));
    data.push(checksum(&data));

    Ok(CanFrame { id, data })
}

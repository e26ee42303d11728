//! The classic-CAN frame type shared by the receive parser and the transmit
//! scheduler.

use embedded_can::{Id, StandardId};

/// Maximum data length code for classic CAN 2.0A/B.
pub const MAX_DLC: usize = 8;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// The caller asked for a remote frame or an extended identifier; both
    /// are outside the supported wire format (see the crate's non-goals).
    #[error("unsupported frame kind (remote frames and extended ids are not supported)")]
    Unsupported,
    /// More than [`MAX_DLC`] bytes of payload were supplied.
    #[error("data length {0} exceeds the maximum of 8 bytes")]
    DataTooLong(usize),
}

/// A standard (11-bit identifier) classic CAN frame.
///
/// The payload is stored as eight bytes but is also accessible as two `u32`
/// words, which is how the transmit scheduler compares a received frame
/// against the head of the transmit queue during self-transmission
/// detection (word comparisons are cheaper than byte-by-byte loops on a
/// microcontroller with no hardware CAN block to do it for you).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    id: u16,
    dlc: u8,
    data: [u8; MAX_DLC],
}

impl CanFrame {
    /// Build a frame from a raw 11-bit identifier and payload. `id` is
    /// masked to 11 bits and `data` is truncated to [`MAX_DLC`] bytes,
    /// matching the sanitization the original transmit path performs at
    /// enqueue time.
    pub fn new_raw(id: u16, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DLC);
        let mut payload = [0u8; MAX_DLC];
        payload[..dlc].copy_from_slice(&data[..dlc]);
        CanFrame {
            id: id & 0x7ff,
            dlc: dlc as u8,
            data: payload,
        }
    }

    /// Strict constructor that rejects oversized payloads instead of
    /// truncating them. `id` is still masked to 11 bits, matching the
    /// sanitization the wire format performs on the identifier regardless.
    pub fn try_new(id: u16, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > MAX_DLC {
            return Err(FrameError::DataTooLong(data.len()));
        }
        Ok(Self::new_raw(id, data))
    }

    pub const fn id_raw(&self) -> u16 {
        self.id
    }

    pub const fn dlc(&self) -> usize {
        self.dlc as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// The payload's first and second four bytes as little-endian words,
    /// used by the self-transmit fast path.
    pub(crate) fn data_words(&self) -> [u32; 2] {
        [
            u32::from_le_bytes(self.data[0..4].try_into().unwrap()),
            u32::from_le_bytes(self.data[4..8].try_into().unwrap()),
        ]
    }

    pub(crate) fn zeroed() -> Self {
        CanFrame {
            id: 0,
            dlc: 0,
            data: [0; MAX_DLC],
        }
    }
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC {
            return None;
        }
        match id.into() {
            Id::Standard(sid) => Some(CanFrame::new_raw(sid.as_raw(), data)),
            Id::Extended(_) => None,
        }
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        // Remote frames are a non-goal (§1).
        None
    }

    fn is_extended(&self) -> bool {
        false
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        // Safety of unwrap: `self.id` is always masked to 11 bits.
        Id::Standard(StandardId::new(self.id).unwrap())
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        self.data()
    }
}

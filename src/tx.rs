//! Transmit queue and scheduler (C5).
//!
//! A fixed-capacity ring of [`TxSlot`]s with `push`/`pull` counters that only
//! ever increase (wrapping arithmetic, `pending = push.wrapping_sub(pull)`).
//! The foreground ([`Queue::enqueue`]) is the sole producer; the DMA ISR
//! ([`Queue::schedule`], [`Queue::cancel`], [`Queue::check_self_transmit`],
//! [`Queue::finalize`]) is the sole consumer, matching the "ISR owns the
//! data, foreground owns an atomic publish" ring shape used for other
//! interrupt-fed queues in this codebase.

use core::sync::atomic::{AtomicU32, Ordering};

use static_assertions::const_assert;

use crate::frame::CanFrame;
use crate::hal::PioCanLowLevel;
use crate::stuff::BitStuffer;

/// Words needed to hold a fully stuffed classic-CAN frame: 19-bit header +
/// up to 64 data bits + 15-bit CRC + 1 delimiter bit is 99 unstuffed bits;
/// worst-case stuffing overhead (a stuff bit roughly every 5 bits) still
/// fits comfortably in 5 32-bit words.
const STUFFED_WORDS: usize = 5;

/// One queued, pre-encoded transmission.
#[derive(Clone, Copy)]
pub struct TxSlot {
    msg: CanFrame,
    crc: u16,
    stuffed_data: [u32; STUFFED_WORDS],
    stuffed_words: u32,
}

impl TxSlot {
    const fn empty() -> Self {
        TxSlot {
            msg: CanFrame::zeroed(),
            crc: 0,
            stuffed_data: [0; STUFFED_WORDS],
            stuffed_words: 0,
        }
    }

    pub fn frame(&self) -> CanFrame {
        self.msg
    }

    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// The stuffed words padded to [`STUFFED_WORDS`] together with how many
    /// of them are actually meaningful.
    fn stuffed(&self) -> ([u32; STUFFED_WORDS], u32) {
        (self.stuffed_data, self.stuffed_words)
    }
}

/// Retry ceiling before a frame that keeps losing arbitration or its ACK is
/// given up on and reported as [`crate::Notification::TxFail`]. Mirrors the
/// original driver's tunable `// XXX` threshold (see `DESIGN.md`).
const CANCEL_CEILING: u32 = 32;

/// Outcome of [`Queue::check_self_transmit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTransmit {
    /// The just-received frame matches the head of the queue; the caller
    /// should call [`Queue::finalize`].
    Match,
    /// No transmission in flight, or the received frame doesn't match; any
    /// in-flight transmission was cancelled (lost arbitration).
    NoMatch,
}

/// The bounded single-producer/single-consumer transmit ring.
///
/// `CAP` must be a power of two of at least 4 (enforced at compile time by
/// the const assertions on the concrete instantiation in
/// [`crate::controller`]).
pub struct Queue<const CAP: usize> {
    slots: [TxSlot; CAP],
    push_pos: AtomicU32,
    pull_pos: AtomicU32,
    in_transmit: bool,
    cancel_count: u32,
}

impl<const CAP: usize> Queue<CAP> {
    pub const fn new() -> Self {
        const_assert!(CAP >= 4 && CAP.is_power_of_two());
        Queue {
            slots: [TxSlot::empty(); CAP],
            push_pos: AtomicU32::new(0),
            pull_pos: AtomicU32::new(0),
            in_transmit: false,
            cancel_count: 0,
        }
    }

    fn qpos(pos: u32) -> usize {
        (pos as usize) % CAP
    }

    /// Number of slots currently occupied.
    fn pending(&self) -> u32 {
        let pull = self.pull_pos.load(Ordering::Acquire);
        let push = self.push_pos.load(Ordering::Relaxed);
        push.wrapping_sub(pull)
    }

    /// Foreground: true if at least one slot is free.
    pub fn has_space(&self) -> bool {
        (self.pending() as usize) < CAP
    }

    /// Foreground: encode and enqueue `frame`. Returns `false` if the queue
    /// is full.
    pub fn enqueue(&mut self, frame: CanFrame) -> bool {
        if !self.has_space() {
            return false;
        }
        let push = self.push_pos.load(Ordering::Relaxed);
        let slot = &mut self.slots[Self::qpos(push)];
        slot.msg = frame;

        let mut buf = [0u32; STUFFED_WORDS];
        let crc15;
        {
            let mut bs = BitStuffer::new(&mut buf);
            let hdr = ((frame.id_raw() as u32) << 7) | frame.dlc() as u32;
            bs.push(hdr, 19);
            let words = frame.data_words();
            for i in 0..frame.dlc() {
                let byte = (words[i / 4] >> ((i % 4) * 8)) & 0xff;
                bs.push(byte, 8);
            }
            crc15 = bs.crc() & 0x7fff;
            bs.push(crc15, 15);
            bs.push_raw(1, 1);
            let (words_written, _) = bs.finalize();
            slot.stuffed_words = words_written;
        }
        slot.stuffed_data = buf;
        slot.crc = crc15 as u16;

        self.push_pos.store(push.wrapping_add(1), Ordering::Release);
        true
    }

    /// DMA ISR: if not already transmitting and a frame is queued, hand the
    /// head of the queue to the PIO tx state machine. Returns the frame to
    /// report as [`crate::Notification::TxFail`] if `cancel_count` had
    /// exceeded [`CANCEL_CEILING`]; the queue has already advanced past it.
    pub fn schedule(&mut self, hal: &mut dyn PioCanLowLevel) -> Option<CanFrame> {
        let pull = self.pull_pos.load(Ordering::Relaxed);
        let push = self.push_pos.load(Ordering::Acquire);
        if self.in_transmit || push == pull {
            return None;
        }
        if self.cancel_count > CANCEL_CEILING {
            self.cancel_count = 0;
            let failed_pos = pull;
            self.pull_pos
                .store(failed_pos.wrapping_add(1), Ordering::Release);
            return Some(self.slots[Self::qpos(failed_pos)].frame());
        }
        self.in_transmit = true;
        let (words, count) = self.slots[Self::qpos(pull)].stuffed();
        hal.pio_tx_send(&words[..count as usize], count);
        None
    }

    /// DMA ISR: abandon the in-flight transmission (lost arbitration, lost
    /// ACK race, or a discard forces a resync).
    pub fn cancel(&mut self, hal: &mut dyn PioCanLowLevel) {
        self.in_transmit = false;
        self.cancel_count += 1;
        hal.pio_tx_cancel();
    }

    /// DMA ISR: does the just-parsed frame (by CRC, id, dlc and payload
    /// words) match the head of an in-flight transmission? If not, any
    /// in-flight transmission is cancelled as a side effect (someone else
    /// won arbitration).
    pub fn check_self_transmit(
        &mut self,
        hal: &mut dyn PioCanLowLevel,
        parse_crc: u16,
        parsed: &CanFrame,
    ) -> SelfTransmit {
        if !self.in_transmit {
            return SelfTransmit::NoMatch;
        }
        let pull = self.pull_pos.load(Ordering::Relaxed);
        let slot = &self.slots[Self::qpos(pull)];
        if slot.crc == parse_crc
            && slot.msg.id_raw() == parsed.id_raw()
            && slot.msg.dlc() == parsed.dlc()
            && slot.msg.data_words() == parsed.data_words()
        {
            return SelfTransmit::Match;
        }
        self.cancel(hal);
        SelfTransmit::NoMatch
    }

    /// DMA ISR: the in-flight transmission was confirmed by
    /// [`Self::check_self_transmit`]; advance the queue and report success.
    pub fn finalize(&mut self, hal: &mut dyn PioCanLowLevel) -> CanFrame {
        self.cancel(hal);
        self.cancel_count = 0;
        let pull = self.pull_pos.load(Ordering::Relaxed);
        self.pull_pos.store(pull.wrapping_add(1), Ordering::Release);
        self.slots[Self::qpos(pull)].frame()
    }
}

impl<const CAP: usize> Default for Queue<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

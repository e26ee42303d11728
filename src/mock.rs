//! Host-testable loopback stand-in for [`crate::hal::PioCanLowLevel`].
//!
//! Records the calls the transmit scheduler and receive parser make into it
//! so tests can assert on them directly, instead of standing up a real PIO
//! block. Not a behavioral model of the state machines themselves (it does
//! not, for instance, actually shift bits onto a simulated bus) — tests that
//! need that drive [`crate::stuff`]/[`crate::parser`] directly and feed the
//! resulting bytes back in through [`MockHal::feed_byte`].

use crate::hal::{ErrorCode, InterruptConfig, PioCanLowLevel};
use crate::Hertz;

#[derive(Debug, Default)]
pub(crate) struct MockHal {
    pub(crate) tx_sends: u32,
    pub(crate) tx_cancels: u32,
    pub(crate) ack_injects: u32,
    pub(crate) ack_cancels: u32,
    pub(crate) idle_irq_enabled: bool,
    pub(crate) resyncs: u32,
    pub(crate) full_resets: u32,
    pub(crate) rx_stall: bool,
    pub(crate) rx_queue: RxQueue,
    pub(crate) started: bool,
    pub(crate) shutdown: bool,
    pub(crate) dma_forced: bool,
    pub(crate) irqs: Option<InterruptConfig>,
}

/// Small fixed-depth FIFO standing in for the DMA byte mailbox.
#[derive(Debug, Default)]
pub(crate) struct RxQueue {
    bytes: [u8; 64],
    head: usize,
    tail: usize,
}

impl RxQueue {
    fn push(&mut self, byte: u8) {
        self.bytes[self.tail % 64] = byte;
        self.tail += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }
        let b = self.bytes[self.head % 64];
        self.head += 1;
        Some(b)
    }
}

impl MockHal {
    pub(crate) fn feed_byte(&mut self, byte: u8) {
        self.rx_queue.push(byte);
    }
}

impl PioCanLowLevel for MockHal {
    fn setup(&mut self, _sys_clock: Hertz, bitrate: Hertz, irqs: InterruptConfig) -> Result<(), ErrorCode> {
        if bitrate.raw() == 0 {
            return Err(ErrorCode::RX_FIFO_STALL);
        }
        self.irqs = Some(irqs);
        Ok(())
    }

    fn start(&mut self) {
        self.started = true;
    }

    fn shutdown(&mut self) {
        self.shutdown = true;
        self.started = false;
    }

    fn pio_tx_send(&mut self, _words: &[u32], _count: u32) {
        self.tx_sends += 1;
    }

    fn pio_tx_cancel(&mut self) {
        self.tx_cancels += 1;
    }

    fn pio_ack_inject(&mut self, _key: u32, _position: u32) {
        self.ack_injects += 1;
    }

    fn pio_ack_cancel(&mut self) {
        self.ack_cancels += 1;
    }

    fn pio_rx_check_stall(&mut self) -> bool {
        core::mem::take(&mut self.rx_stall)
    }

    fn pio_sync_enable_idle_irq(&mut self) {
        self.idle_irq_enabled = true;
    }

    fn pio_sync_disable_idle_irq(&mut self) {
        self.idle_irq_enabled = false;
    }

    fn pio_sync_check_idle_irq(&mut self) -> bool {
        self.idle_irq_enabled
    }

    fn pio_sync_resync(&mut self) {
        self.resyncs += 1;
    }

    fn pio_reset_all_state_machines(&mut self) {
        self.full_resets += 1;
    }

    fn read_rx_byte(&mut self) -> Option<u8> {
        self.rx_queue.pop()
    }

    fn dma_force_irq(&mut self) {
        self.dma_forced = true;
    }

    fn dma_take_forced_irq(&mut self) -> bool {
        core::mem::take(&mut self.dma_forced)
    }
}

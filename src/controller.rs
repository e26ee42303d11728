//! The public-facing aggregate: owns the hardware handle, the transmit
//! queue and the receive parser, and exposes the two interrupt entry points
//! that drive everything else.

use crate::config::{BitTiming, CanConfig, ConfigError};
use crate::frame::CanFrame;
use crate::hal::{ErrorCode, InterruptConfig, PioCanLowLevel};
use crate::parser::Parser;
use crate::tx::Queue;

/// Delivered through the callback registered with [`Can::callback_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// A frame addressed to someone else on the bus was received intact.
    Rx(CanFrame),
    /// Our own queued frame was confirmed on the bus (self-transmission
    /// matched the received echo).
    Tx(CanFrame),
    /// A queued frame exceeded the retry ceiling and was dropped.
    TxFail(CanFrame),
    /// An in-band error occurred (today: PIO RX FIFO overflow).
    Error(ErrorCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("hardware setup failed: {0:?}")]
    Hardware(ErrorCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    #[error("transmit queue is full")]
    QueueFull,
}

/// The software CAN controller. `H` is the hardware backend
/// ([`PioCanLowLevel`]), `F` the notification callback, and `CAP` the
/// transmit queue depth (must be a power of two, at least
/// [`crate::config::MIN_QUEUE_DEPTH`]).
pub struct Can<H, F, const CAP: usize>
where
    H: PioCanLowLevel,
    F: FnMut(Notification),
{
    hal: H,
    queue: Queue<CAP>,
    parser: Parser,
    notify: Option<F>,
    config: Option<CanConfig>,
}

impl<H, F, const CAP: usize> Can<H, F, CAP>
where
    H: PioCanLowLevel,
    F: FnMut(Notification),
{
    /// Construct with a hardware contract implementation. Nothing is
    /// brought up yet; call [`Self::start`] before expecting traffic.
    pub const fn new(hal: H) -> Self {
        Can {
            hal,
            queue: Queue::new(),
            parser: Parser::new(),
            notify: None,
            config: None,
        }
    }

    /// Register (or replace) the notification callback.
    pub fn callback_config(&mut self, cb: F) {
        self.notify = Some(cb);
    }

    /// Validate `timing` against this ring's capacity, bring up the PIO+DMA
    /// backend with `irqs` routed/unmasked, and start receiving.
    pub fn start(&mut self, timing: BitTiming, irqs: InterruptConfig) -> Result<(), SetupError> {
        let config = timing.freeze()?;
        config.check_capacity(CAP)?;
        self.hal
            .setup(config.sys_clock(), config.bitrate(), irqs)
            .map_err(SetupError::Hardware)?;
        self.parser.go_discard(&mut self.hal, &mut self.queue);
        self.hal.start();
        self.config = Some(config);
        Ok(())
    }

    /// Best-effort teardown. Safe to call more than once, including before
    /// [`Self::start`] has ever succeeded.
    pub fn shutdown(&mut self) {
        self.hal.shutdown();
        self.config = None;
    }

    /// True if [`Self::transmit`] would not immediately fail with
    /// [`TransmitError::QueueFull`].
    pub fn check_transmit(&self) -> bool {
        self.queue.has_space()
    }

    /// Encode and enqueue `frame`. If the parser is currently idle (waiting
    /// for the start of a frame) the transmission is kicked off right away;
    /// otherwise the eventual bus-idle transition picks it up.
    pub fn transmit(&mut self, frame: CanFrame) -> Result<(), TransmitError> {
        if !self.queue.enqueue(frame) {
            return Err(TransmitError::QueueFull);
        }
        critical_section::with(|_| {
            if self.parser.is_idle() {
                let Can {
                    hal,
                    queue,
                    notify,
                    ..
                } = self;
                if let Some(failed) = queue.schedule(hal) {
                    if let Some(cb) = notify.as_mut() {
                        cb(Notification::TxFail(failed));
                    }
                }
            }
        });
        Ok(())
    }

    /// DMA completion ISR entry point. If [`Self::pio_irq_handler`] forced
    /// this interrupt pending (bus idle observed while mid-frame), finishes
    /// that bus-idle transition; either way, drains whatever bytes the DMA
    /// mailbox actually has and drives the parser with them.
    pub fn dma_irq_handler(&mut self) {
        let forced = self.hal.dma_take_forced_irq();
        let Can {
            hal,
            queue,
            parser,
            notify,
            ..
        } = self;
        let mut notify = |n: Notification| {
            if let Some(cb) = notify.as_mut() {
                cb(n);
            }
        };
        if forced && !parser.is_idle() && hal.pio_sync_check_idle_irq() {
            parser.go_idle(hal, queue, &mut notify);
        }
        while let Some(byte) = hal.read_rx_byte() {
            parser.process_byte(hal, queue, &mut notify, byte);
        }
    }

    /// PIO IRQ0 entry point (sync state machine bus-idle signal). Never
    /// touches the parser directly: it only forces the DMA-completion
    /// interrupt pending so [`Self::dma_irq_handler`] runs and performs the
    /// actual bus-idle transition, matching the original driver's
    /// "PIO ISR re-triggers the DMA ISR" handoff.
    pub fn pio_irq_handler(&mut self) {
        if !self.parser.is_idle() && self.hal.pio_sync_check_idle_irq() {
            self.hal.dma_force_irq();
        }
    }
}

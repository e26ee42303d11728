//! The hardware contract this crate drives through.
//!
//! Bringing up a PIO block and a DMA channel — clock routing, GPIO function
//! select, register-level FIFO and IRQ plumbing — is chip-specific and out of
//! scope here (see the crate's non-goals). [`PioCanLowLevel`] is the narrow
//! seam between the protocol logic in this crate and that bring-up code,
//! playing the same role [`crate::config`]'s backend-agnostic timing does for
//! the four PIO state machines described below: one concrete implementation
//! per board, and a host-side test double for everything else.
//!
//! # The four state machines
//!
//! A single PIO instance carries four cooperating state machines, all
//! sharing [`PROGRAM`], a 32-instruction table:
//!
//! - **sync** watches the RX pin, ticks every other state machine once per
//!   bit time, and signals bus idle.
//! - **rx** samples one bit per tick into a byte-wide shift register that
//!   autopushes to its FIFO; a DMA channel drains that FIFO into the
//!   single-byte mailbox [`PioCanLowLevel::read_rx_byte`] exposes.
//! - **ack** watches for a rolling bit pattern supplied by
//!   [`PioCanLowLevel::pio_ack_inject`] and on a match drives the dominant
//!   ACK bit through the tx state machine.
//! - **tx** shifts queued words out one bit per tick, aborting to recessive
//!   idle the instant it reads back a recessive bit it drove dominant (lost
//!   arbitration or a lost ACK race).
//!
//! # Interrupt wiring
//!
//! This crate is driven from exactly two interrupt lines, DMA completion and
//! PIO IRQ0, named by an [`InterruptConfig`] passed to [`PioCanLowLevel::setup`]
//! so a backend knows which vectors to route and unmask — the same
//! `InterruptConfig`-shaped routing/enable pair this HAL's other interrupt-fed
//! peripherals (`gpio`, `uart`, `timer`) take before arming their hardware.

use crate::Hertz;

/// Routes and enables one of this crate's two interrupt lines.
///
/// Mirrors this HAL's own `InterruptConfig`: whether the line needs routing
/// through a board's interrupt-select peripheral before it reaches a vector,
/// and whether it should be unmasked in the NVIC as part of
/// [`PioCanLowLevel::setup`] (vs. left to the caller, e.g. when the vector is
/// shared with something else). `id` is an opaque backend-defined interrupt
/// number — typically a PAC `Interrupt` enum variant cast to `u32` — that
/// this crate never interprets itself, only threads through to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqHandle {
    pub id: u32,
    pub route: bool,
    pub enable_in_nvic: bool,
}

impl IrqHandle {
    pub const fn new(id: u32, route: bool, enable_in_nvic: bool) -> Self {
        IrqHandle {
            id,
            route,
            enable_in_nvic,
        }
    }
}

/// The pair of interrupt lines this crate drives from: DMA completion (feeds
/// [`crate::Can::dma_irq_handler`]) and PIO IRQ0, the sync state machine's
/// bus-idle signal (feeds [`crate::Can::pio_irq_handler`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptConfig {
    pub dma: IrqHandle,
    pub pio: IrqHandle,
}

impl InterruptConfig {
    pub const fn new(dma: IrqHandle, pio: IrqHandle) -> Self {
        InterruptConfig { dma, pio }
    }
}

/// The 32-instruction PIO program shared by all four state machines.
///
/// Authored as data (not assembled on the host) because the instruction
/// encoding is fixed by the PIO ISA and this crate never needs to modify it
/// at runtime; a concrete backend loads it into instruction memory as-is,
/// however that backend chooses to assemble it, without this crate needing a
/// build-time dependency on a particular target's PIO assembler.
pub const PROGRAM_INSTRUCTION_COUNT: usize = 32;

/// Placeholder program table.
///
/// A concrete backend is expected to replace this with the assembled
/// `sync`/`rx`/`ack`/`tx` programs (see the module docs); this crate's
/// protocol logic only ever treats the program as an opaque blob it asks a
/// [`PioCanLowLevel`] implementation to load.
pub const PROGRAM: [u16; PROGRAM_INSTRUCTION_COUNT] = [0; PROGRAM_INSTRUCTION_COUNT];

/// An in-band error code delivered through [`crate::Notification::Error`].
///
/// Kept as a raw numeric code rather than a `thiserror` enum because it
/// crosses the same callback boundary as RX/TX notifications and the wire
/// contract only ever defines one concrete value today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// The PIO RX FIFO overflowed while the parser was waiting on an ACK
    /// response; all four state machines were reset and resynchronized.
    pub const RX_FIFO_STALL: ErrorCode = ErrorCode(0);
}

/// The operations this crate needs from a PIO+DMA backend.
///
/// Implementations own the register-level details of loading [`PROGRAM`],
/// configuring clock dividers, routing GPIO pins, and wiring the DMA
/// channel; this crate only ever calls through this trait.
pub trait PioCanLowLevel {
    /// Bring up the PIO block and DMA channel (but do not yet start
    /// sampling): load the program, configure pin mappings, set the clock
    /// divisor for `bitrate` given a `sys_clock` input, arm the DMA channel
    /// to feed [`Self::read_rx_byte`], and route/unmask `irqs` per their
    /// [`IrqHandle::route`]/[`IrqHandle::enable_in_nvic`] flags.
    fn setup(&mut self, sys_clock: Hertz, bitrate: Hertz, irqs: InterruptConfig) -> Result<(), ErrorCode>;

    /// Enable the sync state machine's bus-idle detector and start the rx,
    /// ack and tx state machines running.
    fn start(&mut self);

    /// Best-effort teardown: stop all four state machines and mask their
    /// interrupts. Safe to call more than once.
    fn shutdown(&mut self);

    /// Queue `count` stuffed words (MSB-first within each word) for
    /// transmission on the tx state machine.
    fn pio_tx_send(&mut self, words: &[u32], count: u32);

    /// Abort an in-progress or queued transmission, returning the bus to
    /// recessive idle.
    fn pio_tx_cancel(&mut self);

    /// Arm the ack state machine to watch for `key` (the expected trailing
    /// CRC+delimiter bit pattern) aligned so a match fires with exactly
    /// `position` bits still to go.
    fn pio_ack_inject(&mut self, key: u32, position: u32);

    /// Disarm the ack state machine without waiting for a match.
    fn pio_ack_cancel(&mut self);

    /// Returns `true` if the PIO RX FIFO overflowed since the last call
    /// (the CPU fell behind the incoming bit stream).
    fn pio_rx_check_stall(&mut self) -> bool;

    /// Enable the bus-idle interrupt on the sync state machine.
    fn pio_sync_enable_idle_irq(&mut self);

    /// Disable the bus-idle interrupt on the sync state machine.
    fn pio_sync_disable_idle_irq(&mut self);

    /// Returns `true` if the sync state machine's bus-idle interrupt is
    /// currently pending.
    fn pio_sync_check_idle_irq(&mut self) -> bool;

    /// Reinitialize just the sync state machine, leaving rx/ack/tx running.
    /// Used when the sync machine's recessive-bit counter overflows while
    /// the parser is waiting for the start of a new frame.
    fn pio_sync_resync(&mut self);

    /// Reset and reconfigure all four state machines from scratch. Used
    /// when the CPU falls behind the incoming bit stream badly enough that
    /// the PIO RX FIFO overflows mid-frame.
    fn pio_reset_all_state_machines(&mut self);

    /// Read and clear the one-byte mailbox the DMA channel fills on each rx
    /// byte arrival. Returns `None` if no byte is pending.
    fn read_rx_byte(&mut self) -> Option<u8>;

    /// Force the DMA-completion interrupt pending, without a byte having
    /// actually arrived. Mirrors the original driver's `pio_irq_handler`
    /// setting the DMA channel's own forced-IRQ register bit so that
    /// `dma_irq_handler` runs again and performs the bus-idle transition,
    /// instead of the PIO ISR performing it directly.
    fn dma_force_irq(&mut self);

    /// Test-and-clear the forced-pending flag set by [`Self::dma_force_irq`].
    /// Returns `true` at most once per [`Self::dma_force_irq`] call.
    fn dma_take_forced_irq(&mut self) -> bool;
}

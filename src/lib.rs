//! Software CAN 2.0B controller for microcontrollers without a hardware CAN
//! peripheral, built on programmable I/O (PIO) state machines and DMA.
//!
//! The CPU-facing surface is small: [`Can::transmit`] enqueues a frame,
//! [`Can::check_transmit`] reports queue space, and a registered
//! [`Notification`] callback delivers RX/TX/error events. Everything below
//! that — synchronization, bit (un)stuffing, CRC, arbitration and ACK — is
//! driven from two interrupt handlers ([`Can::dma_irq_handler`] and
//! [`Can::pio_irq_handler`]) in cooperation with a small PIO program that
//! the hardware backend is responsible for loading (see [`hal`]).
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod crc;
pub mod frame;
pub mod hal;
pub mod parser;
pub mod stuff;
pub mod tx;

mod controller;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{BitTiming, CanConfig};
pub use controller::{Can, Notification, SetupError, TransmitError};
pub use frame::{CanFrame, FrameError};
pub use hal::{ErrorCode, InterruptConfig, IrqHandle, PioCanLowLevel};

/// Rate type used throughout this crate for clocks and bit rates.
pub type Hertz = fugit::HertzU32;

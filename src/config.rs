//! Bit-timing and queue-depth configuration.
//!
//! Mirrors the frozen-config pattern this HAL's clock setup uses: a builder
//! ([`BitTiming`]) collects raw inputs, and [`BitTiming::freeze`] validates
//! them once into an immutable [`CanConfig`] that [`crate::Can::start`]
//! consumes. Validation is deferred to `freeze` rather than performed
//! field-by-field so a caller can build up a config from defaults and only
//! pay for the capacity/power-of-two checks once.

use crate::Hertz;

/// Minimum transmit queue depth; below this the scheduler can't keep a frame
/// queued while a prior one is still draining out of the PIO FIFO.
pub const MIN_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `bitrate` does not evenly divide into a usable PIO clock divisor, or
    /// is zero.
    #[error("bitrate {0} Hz is not achievable from the given system clock")]
    UnachievableBitrate(u32),
    /// Queue depth was below [`MIN_QUEUE_DEPTH`] or not a power of two.
    #[error("transmit queue depth {0} must be a power of two >= {MIN_QUEUE_DEPTH}")]
    InvalidQueueDepth(usize),
    /// The depth configured through [`BitTiming::queue_depth`] doesn't match
    /// the `CAP` the caller's `Can<H, F, CAP>` was instantiated with.
    #[error("configured queue depth {configured} does not match the transmit queue's capacity {capacity}")]
    QueueDepthMismatch { configured: usize, capacity: usize },
}

/// Builder for [`CanConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    sys_clock: Hertz,
    bitrate: Hertz,
    queue_depth: usize,
}

impl BitTiming {
    /// Start a config for `bitrate` bits/second given a `sys_clock` input to
    /// the PIO block, with the default transmit queue depth.
    pub const fn new(sys_clock: Hertz, bitrate: Hertz) -> Self {
        BitTiming {
            sys_clock,
            bitrate,
            queue_depth: 8,
        }
    }

    /// Override the transmit queue depth. Must be a power of two, at least
    /// [`MIN_QUEUE_DEPTH`].
    pub const fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Validate and freeze this configuration.
    pub fn freeze(self) -> Result<CanConfig, ConfigError> {
        let bitrate_hz = self.bitrate.raw();
        if bitrate_hz == 0 {
            return Err(ConfigError::UnachievableBitrate(bitrate_hz));
        }
        // div = (sys_clock * 16) / bitrate: each PIO clock tick is 1/16th of
        // a bit period, giving the sync state machine enough resolution to
        // resample near the middle of each bit.
        let numerator = self.sys_clock.raw() as u64 * 16;
        let div = numerator / bitrate_hz as u64;
        if div == 0 || div > u32::MAX as u64 {
            return Err(ConfigError::UnachievableBitrate(bitrate_hz));
        }
        if self.queue_depth < MIN_QUEUE_DEPTH || !self.queue_depth.is_power_of_two() {
            return Err(ConfigError::InvalidQueueDepth(self.queue_depth));
        }
        Ok(CanConfig {
            sys_clock: self.sys_clock,
            bitrate: self.bitrate,
            clock_div: div as u32,
            queue_depth: self.queue_depth,
        })
    }
}

/// A validated, immutable bit-timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanConfig {
    sys_clock: Hertz,
    bitrate: Hertz,
    clock_div: u32,
    queue_depth: usize,
}

impl CanConfig {
    pub const fn sys_clock(&self) -> Hertz {
        self.sys_clock
    }

    pub const fn bitrate(&self) -> Hertz {
        self.bitrate
    }

    /// The PIO clock divisor to apply uniformly to all four state machines.
    pub const fn clock_div(&self) -> u32 {
        self.clock_div
    }

    pub const fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Confirm the configured queue depth matches the `CAP` the caller's
    /// `Can<H, F, CAP>` ring was actually instantiated with; called from
    /// [`crate::Can::start`] since the const generic isn't visible here.
    pub fn check_capacity(&self, capacity: usize) -> Result<(), ConfigError> {
        if self.queue_depth != capacity {
            return Err(ConfigError::QueueDepthMismatch {
                configured: self.queue_depth,
                capacity,
            });
        }
        Ok(())
    }
}

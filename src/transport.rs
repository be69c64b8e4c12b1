//! Contracts of the peripherals the engine drives.
//!
//! Every call returns immediately. Readiness is not signalled through these traits:
//! interrupt handlers raise [`ProxySignals`](crate::ProxySignals) instead.

use crate::CanFrame;

/// Byte stream towards the host, typically a USB-CDC endpoint pair.
pub trait SerialTransport {
    /// Copy up to `buffer.len()` received bytes, returning how many were copied.
    fn read(&mut self, buffer: &mut [u8]) -> usize;
    /// Queue as much of `buffer` as fits, returning how many bytes were accepted.
    fn write(&mut self, buffer: &[u8]) -> usize;
    /// Bytes waiting to be read.
    fn rx_available(&self) -> usize;
    /// Free space in the transmit queue.
    fn tx_available(&self) -> usize;
    /// Flow control towards the host (RTS). Ignored by transports without it.
    fn set_ready(&mut self, _ready: bool) {}
}

/// Operating mode of the CAN controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusMode {
    Active,
    /// Receive only, never acknowledges or transmits
    Listener,
    Loopback,
}

/// CAN controller with software receive and transmit queues.
pub trait CanTransport {
    type Error: core::fmt::Debug;

    /// Move up to `frames.len()` received frames out of the queue, returning the count.
    fn read(&mut self, frames: &mut [CanFrame]) -> usize;
    /// Queue one frame. Fails when the transmit queue is full.
    fn write(&mut self, frame: &CanFrame) -> Result<(), Self::Error>;
    /// Frames waiting to be read.
    fn rx_available(&self) -> usize;
    /// Free slots in the transmit queue.
    fn tx_available(&self) -> usize;
    fn set_mode(&mut self, mode: BusMode) -> Result<(), Self::Error>;
    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), Self::Error>;
    /// Configured bitrate, `None` until one was set.
    fn bitrate(&self) -> Option<u32>;
    /// Report and clear a latched bus fault.
    fn take_bus_fault(&mut self) -> bool {
        false
    }
}

/// Free running microsecond counter, wrapping at `u32::MAX`.
pub trait MonotonicTimer {
    fn now(&self) -> u32;
}

/// Board level controls reachable from the protocol.
pub trait SystemControl {
    /// Restart into the bootloader. Does not return on real hardware.
    fn reset_to_bootloader(&self);
}

#![cfg_attr(not(test), no_std)]
//! # slcan_bridge
//!
//! ## Features
//!
//! This crate is the protocol translator of a USB-CDC to CAN bridge. It speaks the Serial
//! Line CAN (SLCAN) protocol used by the Linux kernel `slcan` driver on one side and a CAN
//! controller on the other. Lines arriving on the serial side are parsed into commands
//! (open/close the channel, select a bitrate, transmit a frame, query versions, ...) and
//! frames arriving from the bus are packed back into ASCII lines.
//!
//! Frames begin with one character that defines what type of CAN frame it is:
//! 't' - a standard id CAN frame
//! 'r' - a standard id RTR CAN frame
//! 'T' - an extended id CAN frame
//! 'R' - an extended id RTR CAN frame
//! Following this identifier, there are either 3 hex digits for a standard id, or 8 hex
//! digits for an extended id, then one hex digit with the data length in bytes (0 - 8),
//! then two hex digits per data byte and a carriage return.
//!
//! An example for a standard id CAN frame:
//! id: 0x23
//! data length: 2
//! data bytes: 0xa0 0xb0
//!
//! the bytes to represent this are:
//! t0232A0B0\r
//!
//! The engine ([`ProxyEngine`]) never allocates and never blocks. It borrows its transports
//! through the [`transport`] traits, learns about transport readiness through
//! [`ProxySignals`] latches that interrupt handlers raise, and is driven by whoever drains
//! the work queue. [`ProxyHub`] bundles several engines with their activity indicators.

#[macro_use]
extern crate machine;

pub mod codec;
pub mod command;
mod hal_02;
pub mod hex;
pub mod indicator;
mod parser;
pub mod port;
pub mod proxy;
pub mod signal;
pub mod storage;
pub mod transport;
pub mod version;

#[cfg(test)]
mod mock;

pub use crate::command::{Command, Reply};
pub use crate::indicator::{Indicator, LedIndicator, NullIndicator, PwmIndicator};
pub use crate::parser::{LineAccumulator, LINE_CAPACITY};
pub use crate::port::{ModePair, PortState, ProxyHub, ProxyPort};
pub use crate::proxy::{ChannelMode, ProxyConfig, ProxyEngine, ProxyEvent, ProxyObserver};
pub use crate::signal::{ProxySignals, Work, WorkKind, WorkQueue};
pub use crate::storage::{Memory, ParamStorage, ParamStore, SerialNumber, StorageError};
pub use crate::transport::{BusMode, CanTransport, MonotonicTimer, SerialTransport, SystemControl};
pub use crate::version::BoardVersion;

use bitflags::bitflags;
use core::convert::TryFrom;
use core::fmt;
use embedded_can::{Error, ErrorKind, ExtendedId, Frame, Id, StandardId};

/// Errors that can be encountered in this crate
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlcanError {
    /// Char received for binary field not a hexadecimal character
    NotAHexChar,
    /// Data length not within bounds
    DataLen(usize),
    /// Standard id value too large
    StandardIdOverflow,
    /// Extended id value too large
    ExtendedIdOverflow,
    /// Line is shorter than the header its type requires
    Truncated,
    /// Declared data length needs more digits than the line carries
    MissingData,
    /// Output buffer cannot hold the packed frame
    BufferTooSmall,
    /// First byte of a line is not a known command
    UnknownCommand(u8),
    /// Command arguments have the wrong length or value
    InvalidCommand,
}

impl fmt::Display for SlcanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlcanError::NotAHexChar => f.write_str("not a hex digit"),
            SlcanError::DataLen(len) => write!(f, "data length {} out of range", len),
            SlcanError::StandardIdOverflow => f.write_str("standard id exceeds 11 bits"),
            SlcanError::ExtendedIdOverflow => f.write_str("extended id exceeds 29 bits"),
            SlcanError::Truncated => f.write_str("frame header truncated"),
            SlcanError::MissingData => f.write_str("frame data shorter than its length"),
            SlcanError::BufferTooSmall => f.write_str("output buffer too small"),
            SlcanError::UnknownCommand(byte) => write!(f, "unknown command 0x{:02x}", byte),
            SlcanError::InvalidCommand => f.write_str("invalid command arguments"),
        }
    }
}

impl Error for SlcanError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Constrain a usize to values allowed for frame data length [0..8]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameDataLen(usize);

impl FrameDataLen {
    /// Largest data length of a classic CAN frame
    pub const MAX: usize = 8;

    /// Create a new `FrameDataLen`
    pub const fn new(value: usize) -> Result<Self, SlcanError> {
        if value <= Self::MAX {
            Ok(Self(value))
        } else {
            Err(SlcanError::DataLen(value))
        }
    }
    /// Get the raw value of the FrameDataLen
    pub const fn raw(&self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for FrameDataLen {
    type Error = SlcanError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        FrameDataLen::new(value)
    }
}

bitflags! {
    /// Layout bits of a [`CanFrame`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// 29-bit identifier
        const EXTENDED = 1 << 0;
        /// Remote transmission request, no data field
        const RTR = 1 << 1;
    }
}

/// One classic CAN frame.
///
/// Equality compares the identifier, the RTR bit, the data length and the meaningful data
/// bytes. The timestamp is advisory and does not take part.
#[derive(Debug, Copy, Clone)]
pub struct CanFrame {
    id: Id,
    rtr: bool,
    dlc: FrameDataLen,
    data: [u8; 8],
    timestamp: u32,
}

impl CanFrame {
    /// an empty frame
    pub const fn empty() -> Self {
        CanFrame {
            id: Id::Standard(StandardId::ZERO),
            rtr: false,
            dlc: FrameDataLen(0),
            data: [0; 8],
            timestamp: 0,
        }
    }

    /// a frame
    pub fn new_frame(can_id: impl Into<Id>, data: &[u8]) -> Result<Self, SlcanError> {
        let mut frame = CanFrame {
            id: can_id.into(),
            dlc: FrameDataLen::try_from(data.len())?,
            ..CanFrame::empty()
        };
        frame.data[..frame.dlc.raw()].copy_from_slice(data);
        Ok(frame)
    }

    /// a remote frame, `dlc` is requested but no data is carried
    pub fn new_remote_frame(can_id: impl Into<Id>, dlc: usize) -> Result<Self, SlcanError> {
        Ok(CanFrame {
            id: can_id.into(),
            rtr: true,
            dlc: FrameDataLen::try_from(dlc)?,
            ..CanFrame::empty()
        })
    }

    /// Build a frame from a numeric id and [`FrameFlags`].
    ///
    /// For remote frames only the length of `payload` is kept.
    pub fn from_parts(raw_id: u32, flags: FrameFlags, payload: &[u8]) -> Result<Self, SlcanError> {
        let id = if flags.contains(FrameFlags::EXTENDED) {
            Id::Extended(ExtendedId::new(raw_id).ok_or(SlcanError::ExtendedIdOverflow)?)
        } else {
            let raw = u16::try_from(raw_id).map_err(|_| SlcanError::StandardIdOverflow)?;
            Id::Standard(StandardId::new(raw).ok_or(SlcanError::StandardIdOverflow)?)
        };

        if flags.contains(FrameFlags::RTR) {
            CanFrame::new_remote_frame(id, payload.len())
        } else {
            CanFrame::new_frame(id, payload)
        }
    }

    /// Attach a receive timestamp.
    pub const fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The typed identifier.
    pub const fn id(&self) -> Id {
        self.id
    }

    /// The identifier as a number, 11 or 29 bits significant.
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw(),
        }
    }

    pub fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::EXTENDED, self.is_extended());
        flags.set(FrameFlags::RTR, self.rtr);
        flags
    }

    pub const fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    pub const fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    pub const fn dlc(&self) -> usize {
        self.dlc.raw()
    }

    /// Meaningful data bytes, empty for remote frames.
    pub fn data(&self) -> &[u8] {
        if self.rtr {
            &[]
        } else {
            &self.data[..self.dlc.raw()]
        }
    }

    pub const fn timestamp(&self) -> u32 {
        self.timestamp
    }
}

impl Default for CanFrame {
    fn default() -> Self {
        CanFrame::empty()
    }
}

impl PartialEq for CanFrame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.rtr == other.rtr
            && self.dlc == other.dlc
            && self.data() == other.data()
    }
}

impl Eq for CanFrame {}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let starting_char = ['t', 'r', 'T', 'R'];
        let mut offset = if self.is_extended() { 2 } else { 0 };
        if self.rtr {
            offset += 1;
        }
        match self.id {
            Id::Standard(id) => write!(f, "{}{:03X}", starting_char[offset], id.as_raw())?,
            Id::Extended(id) => write!(f, "{}{:08X}", starting_char[offset], id.as_raw())?,
        }
        write!(f, "{:X}", self.dlc.raw())?;
        for byte in self.data() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CanFrame {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "CanFrame {{ id: {=u32:#x}, ext: {=bool}, rtr: {=bool}, data: {=[u8]:#x} }}",
            self.raw_id(),
            self.is_extended(),
            self.rtr,
            self.data()
        )
    }
}

impl Frame for CanFrame {
    /// Creates a new frame.
    ///
    /// This will return `None` if the data slice is too long.
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        CanFrame::new_frame(id, data).ok()
    }

    /// Creates a new remote frame (RTR bit set).
    ///
    /// This will return `None` if the data length code (DLC) is not valid.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        CanFrame::new_remote_frame(id, dlc).ok()
    }

    fn is_extended(&self) -> bool {
        CanFrame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    fn id(&self) -> Id {
        self.id
    }

    /// Returns the data length code (DLC) which is in the range 0..8.
    ///
    /// For data frames the DLC value always matches the length of the data.
    /// Remote frames do not carry any data, yet the DLC can be greater than 0.
    fn dlc(&self) -> usize {
        self.dlc.raw()
    }

    fn data(&self) -> &[u8] {
        CanFrame::data(self)
    }
}

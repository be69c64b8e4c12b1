//! Decoding of one SLCAN command line and encoding of its reply.

use crate::codec::{self, pack_number16, RESPONSE_MTU};
use crate::hex::{hex_to_bin, hex_to_bin4, is_hex};
use crate::proxy::ChannelMode;
use crate::{CanFrame, FrameFlags, SlcanError};
use heapless::Vec;

/// Bitrates selected by `S0` .. `S8`.
pub const BITRATE_TABLE: [u32; 9] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 800_000, 1_000_000,
];

/// Frames sent per self-test group.
pub const TEST_GROUP_SIZE: usize = 1000;

/// Frame shapes exercised by the self-test, selected by `X0` .. `X5`.
pub const TEST_GROUPS: [TestGroup; 6] = [
    // standard frames with empty data field
    TestGroup::new(FrameFlags::empty(), 0),
    // standard frames with 64-bit data field
    TestGroup::new(FrameFlags::empty(), 8),
    // extended frames with empty data field
    TestGroup::new(FrameFlags::EXTENDED, 0),
    // extended frames with 64-bit data field
    TestGroup::new(FrameFlags::EXTENDED, 8),
    // standard RTR frames
    TestGroup::new(FrameFlags::RTR, 0),
    // extended RTR frames
    TestGroup::new(FrameFlags::RTR.union(FrameFlags::EXTENDED), 0),
];

/// One self-test burst shape.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TestGroup {
    pub flags: FrameFlags,
    pub length: usize,
}

impl TestGroup {
    pub const fn new(flags: FrameFlags, length: usize) -> Self {
        TestGroup { flags, length }
    }
}

/// A decoded command line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    /// `sXXXX` .. `sXXXXXX` arbitrary rate, `Sn` table rate
    SetBitrate(u32),
    /// `t`, `T`, `r`, `R`
    Transmit(CanFrame),
    /// `O`, `L`, `I`/`l`, `C`
    SetMode(ChannelMode),
    /// `X` runs every group, `Xn` only group `n`
    SelfTest(Option<TestGroup>),
    /// `V`
    ReadHardwareVersion,
    /// `v`
    ReadSoftwareVersion,
    /// `N`
    ReadSerialNumber,
    /// `nXXXX`
    WriteSerialNumber(u16),
    /// `B`
    EnterBootloader,
    /// `F`
    ReadStatus,
    /// `W`, accepted and ignored
    SetFilterMode,
    /// `Z`, accepted and ignored
    SetTimestamp,
    /// `b0` / `b1`
    SetBlocking(bool),
}

impl Command {
    /// Decodes a command from one line without its terminator.
    ///
    /// An empty line decodes to `None`; it is answered with nothing at all.
    pub fn decode(line: &[u8]) -> Result<Option<Self>, SlcanError> {
        let (&op, args) = match line.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };

        let command = match op {
            b's' => {
                if !(4..=6).contains(&args.len()) {
                    return Err(SlcanError::InvalidCommand);
                }
                if !is_hex(args) {
                    return Err(SlcanError::NotAHexChar);
                }
                let rate = args
                    .iter()
                    .fold(0u32, |rate, digit| (rate << 4) | u32::from(hex_to_bin(*digit)));
                Command::SetBitrate(rate)
            }
            b'S' => {
                let code = single_digit(args)?;
                let rate = BITRATE_TABLE
                    .get(usize::from(code))
                    .ok_or(SlcanError::InvalidCommand)?;
                Command::SetBitrate(*rate)
            }
            b't' | b'T' | b'r' | b'R' => Command::Transmit(codec::unpack_frame(line)?),
            b'O' => Command::SetMode(ChannelMode::Active),
            b'I' | b'l' => Command::SetMode(ChannelMode::Loopback),
            b'L' => Command::SetMode(ChannelMode::Listener),
            b'C' => Command::SetMode(ChannelMode::Disabled),
            b'X' => {
                if args.is_empty() {
                    Command::SelfTest(None)
                } else {
                    let code = single_digit(args)?;
                    let group = TEST_GROUPS
                        .get(usize::from(code))
                        .ok_or(SlcanError::InvalidCommand)?;
                    Command::SelfTest(Some(*group))
                }
            }
            b'V' => Command::ReadHardwareVersion,
            b'v' => Command::ReadSoftwareVersion,
            b'N' => Command::ReadSerialNumber,
            b'n' => {
                let digits = <[u8; 4]>::try_from(args).map_err(|_| SlcanError::InvalidCommand)?;
                if !is_hex(&digits) {
                    return Err(SlcanError::NotAHexChar);
                }
                Command::WriteSerialNumber(hex_to_bin4(digits))
            }
            b'B' => Command::EnterBootloader,
            b'F' => Command::ReadStatus,
            b'W' => Command::SetFilterMode,
            b'Z' => Command::SetTimestamp,
            b'b' => match args {
                b"0" => Command::SetBlocking(false),
                b"1" => Command::SetBlocking(true),
                _ => return Err(SlcanError::InvalidCommand),
            },
            other => return Err(SlcanError::UnknownCommand(other)),
        };

        Ok(Some(command))
    }

    /// True for the frame transmit commands.
    pub fn is_frame(line: &[u8]) -> bool {
        matches!(line.first(), Some(b't' | b'T' | b'r' | b'R'))
    }
}

fn single_digit(args: &[u8]) -> Result<u8, SlcanError> {
    match args {
        [digit] if digit.is_ascii_hexdigit() => Ok(hex_to_bin(*digit)),
        [_] => Err(SlcanError::NotAHexChar),
        _ => Err(SlcanError::InvalidCommand),
    }
}

/// Answer written back to the serial side after a command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reply {
    /// nothing is written
    Silent,
    /// `\r`
    Ack,
    /// `\a`
    Bell,
    /// `z\r`, frame queued for transmission
    Transmitted,
    /// `z00\r`, status flags placeholder
    Status,
    /// command letter, four hex digits, `\r`
    Number(u8, u16),
}

impl Reply {
    pub fn from_success(success: bool) -> Self {
        if success {
            Reply::Ack
        } else {
            Reply::Bell
        }
    }

    /// Wire bytes of this reply.
    pub fn encode(&self) -> Vec<u8, RESPONSE_MTU> {
        let mut out = Vec::new();
        let bytes: &[u8] = match self {
            Reply::Silent => b"",
            Reply::Ack => b"\r",
            Reply::Bell => b"\x07",
            Reply::Transmitted => b"z\r",
            Reply::Status => b"z00\r",
            Reply::Number(prefix, value) => {
                // RESPONSE_MTU is sized for exactly this
                let _ = out.extend_from_slice(&pack_number16(*prefix, *value));
                return out;
            }
        };
        let _ = out.extend_from_slice(bytes);
        out
    }
}

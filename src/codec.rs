//! Fixed-width ASCII wire form of single frames and numeric reports.
//!
//! Extended frames are `<T|R><8 hex id><1 hex length><2*length hex data>\r`, standard
//! frames `<t|r><3 hex id><1 hex length><2*length hex data>\r`. Remote frames carry the
//! requested length but no data digits.

use crate::hex::{
    bin_to_hex, bin_to_hex4, byte_to_hex, hex_to_bin, hex_to_bin4, hex_to_byte, is_hex,
};
use crate::{CanFrame, FrameDataLen, FrameFlags, SlcanError};
use embedded_can::{ExtendedId, Id, StandardId};

/// Type byte, 8 id digits and the length digit.
pub const EXT_HEADER_LEN: usize = 10;
/// Type byte, 3 id digits and the length digit.
pub const STD_HEADER_LEN: usize = 5;
/// Worst case packed frame: extended header, 8 data bytes and the terminator.
pub const SERIALIZED_FRAME_MTU: usize = EXT_HEADER_LEN + 2 * FrameDataLen::MAX + 1;
/// Largest reply to a command, a prefixed 16-bit report.
pub const RESPONSE_MTU: usize = 6;
/// Bytes pulled from the serial transport per read.
pub const SERIAL_MTU: usize = 64;
/// Frames moved per CAN to serial drain, also the CAN TX headroom required before more
/// serial input is accepted.
pub const SERIALIZED_QUEUE_SIZE: usize = 4;

/// Header length for frames with these flags.
pub const fn header_len(flags: FrameFlags) -> usize {
    if flags.contains(FrameFlags::EXTENDED) {
        EXT_HEADER_LEN
    } else {
        STD_HEADER_LEN
    }
}

/// Exact number of bytes [`pack_frame`] produces for `frame`.
pub fn packed_len(frame: &CanFrame) -> usize {
    header_len(frame.flags()) + 2 * frame.data().len() + 1
}

/// Serialize `frame` into the start of `buffer` and return the number of bytes written.
///
/// Nothing past the returned length is touched.
pub fn pack_frame(frame: &CanFrame, buffer: &mut [u8]) -> Result<usize, SlcanError> {
    let length = packed_len(frame);
    let out = buffer
        .get_mut(..length)
        .ok_or(SlcanError::BufferTooSmall)?;
    let dlc = frame.dlc() as u8;

    let header = match frame.id() {
        Id::Standard(id) => {
            out[0] = if frame.is_remote_frame() { b'r' } else { b't' };
            out[1..5].copy_from_slice(&bin_to_hex4((id.as_raw() << 4) | u16::from(dlc)));
            STD_HEADER_LEN
        }
        Id::Extended(id) => {
            let raw = id.as_raw();
            out[0] = if frame.is_remote_frame() { b'R' } else { b'T' };
            out[1..5].copy_from_slice(&bin_to_hex4((raw >> 16) as u16));
            out[5..9].copy_from_slice(&bin_to_hex4(raw as u16));
            out[9] = bin_to_hex(dlc);
            EXT_HEADER_LEN
        }
    };

    for (digits, byte) in out[header..length - 1]
        .chunks_exact_mut(2)
        .zip(frame.data())
    {
        digits.copy_from_slice(&byte_to_hex(*byte));
    }
    out[length - 1] = b'\r';

    Ok(length)
}

fn quad(text: &[u8], at: usize) -> Result<[u8; 4], SlcanError> {
    text.get(at..at + 4)
        .and_then(|digits| <[u8; 4]>::try_from(digits).ok())
        .ok_or(SlcanError::Truncated)
}

/// Parse one frame line, without its terminator.
///
/// Bytes after the declared data are ignored, as is everything after the header of a
/// remote frame.
pub fn unpack_frame(line: &[u8]) -> Result<CanFrame, SlcanError> {
    let (&kind, _) = line.split_first().ok_or(SlcanError::Truncated)?;
    let (extended, rtr) = match kind {
        b't' => (false, false),
        b'r' => (false, true),
        b'T' => (true, false),
        b'R' => (true, true),
        other => return Err(SlcanError::UnknownCommand(other)),
    };
    let header_len = if extended { EXT_HEADER_LEN } else { STD_HEADER_LEN };
    let header = line.get(1..header_len).ok_or(SlcanError::Truncated)?;
    if !is_hex(header) {
        return Err(SlcanError::NotAHexChar);
    }

    let (id, dlc) = if extended {
        let high = u32::from(hex_to_bin4(quad(header, 0)?));
        let raw = (high << 16) | u32::from(hex_to_bin4(quad(header, 4)?));
        let id = ExtendedId::new(raw).ok_or(SlcanError::ExtendedIdOverflow)?;
        (Id::Extended(id), usize::from(hex_to_bin(header[8])))
    } else {
        let joined = hex_to_bin4(quad(header, 0)?);
        // three digits can spell 12 bits; only 0x000..=0x7FF fits an 11-bit identifier
        let id = StandardId::new(joined >> 4).ok_or(SlcanError::StandardIdOverflow)?;
        (Id::Standard(id), usize::from(joined & 0x000F))
    };
    FrameDataLen::new(dlc)?;

    if rtr {
        return CanFrame::new_remote_frame(id, dlc);
    }

    let text = line
        .get(header_len..header_len + 2 * dlc)
        .ok_or(SlcanError::MissingData)?;
    if !is_hex(text) {
        return Err(SlcanError::NotAHexChar);
    }
    let mut data = [0u8; FrameDataLen::MAX];
    for (byte, digits) in data.iter_mut().zip(text.chunks_exact(2)) {
        *byte = hex_to_byte([digits[0], digits[1]]);
    }

    CanFrame::new_frame(id, &data[..dlc])
}

/// A 16-bit report: prefix byte, four hex digits and the terminator.
pub fn pack_number16(prefix: u8, value: u16) -> [u8; RESPONSE_MTU] {
    let digits = bin_to_hex4(value);
    [prefix, digits[0], digits[1], digits[2], digits[3], b'\r']
}

/// Nominal bits on the wire for one frame, including stuffing and interframe space.
pub fn frame_bit_length(flags: FrameFlags, dlc: usize) -> u32 {
    let mut length: u32 = if flags.contains(FrameFlags::EXTENDED) { 64 } else { 44 };
    if !flags.contains(FrameFlags::RTR) {
        length += (dlc.min(FrameDataLen::MAX) as u32) << 3;
    }
    // stuffing
    length += (length - 11) >> 2;
    // interframe spacing
    length + 3
}

/// Time in microseconds needed to put `count` frames of this shape on a bus running at
/// `bitrate`.
pub fn transmit_time_us(flags: FrameFlags, dlc: usize, bitrate: u32, count: u32) -> u32 {
    if bitrate == 0 {
        return 0;
    }
    (frame_bit_length(flags, dlc).saturating_mul(1_000_000) / bitrate).saturating_mul(count)
}

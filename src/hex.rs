//! Branchless ASCII hex conversion.
//!
//! The single-digit helpers accept both `'a'..='f'` and `'A'..='F'` and always emit
//! upper case. None of these routines reject garbage: a byte that is not a hex digit
//! decodes to some unspecified nibble, so callers validate or bound their input first
//! (see [`is_hex`]).

/// Convert the low nibble of `value` to its ASCII digit.
#[inline]
pub const fn bin_to_hex(value: u8) -> u8 {
    let value = value & 0x0F;
    value + if value < 10 { 0x30 } else { 0x37 }
}

/// Convert an ASCII hex digit to its nibble value.
#[inline]
pub const fn hex_to_bin(code: u8) -> u8 {
    let code = code & 0xCF;
    if code < 10 {
        code
    } else {
        code.wrapping_sub(0x37) & 0x0F
    }
}

/// Convert a 16-bit value to four ASCII digits, most significant first.
#[inline]
pub const fn bin_to_hex4(value: u16) -> [u8; 4] {
    let value = value as u32;
    let t0 = (value | (value << 8)) & 0x00FF_00FF;
    let t1 = (t0 | (t0 << 4)) & 0x0F0F_0F0F;
    let t2 = (((t1 + 0x0606_0606) & 0x1010_1010) >> 4) * 0x07;

    (t1 + t2 + 0x3030_3030).to_be_bytes()
}

/// Convert four ASCII hex digits, most significant first, to a 16-bit value.
#[inline]
pub const fn hex_to_bin4(text: [u8; 4]) -> u16 {
    let t0 = u32::from_be_bytes(text) & 0xCFCF_CFCF;
    let t1 = t0.wrapping_sub(((t0 & 0x4040_4040) >> 6).wrapping_mul(0x37));
    let t2 = (t1 | (t1 >> 4)) & 0x00FF_00FF;

    (t2 | (t2 >> 8)) as u16
}

/// Two ASCII digits for one byte.
#[inline]
pub const fn byte_to_hex(value: u8) -> [u8; 2] {
    [bin_to_hex(value >> 4), bin_to_hex(value)]
}

/// One byte from two ASCII digits.
#[inline]
pub const fn hex_to_byte(text: [u8; 2]) -> u8 {
    (hex_to_bin(text[0]) << 4) | hex_to_bin(text[1])
}

/// True when every byte of `text` is an ASCII hex digit.
#[inline]
pub fn is_hex(text: &[u8]) -> bool {
    text.iter().all(u8::is_ascii_hexdigit)
}

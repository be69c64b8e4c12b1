/// Hardware and firmware revisions reported by `V` and `v`.
///
/// Each is reported as four hex digits, major byte first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoardVersion {
    pub hw_major: u8,
    pub hw_minor: u8,
    pub sw_major: u8,
    pub sw_minor: u8,
}

impl BoardVersion {
    pub const fn new(hw_major: u8, hw_minor: u8, sw_major: u8, sw_minor: u8) -> Self {
        BoardVersion {
            hw_major,
            hw_minor,
            sw_major,
            sw_minor,
        }
    }

    pub const fn hardware(&self) -> u16 {
        u16::from_be_bytes([self.hw_major, self.hw_minor])
    }

    pub const fn software(&self) -> u16 {
        u16::from_be_bytes([self.sw_major, self.sw_minor])
    }
}

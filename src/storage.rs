//! Persisted board parameters.
//!
//! The block at `offset` holds the serial number as a little-endian `u64` followed by the
//! CRC-32 of those eight bytes, also little-endian. A block that fails the check leaves
//! the defaults in place. A valid serial number is never overwritten: saving re-reads
//! the block when no serial number is cached.

use crate::hex::bin_to_hex4;
use core::cell::{Cell, RefCell};
use core::fmt;
use crc::{Crc, CRC_32_ISO_HDLC};
use log::*;

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const SERIAL_LEN: usize = 8;
const BLOCK_LEN: usize = SERIAL_LEN + 4;

/// Serial number of a board that was never provisioned.
pub const UNSET_SERIAL: u64 = u64::MAX;

/// `0` and all ones are reserved.
pub const fn is_serial_number_valid(number: u64) -> bool {
    number != 0 && number != UNSET_SERIAL
}

/// Addressed, byte granular non-volatile memory such as an EEPROM.
pub trait Memory {
    type Error: fmt::Debug;

    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), Self::Error>;
    fn write(&mut self, address: u32, buffer: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// The memory refused the transfer
    Memory,
    /// The stored block is corrupt or was never written
    Checksum,
    /// A valid serial number is already stored
    AlreadySet,
    /// The value is one of the reserved serial numbers
    Invalid,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Memory => write!(f, "memory transfer failed"),
            StorageError::Checksum => write!(f, "parameter checksum mismatch"),
            StorageError::AlreadySet => write!(f, "serial number already set"),
            StorageError::Invalid => write!(f, "reserved serial number"),
        }
    }
}

/// Serial number persistence as seen by the protocol engine.
pub trait ParamStore {
    /// The stored serial number, `None` while unset.
    fn load(&self) -> Option<u64>;
    /// Store a serial number. Only an unset store accepts one.
    fn save(&self, serial: u64) -> Result<(), StorageError>;
}

/// Parameter block kept in a [`Memory`], with a cached copy of its values.
#[derive(Debug)]
pub struct ParamStorage<M> {
    memory: RefCell<M>,
    offset: u32,
    serial: Cell<u64>,
}

impl<M: Memory> ParamStorage<M> {
    fn new(memory: M, offset: u32) -> Self {
        ParamStorage {
            memory: RefCell::new(memory),
            offset,
            serial: Cell::new(UNSET_SERIAL),
        }
    }

    /// Bind to the block at `offset` and read it. A missing or corrupt block leaves the
    /// defaults in place.
    pub fn open(memory: M, offset: u32) -> Self {
        let storage = ParamStorage::new(memory, offset);
        if let Err(error) = storage.restore() {
            debug!("parameters at {:#x} not restored: {}", offset, error);
        }
        storage
    }

    /// Read and check the stored block, returning the serial number it holds.
    pub fn restore(&self) -> Result<u64, StorageError> {
        let mut block = [0u8; BLOCK_LEN];
        self.memory
            .borrow_mut()
            .read(self.offset, &mut block)
            .map_err(|error| {
                warn!("parameter read failed: {:?}", error);
                StorageError::Memory
            })?;

        let (values, checksum) = block.split_at(SERIAL_LEN);
        let mut stored = [0u8; 4];
        stored.copy_from_slice(checksum);
        if CRC.checksum(values) != u32::from_le_bytes(stored) {
            debug!("no valid parameter block at {:#x}", self.offset);
            return Err(StorageError::Checksum);
        }

        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(values);
        let serial = u64::from_le_bytes(serial);
        self.serial.set(serial);
        Ok(serial)
    }

    /// Write `serial` to the block. The cached value follows only a successful write.
    pub fn persist(&self, serial: u64) -> Result<(), StorageError> {
        let values = serial.to_le_bytes();
        let mut block = [0u8; BLOCK_LEN];
        block[..SERIAL_LEN].copy_from_slice(&values);
        block[SERIAL_LEN..].copy_from_slice(&CRC.checksum(&values).to_le_bytes());

        self.memory
            .borrow_mut()
            .write(self.offset, &block)
            .map_err(|error| {
                warn!("parameter write failed: {:?}", error);
                StorageError::Memory
            })?;
        self.serial.set(serial);
        info!("serial number set to {:016X}", serial);
        Ok(())
    }

    /// Cached serial number, [`UNSET_SERIAL`] by default.
    pub fn serial(&self) -> u64 {
        self.serial.get()
    }

    pub fn into_inner(self) -> M {
        self.memory.into_inner()
    }
}

impl<M: Memory> ParamStore for ParamStorage<M> {
    fn load(&self) -> Option<u64> {
        let serial = self.serial.get();
        is_serial_number_valid(serial).then_some(serial)
    }

    fn save(&self, serial: u64) -> Result<(), StorageError> {
        if !is_serial_number_valid(serial) {
            return Err(StorageError::Invalid);
        }
        if self.load().is_some() {
            return Err(StorageError::AlreadySet);
        }
        // the block may have become readable since it was opened
        match self.restore() {
            Ok(stored) if is_serial_number_valid(stored) => return Err(StorageError::AlreadySet),
            Ok(_) | Err(StorageError::Checksum) => {}
            Err(error) => return Err(error),
        }
        self.persist(serial)
    }
}

/// Text form of a serial number: sixteen upper-case hex digits, most significant first.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SerialNumber([u8; 16]);

impl SerialNumber {
    pub fn new(serial: u64) -> Self {
        let mut text = [0u8; 16];
        for (digits, shift) in text.chunks_exact_mut(4).zip([48u32, 32, 16, 0]) {
            digits.copy_from_slice(&bin_to_hex4((serial >> shift) as u16));
        }
        SerialNumber(text)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEeprom;
    use test_log::test;

    #[test]
    fn blank_memory_keeps_defaults() {
        let storage = ParamStorage::open(MockEeprom::blank(), 0);
        assert_eq!(storage.restore(), Err(StorageError::Checksum));
        assert_eq!(storage.serial(), UNSET_SERIAL);
        assert_eq!(storage.load(), None);
    }

    #[test]
    fn block_layout() {
        let storage = ParamStorage::open(MockEeprom::blank(), 16);
        storage.persist(0x0102_0304_0506_0708).unwrap();
        let eeprom = storage.into_inner();
        assert_eq!(&eeprom.bytes[16..24], &[8, 7, 6, 5, 4, 3, 2, 1]);
        let checksum = CRC.checksum(&[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&eeprom.bytes[24..28], &checksum.to_le_bytes());
        assert!(eeprom.bytes[..16].iter().all(|byte| *byte == 0xFF));
        assert_eq!(eeprom.writes, 1);
    }

    #[test]
    fn open_restores_the_block() {
        let storage = ParamStorage::open(MockEeprom::blank(), 4);
        storage.save(42).unwrap();
        let reopened = ParamStorage::open(storage.into_inner(), 4);
        assert_eq!(reopened.serial(), 42);
        assert_eq!(reopened.load(), Some(42));
        assert_eq!(reopened.save(43), Err(StorageError::AlreadySet));
        assert_eq!(reopened.into_inner().writes, 1);
    }

    #[test]
    fn save_checks_memory_before_writing() {
        let storage = ParamStorage::open(MockEeprom::blank(), 0);
        storage.persist(0x1234).unwrap();
        // defaults only, the block was never read through this instance
        let unread = ParamStorage::new(storage.into_inner(), 0);
        assert_eq!(unread.load(), None);
        assert_eq!(unread.save(0x5678), Err(StorageError::AlreadySet));
        assert_eq!(unread.load(), Some(0x1234));
        assert_eq!(unread.into_inner().writes, 1);
    }

    #[test]
    fn corrupted_block_is_rejected() {
        let storage = ParamStorage::open(MockEeprom::blank(), 0);
        storage.persist(1234).unwrap();
        let mut eeprom = storage.into_inner();
        eeprom.bytes[3] ^= 0x10;
        let corrupted = ParamStorage::open(eeprom, 0);
        assert_eq!(corrupted.restore(), Err(StorageError::Checksum));
        assert_eq!(corrupted.load(), None);
        // a corrupt block may be replaced
        assert_eq!(corrupted.save(99), Ok(()));
    }

    #[test]
    fn write_once() {
        let storage = ParamStorage::open(MockEeprom::blank(), 0);
        assert_eq!(storage.save(0), Err(StorageError::Invalid));
        assert_eq!(storage.save(UNSET_SERIAL), Err(StorageError::Invalid));
        assert_eq!(storage.save(7), Ok(()));
        assert_eq!(storage.save(8), Err(StorageError::AlreadySet));
        assert_eq!(storage.load(), Some(7));
    }

    #[test]
    fn failed_write_changes_nothing() {
        let mut eeprom = MockEeprom::blank();
        eeprom.fail = true;
        let storage = ParamStorage::open(eeprom, 0);
        assert_eq!(storage.save(7), Err(StorageError::Memory));
        assert_eq!(storage.load(), None);
    }

    #[test]
    fn out_of_range_block() {
        let storage = ParamStorage::open(MockEeprom::blank(), 60);
        assert_eq!(storage.restore(), Err(StorageError::Memory));
        assert_eq!(storage.save(7), Err(StorageError::Memory));
    }

    #[test]
    fn serial_number_text() {
        let text = SerialNumber::new(0x0123_4567_89AB_CDEF);
        assert_eq!(text.as_str(), "0123456789ABCDEF");
        assert_eq!(text.as_bytes().len(), 16);
        assert_eq!(std::format!("{}", SerialNumber::new(0x1A2B)), "0000000000001A2B");
        assert!(!is_serial_number_valid(0));
        assert!(is_serial_number_valid(1));
    }
}

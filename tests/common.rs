#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use flash_backlog::RecordAddress;
use flash_backlog::platform::PowerControl;

pub const FLASH_SECTOR_SIZE: usize = 4096;
pub const FOOTER_SIZE: usize = 5;

pub fn address(sector_index: u16, record_index: u16) -> RecordAddress {
    RecordAddress {
        sector_index,
        record_index,
    }
}

/// Flash accepting reads and writes at any byte offset.
pub type Flash = MockFlash<1>;
// Taken from https://github.com/esp-rs/esp-hal/blob/main/esp-storage/src/stub.rs
pub type WordFlash = MockFlash<4>;

/// In-memory NOR flash. Writes can only clear bits, erasing sets whole sectors to 0xFF.
/// `W` is the read and write granularity.
#[derive(Default)]
pub struct MockFlash<const W: usize> {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
    pub asleep: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl<const W: usize> MockFlash<W> {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn sector(&self, sector_index: usize) -> &[u8] {
        let start = sector_index * FLASH_SECTOR_SIZE;
        &self.buf[start..start + FLASH_SECTOR_SIZE]
    }

    pub fn sector_mut(&mut self, sector_index: usize) -> &mut [u8] {
        let start = sector_index * FLASH_SECTOR_SIZE;
        &mut self.buf[start..start + FLASH_SECTOR_SIZE]
    }

    /// The raw 5 byte footer at the end of a sector.
    pub fn footer(&self, sector_index: usize) -> [u8; FOOTER_SIZE] {
        let sector = self.sector(sector_index);
        let mut footer = [0u8; FOOTER_SIZE];
        footer.copy_from_slice(&sector[FLASH_SECTOR_SIZE - FOOTER_SIZE..]);
        footer
    }

    /// Overwrites the lifecycle tag of a sector, ignoring flash semantics.
    pub fn set_active_tag(&mut self, sector_index: usize, tag: u8) {
        self.sector_mut(sector_index)[FLASH_SECTOR_SIZE - 1] = tag;
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl<const W: usize> ErrorType for MockFlash<W> {
    type Error = FlashError;
}

impl<const W: usize> ReadNorFlash for MockFlash<W> {
    const READ_SIZE: usize = W;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));
        assert!(!self.asleep, "read while asleep");

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl<const W: usize> NorFlash for MockFlash<W> {
    const WRITE_SIZE: usize = W;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(!self.asleep, "erase while asleep");

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!self.asleep, "write while asleep");

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        assert!(!bytes.is_empty());

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl<const W: usize> PowerControl for MockFlash<W> {
    fn sleep(&mut self) {
        self.asleep = true;
    }

    fn wakeup(&mut self) {
        self.asleep = false;
    }
}

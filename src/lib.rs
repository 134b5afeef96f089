#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod backlog;
mod bits;
pub mod error;
mod internal;
pub mod platform;
mod raw;
mod record;

pub use raw::{LifecycleTag, SectorState};
pub use record::Record;

use crate::backlog::BacklogCursor;
use crate::error::Error;
use crate::platform::{MAX_WORD_SIZE, Platform};
use crate::raw::{FLASH_SECTOR_SIZE, Footer};

/// Size of an erase sector. Partitions have to be aligned to it.
pub const SECTOR_SIZE: usize = FLASH_SECTOR_SIZE;

/// Largest supported record size in bytes.
pub const MAX_RECORD_SIZE: u8 = raw::MAX_RECORD_SIZE;

/// Location of a record. Only meaningful as long as the sector wasn't reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordAddress {
    pub sector_index: u16,
    pub record_index: u16,
}

/// A record yielded by [`Log::next_backlog_address`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BacklogEntry {
    pub address: RecordAddress,
    pub record_size: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectorInfo {
    pub state: SectorState,
    pub tag: LifecycleTag,
    /// `None` for blank sectors
    pub record_size: Option<u8>,
    pub capacity: u16,
    pub written: u16,
    pub unsent: u16,
    /// Historical sector whose records were all marked as sent.
    pub flushed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogStatistics {
    pub sectors: SectorStatistics,
    pub records: RecordStatistics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectorStatistics {
    pub blank: u16,
    pub active: u16,
    pub inactive: u16,
    pub flushed: u16,
    pub corrupted: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordStatistics {
    pub written: u32,
    pub sent: u32,
    pub unsent: u32,
}

/// The Log struct only caches the state of the active sector, everything else is read from
/// flash on demand. Its size doesn't depend on the size of the partition.
pub struct Log<T: Platform> {
    pub(crate) hal: T,
    pub(crate) base_address: usize,
    pub(crate) sectors: u16,
    pub(crate) faulted: bool,

    // set after calling self.load
    pub(crate) current_sector: u16,
    pub(crate) next_record: u16,
    pub(crate) footer: Footer,
    pub(crate) cursor: Option<BacklogCursor>,
}

impl<T: Platform> Log<T> {
    /// Opens the log in the given partition. Locates the active sector by a binary search over
    /// the lifecycle tags and restores the write position from its position bitmap.
    ///
    /// A partition that was never written to is valid, the first write activates sector 0.
    pub fn new(partition_offset: usize, partition_size: usize, hal: T) -> Result<Log<T>, Error> {
        let mut log = Self::with_geometry(partition_offset, partition_size, hal)?;

        match log.load() {
            Ok(()) => Ok(log),
            Err(Error::FlashError) => {
                log.faulted = true;
                Err(Error::FlashError)
            }
            Err(e) => Err(e),
        }
    }

    /// Erases the whole partition and opens an empty log. Use this when [`Log::new`] reports
    /// a corrupted filesystem.
    pub fn format(
        partition_offset: usize,
        partition_size: usize,
        hal: T,
    ) -> Result<Log<T>, Error> {
        let mut log = Self::with_geometry(partition_offset, partition_size, hal)?;
        log.erase_all()?;
        Ok(log)
    }

    fn with_geometry(
        partition_offset: usize,
        partition_size: usize,
        hal: T,
    ) -> Result<Log<T>, Error> {
        if !partition_offset.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(Error::InvalidPartitionOffset);
        }

        if !partition_size.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(Error::InvalidPartitionSize);
        }

        let sectors = partition_size / FLASH_SECTOR_SIZE;
        if !(2..=u16::MAX as usize).contains(&sectors)
            || partition_offset + partition_size > hal.capacity()
        {
            return Err(Error::InvalidPartitionSize);
        }

        if T::READ_SIZE > MAX_WORD_SIZE
            || T::WRITE_SIZE > MAX_WORD_SIZE
            || !FLASH_SECTOR_SIZE.is_multiple_of(T::ERASE_SIZE)
        {
            return Err(Error::UnsupportedFlash);
        }

        Ok(Self {
            hal,
            base_address: partition_offset,
            sectors: sectors as u16,
            faulted: false,
            current_sector: 0,
            next_record: 0,
            footer: Footer::blank(),
            cursor: None,
        })
    }

    fn track<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if let Err(Error::FlashError) = result {
            self.faulted = true;
        }
        result
    }

    fn ensure_healthy(&self) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }
        Ok(())
    }

    /// Appends a record of 1 to 254 bytes and returns its address.
    ///
    /// All records of a sector share one size. Writing a record of a different size starts a
    /// new sector, unless the active one is still empty.
    pub fn write_record(&mut self, record: &[u8]) -> Result<RecordAddress, Error> {
        self.ensure_healthy()?;

        let result = self.append_record(record);
        self.track(result)
    }

    /// Reads a record into the beginning of `buf` and returns its size. `buf` is left
    /// untouched on error.
    pub fn read_record(&mut self, address: RecordAddress, buf: &mut [u8]) -> Result<usize, Error> {
        let result = self.load_record(address, buf);
        self.track(result)
    }

    /// Reads the records back to back into `buf` and returns the number of bytes written.
    pub fn read_records(
        &mut self,
        addresses: &[RecordAddress],
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let mut total = 0;
        for &address in addresses {
            let remaining = buf.get_mut(total..).ok_or(Error::BufferTooSmall)?;
            let result = self.load_record(address, remaining);
            total += self.track(result)?;
        }
        Ok(total)
    }

    /// Appends a typed record, see [`Record`].
    pub fn append<R: Record>(&mut self, record: &R) -> Result<RecordAddress, Error> {
        self.ensure_healthy()?;

        let result = self.append_typed(record);
        self.track(result)
    }

    /// Reads a typed record. Fails with [`Error::RecordSizeMismatch`] if the stored record has
    /// a different size than `R`.
    pub fn get<R: Record>(&mut self, address: RecordAddress) -> Result<R, Error> {
        let result = self.load_typed(address);
        self.track(result)
    }

    /// Clears the unsent flag of a record. Marking a record twice is fine.
    ///
    /// Once every record of a historical sector is sent, the sector summary is written and
    /// backlog scans skip the sector without looking at its bitmaps.
    pub fn mark_record_sent(&mut self, address: RecordAddress) -> Result<(), Error> {
        self.ensure_healthy()?;

        let result = self.mark_sent(address);
        self.track(result)
    }

    pub fn mark_records_sent(&mut self, addresses: &[RecordAddress]) -> Result<(), Error> {
        self.ensure_healthy()?;

        for &address in addresses {
            let result = self.mark_sent(address);
            self.track(result)?;
        }
        Ok(())
    }

    /// Marks the newest record as sent and returns its address, `None` if nothing was written
    /// yet.
    pub fn mark_latest_written_record_sent(&mut self) -> Result<Option<RecordAddress>, Error> {
        self.ensure_healthy()?;

        let Some(address) = self.latest_written_record()? else {
            return Ok(None);
        };
        let result = self.mark_sent(address);
        self.track(result)?;
        Ok(Some(address))
    }

    /// The sector holding the newest record: the active sector if it holds a record, otherwise
    /// the one before it unless that one is blank.
    pub fn latest_written_record_sector(&mut self) -> Result<Option<u16>, Error> {
        if self.next_record > 0 {
            return Ok(Some(self.current_sector));
        }

        let previous = self.prev_sector(self.current_sector);
        let result = self.read_lifecycle_tag(previous);
        match self.track(result)?.state() {
            SectorState::Blank => Ok(None),
            SectorState::Active | SectorState::Inactive => Ok(Some(previous)),
        }
    }

    /// Index of the newest record in a sector.
    pub fn latest_written_record_index(&mut self, sector_index: u16) -> Result<Option<u16>, Error> {
        Ok(self
            .next_record_index_for_sector(sector_index)?
            .checked_sub(1))
    }

    pub fn latest_written_record(&mut self) -> Result<Option<RecordAddress>, Error> {
        let Some(sector_index) = self.latest_written_record_sector()? else {
            return Ok(None);
        };
        Ok(self
            .latest_written_record_index(sector_index)?
            .map(|record_index| RecordAddress {
                sector_index,
                record_index,
            }))
    }

    /// Number of records written to a sector, which is also the index the next record would
    /// get there.
    pub fn next_record_index_for_sector(&mut self, sector_index: u16) -> Result<u16, Error> {
        let result = self.sector_status(sector_index);
        let (_, written) = self.track(result)?;
        Ok(written)
    }

    pub fn current_sector_index(&self) -> u16 {
        self.current_sector
    }

    pub fn next_record_index(&self) -> u16 {
        self.next_record
    }

    pub fn sector_count(&self) -> u16 {
        self.sectors
    }

    /// Oldest sector holding unsent records.
    pub fn earliest_backlog_sector(&mut self) -> Result<Option<u16>, Error> {
        let result = self.find_earliest_backlog_sector();
        self.track(result)
    }

    /// Newest sector holding unsent records.
    pub fn latest_backlog_sector(&mut self) -> Result<Option<u16>, Error> {
        let result = self.find_latest_backlog_sector();
        self.track(result)
    }

    /// Lowest index of an unsent record in a sector.
    pub fn earliest_backlog_index(&mut self, sector_index: u16) -> Result<Option<u16>, Error> {
        let result = self.earliest_unsent_index(sector_index);
        self.track(result)
    }

    /// Highest index of an unsent record in a sector.
    pub fn latest_backlog_index(&mut self, sector_index: u16) -> Result<Option<u16>, Error> {
        let result = self.latest_unsent_index(sector_index);
        self.track(result)
    }

    /// Highest index of an unsent record in a sector that is below `preceding`.
    pub fn latest_backlog_index_before(
        &mut self,
        sector_index: u16,
        preceding: u16,
    ) -> Result<Option<u16>, Error> {
        let result = self.latest_unsent_index_before(sector_index, preceding);
        self.track(result)
    }

    /// Fills `out` with the newest unsent records, newest first, as long as their sizes add
    /// up to at most `payload_budget` bytes. Stops at the first record of a different size, at
    /// a blank sector, or after a full pass over the partition. Returns the number of
    /// addresses written.
    pub fn retrieve_latest_backlog_addresses(
        &mut self,
        payload_budget: usize,
        out: &mut [RecordAddress],
    ) -> Result<usize, Error> {
        let result = self.retrieve_latest_backlog(payload_budget, out);
        self.track(result)
    }

    /// Yields the unsent records one by one, newest first. After the last one `None` is
    /// returned once and the next call starts over from the newest record.
    ///
    /// The position survives writes but not [`Log::erase_all`]. A rollover that reuses the
    /// oldest sector ends the walk before that sector, or starts it over if the walk was
    /// still inside it.
    pub fn next_backlog_address(&mut self) -> Result<Option<BacklogEntry>, Error> {
        let result = self.next_backlog();
        self.track(result)
    }

    pub fn reset_backlog_cursor(&mut self) {
        self.cursor = None;
    }

    pub fn is_record_sent(&mut self, address: RecordAddress) -> Result<bool, Error> {
        let result = self.record_sent(address);
        self.track(result)
    }

    /// Decoded footer and record counts of a sector.
    pub fn sector_info(&mut self, sector_index: u16) -> Result<SectorInfo, Error> {
        let result = self.sector_info_inner(sector_index);
        self.track(result)
    }

    fn sector_info_inner(&mut self, sector_index: u16) -> Result<SectorInfo, Error> {
        let (footer, written) = self.sector_status(sector_index)?;
        let unsent = self.unsent_count(sector_index, &footer, written)? as u16;
        let blank = footer.is_blank();

        Ok(SectorInfo {
            state: footer.state(),
            tag: footer.active_tag,
            record_size: (!blank).then_some(footer.record_size),
            capacity: if blank { 0 } else { footer.capacity },
            written,
            unsent,
            flushed: footer.state() == SectorState::Inactive && footer.summary().is_flushed(),
        })
    }

    /// True if every byte of the sector is erased.
    pub fn verify_blank(&mut self, sector_index: u16) -> Result<bool, Error> {
        self.check_sector(sector_index)?;

        let start = self.layout(sector_index).start;
        let mut chunk = [0u8; 256];
        for offset in (start..start + FLASH_SECTOR_SIZE).step_by(chunk.len()) {
            let result = self.read_bytes(offset, &mut chunk);
            self.track(result)?;
            if chunk.iter().any(|&byte| byte != 0xFF) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns detailed statistics about the partition usage. Reads every sector footer.
    pub fn statistics(&mut self) -> Result<LogStatistics, Error> {
        self.ensure_healthy()?;

        let mut sectors = SectorStatistics {
            blank: 0,
            active: 0,
            inactive: 0,
            flushed: 0,
            corrupted: 0,
        };
        let mut records = RecordStatistics {
            written: 0,
            sent: 0,
            unsent: 0,
        };

        for sector_index in 0..self.sectors {
            let info = match self.sector_info_inner(sector_index) {
                Ok(info) => info,
                Err(Error::FilesystemCorrupted) => {
                    sectors.corrupted += 1;
                    continue;
                }
                Err(e) => return self.track(Err(e)),
            };

            match info.state {
                SectorState::Blank => sectors.blank += 1,
                SectorState::Active => sectors.active += 1,
                SectorState::Inactive => sectors.inactive += 1,
            }
            if info.flushed {
                sectors.flushed += 1;
            }

            records.written += info.written as u32;
            records.unsent += info.unsent as u32;
            records.sent += (info.written - info.unsent) as u32;
        }

        Ok(LogStatistics { sectors, records })
    }

    /// Erases the whole partition, dropping every record. Clears a previous flash error.
    pub fn erase_all(&mut self) -> Result<(), Error> {
        let result = self.erase_partition();
        self.track(result)?;

        self.faulted = false;
        self.current_sector = 0;
        self.next_record = 0;
        self.footer = Footer::blank();
        self.cursor = None;
        Ok(())
    }

    pub fn sleep(&mut self) {
        self.hal.sleep();
    }

    pub fn wakeup(&mut self) {
        self.hal.wakeup();
    }

    /// Gives the flash device back.
    pub fn into_inner(self) -> T {
        self.hal
    }
}

use crate::bits;
use crate::error::Error;
use crate::error::Error::{FilesystemCorrupted, InconsistentFlag, InvalidAddress, SectorFull};
use crate::platform::Platform;
use crate::raw::{
    FLASH_SECTOR_SIZE, FOOTER_SIZE, Footer, LifecycleTag, MAX_BITMAP_LEN, MAX_RECORD_SIZE,
    SUMMARY_SIZE, SectorLayout, SectorState, SectorSummary, clear_bit, read_unaligned,
    write_unaligned,
};
use crate::{Log, RecordAddress};
#[cfg(feature = "defmt")]
use defmt::trace;
#[cfg(feature = "defmt")]
use defmt::warn;

impl<T> Log<T>
where
    T: Platform,
{
    pub(crate) fn layout(&self, sector_index: u16) -> SectorLayout {
        SectorLayout::new(self.base_address, sector_index)
    }

    pub(crate) fn next_sector(&self, sector_index: u16) -> u16 {
        if sector_index + 1 >= self.sectors {
            0
        } else {
            sector_index + 1
        }
    }

    pub(crate) fn prev_sector(&self, sector_index: u16) -> u16 {
        if sector_index == 0 {
            self.sectors - 1
        } else {
            sector_index - 1
        }
    }

    pub(crate) fn check_sector(&self, sector_index: u16) -> Result<(), Error> {
        if sector_index >= self.sectors {
            return Err(InvalidAddress);
        }
        Ok(())
    }

    pub(crate) fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Error> {
        read_unaligned(&mut self.hal, offset, buf).map_err(|_| Error::FlashError)
    }

    pub(crate) fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        write_unaligned(&mut self.hal, offset, bytes).map_err(|_| Error::FlashError)
    }

    pub(crate) fn read_footer(&mut self, sector_index: u16) -> Result<Footer, Error> {
        #[cfg(feature = "defmt")]
        trace!("read_footer: [{}]", sector_index);

        let mut raw = [0u8; FOOTER_SIZE];
        self.read_bytes(self.layout(sector_index).footer(), &mut raw)?;
        let footer = Footer::from_bytes(raw);

        #[cfg(feature = "debug-logs")]
        println!("  internal: read_footer [{sector_index:>3}]: {footer:?}");

        if footer.validate().is_err() {
            #[cfg(feature = "defmt")]
            warn!("invalid footer in sector {}", sector_index);
            return Err(FilesystemCorrupted);
        }

        Ok(footer)
    }

    fn write_footer(&mut self, sector_index: u16, footer: Footer) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_footer: [{}]", sector_index);

        #[cfg(feature = "debug-logs")]
        println!("  internal: write_footer [{sector_index:>3}]: {footer:?}");

        self.write_bytes(self.layout(sector_index).footer(), &footer.to_bytes())
    }

    pub(crate) fn read_lifecycle_tag(&mut self, sector_index: u16) -> Result<LifecycleTag, Error> {
        let mut raw = [0u8; 1];
        self.read_bytes(self.layout(sector_index).active_tag(), &mut raw)?;
        Ok(LifecycleTag(raw[0]))
    }

    pub(crate) fn read_summary(&mut self, sector_index: u16) -> Result<SectorSummary, Error> {
        let mut raw = [0u8; SUMMARY_SIZE];
        self.read_bytes(self.layout(sector_index).summary(), &mut raw)?;
        Ok(SectorSummary::from_bytes(raw))
    }

    /// Reads the first `bytes_for_bits(bits)` bytes of a bitmap into `buf`. The footer has been
    /// validated before, but the bound is checked again so that a bad capacity can never index
    /// past the buffer.
    pub(crate) fn read_bitmap<'a>(
        &mut self,
        offset: usize,
        bits: u16,
        buf: &'a mut [u8; MAX_BITMAP_LEN],
    ) -> Result<&'a [u8], Error> {
        let len = bits::bytes_for_bits(bits as usize);
        let target = buf.get_mut(..len).ok_or(FilesystemCorrupted)?;
        self.read_bytes(offset, target)?;
        Ok(target)
    }

    /// The number of records written to a sector, derived from the first free slot of its
    /// position bitmap.
    pub(crate) fn written_count(&mut self, sector_index: u16, footer: &Footer) -> Result<u16, Error> {
        if footer.is_blank() {
            return Ok(0);
        }

        let offset = self
            .layout(sector_index)
            .position_bitmap(footer.bitmap_len());
        let capacity = footer.capacity;
        let mut buf = [0u8; MAX_BITMAP_LEN];
        let bitmap = self.read_bitmap(offset, capacity, &mut buf)?;

        let capacity = capacity as usize;
        let written = bits::first_set_bit(bitmap, capacity).unwrap_or(capacity);

        // slots are taken strictly in order, a written slot after a free one means the bitmap
        // doesn't belong to this footer
        if bits::count_set_bits(bitmap, capacity) != capacity - written {
            #[cfg(feature = "defmt")]
            warn!("position bitmap of sector {} has gaps", sector_index);

            #[cfg(feature = "debug-logs")]
            println!("  internal: written_count [{sector_index:>3}]: position bitmap has gaps");

            return Err(FilesystemCorrupted);
        }

        Ok(written as u16)
    }

    /// Footer and written record count of a sector. The active sector is served from the cache.
    pub(crate) fn sector_status(&mut self, sector_index: u16) -> Result<(Footer, u16), Error> {
        self.check_sector(sector_index)?;

        if sector_index == self.current_sector {
            return Ok((self.footer, self.next_record));
        }

        let footer = self.read_footer(sector_index)?;
        let written = self.written_count(sector_index, &footer)?;
        Ok((footer, written))
    }

    /// Returns footer and written count of the addressed sector if `address` points to a
    /// written record.
    pub(crate) fn validate_address(
        &mut self,
        address: RecordAddress,
    ) -> Result<(Footer, u16), Error> {
        let (footer, written) = self.sector_status(address.sector_index)?;

        if footer.is_blank() || address.record_index >= written {
            #[cfg(feature = "debug-logs")]
            println!("  internal: validate_address: invalid {address:?}, written: {written}");

            return Err(InvalidAddress);
        }

        Ok((footer, written))
    }

    pub(crate) fn load(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("load");

        #[cfg(feature = "debug-logs")]
        println!("internal: load");

        let sector_index = self.locate_active_sector()?;
        self.current_sector = sector_index;
        self.footer = self.read_footer(sector_index)?;
        let footer = self.footer;
        self.next_record = self.written_count(sector_index, &footer)?;
        self.cursor = None;

        #[cfg(feature = "debug-logs")]
        println!(
            "internal: load: active sector {sector_index}, next record {}",
            self.next_record
        );

        // power was lost between filling the sector and switching to the next one
        if footer.state() == SectorState::Active && self.next_record >= footer.capacity {
            #[cfg(feature = "defmt")]
            warn!("active sector {} is full, rolling over", sector_index);

            self.activate_next_sector(footer.record_size)?;
        }

        Ok(())
    }

    /// Binary search for the single active sector. Tags are piecewise constant along the
    /// sector array with the active sector at the boundary, so comparing against the tag of
    /// sector 0 tells on which side of the boundary a sector lies.
    fn locate_active_sector(&mut self) -> Result<u16, Error> {
        #[cfg(feature = "defmt")]
        trace!("locate_active_sector");

        let lower_tag = self.read_lifecycle_tag(0)?;
        match lower_tag.state() {
            SectorState::Blank | SectorState::Active => return Ok(0),
            SectorState::Inactive => {}
        }

        let mut lower = 0u16;
        let mut upper = self.sectors;
        loop {
            let mid = ((lower as u32 + upper as u32) / 2) as u16;
            if mid == lower {
                break;
            }

            let mid_tag = self.read_lifecycle_tag(mid)?;

            #[cfg(feature = "debug-logs")]
            println!("internal: locate_active_sector: {lower}..{upper} [{mid}]: {mid_tag:?}");

            if mid_tag.state() == SectorState::Active {
                return Ok(mid);
            }

            if mid_tag == lower_tag {
                lower = mid;
            } else {
                upper = mid;
            }
        }

        #[cfg(feature = "defmt")]
        warn!("binary search found no active sector, scanning all sectors");

        self.scan_active_sector()
    }

    fn scan_active_sector(&mut self) -> Result<u16, Error> {
        for sector_index in 1..self.sectors {
            if self.read_lifecycle_tag(sector_index)?.state() == SectorState::Active {
                return Ok(sector_index);
            }
        }

        #[cfg(feature = "defmt")]
        warn!("no active sector found");

        #[cfg(feature = "debug-logs")]
        println!("internal: scan_active_sector: no active sector found");

        Err(FilesystemCorrupted)
    }

    pub(crate) fn erase_sector(&mut self, sector_index: u16) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_sector: [{}]", sector_index);

        #[cfg(feature = "debug-logs")]
        println!("  internal: erase_sector [{sector_index:>3}]");

        let layout = self.layout(sector_index);
        self.hal
            .erase(layout.start as _, layout.end() as _)
            .map_err(|_| Error::FlashError)
    }

    pub(crate) fn erase_partition(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_partition");

        let end = self.base_address + self.sectors as usize * FLASH_SECTOR_SIZE;
        self.hal
            .erase(self.base_address as _, end as _)
            .map_err(|_| Error::FlashError)
    }

    fn activate_blank_sector(&mut self, record_size: u8) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("activate_blank_sector: [{}]", self.current_sector);

        // a footer write was interrupted, it can't be programmed again without an erase
        if !self.footer.is_erased() {
            self.erase_sector(self.current_sector)?;
        }

        let footer = Footer::new(record_size, self.footer.active_tag.activated());
        self.write_footer(self.current_sector, footer)?;
        self.footer = footer;
        self.next_record = 0;

        Ok(())
    }

    fn deactivate_current_sector(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("deactivate_current_sector: [{}]", self.current_sector);

        let tag = self.read_lifecycle_tag(self.current_sector)?;
        if tag.state() != SectorState::Active {
            #[cfg(feature = "defmt")]
            warn!(
                "sector {} is not active: {:#04x}",
                self.current_sector,
                tag.raw()
            );

            #[cfg(feature = "debug-logs")]
            println!("  internal: deactivate_current_sector: not active: {tag:?}");

            return Err(InconsistentFlag);
        }

        let deactivated = tag.deactivated();
        let offset = self.layout(self.current_sector).active_tag();
        self.write_bytes(offset, &[deactivated.raw()])?;
        self.footer.active_tag = deactivated;

        Ok(())
    }

    /// Hands over to the following sector, erasing whatever it held before.
    pub(crate) fn activate_next_sector(&mut self, record_size: u8) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("activate_next_sector: {}", record_size);

        self.deactivate_current_sector()?;

        // records sent while the sector was still active never triggered the summary
        let previous = self.current_sector;
        let previous_footer = self.footer;
        if self.unsent_count(previous, &previous_footer, self.next_record)? == 0 {
            self.mark_sector_sent(previous)?;
        }

        let next = self.next_sector(previous);
        let old_tag = self.read_lifecycle_tag(next)?;
        self.erase_sector(next)?;

        // the erased sector was the oldest one, the walk has to stop before it
        if let Some(mut cursor) = self.cursor {
            if cursor.sector == next {
                self.cursor = None;
            } else if cursor.terminate == next {
                cursor.terminate = self.next_sector(next);
                self.cursor = Some(cursor);
            }
        }

        let footer = Footer::new(record_size, old_tag.activated());
        self.write_footer(next, footer)?;

        self.current_sector = next;
        self.footer = footer;
        self.next_record = 0;

        #[cfg(feature = "debug-logs")]
        println!("  internal: activate_next_sector: {previous} -> {next}");

        Ok(())
    }

    /// Only used for an empty active sector whose record size has to change.
    fn reactivate_current_sector(&mut self, record_size: u8) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("reactivate_current_sector: [{}]", self.current_sector);

        let footer = Footer::new(record_size, self.footer.active_tag);
        self.erase_sector(self.current_sector)?;
        self.write_footer(self.current_sector, footer)?;
        self.footer = footer;
        self.next_record = 0;

        Ok(())
    }

    fn increment_record_index(&mut self) -> Result<(), Error> {
        let offset = self
            .layout(self.current_sector)
            .position_bitmap(self.footer.bitmap_len());
        clear_bit(&mut self.hal, offset, self.next_record).map_err(|_| Error::FlashError)?;

        self.next_record += 1;
        if self.next_record >= self.footer.capacity {
            return Err(SectorFull);
        }

        Ok(())
    }

    pub(crate) fn append_record(&mut self, record: &[u8]) -> Result<RecordAddress, Error> {
        #[cfg(feature = "defmt")]
        trace!("append_record: [{}]", record.len());

        let record_size = u8::try_from(record.len())
            .ok()
            .filter(|size| (1..=MAX_RECORD_SIZE).contains(size))
            .ok_or(Error::InvalidRecordSize)?;

        match self.footer.state() {
            SectorState::Blank => self.activate_blank_sector(record_size)?,
            SectorState::Active => {
                if self.footer.record_size != record_size {
                    if self.next_record == 0 {
                        self.reactivate_current_sector(record_size)?;
                    } else {
                        self.activate_next_sector(record_size)?;
                    }
                }
            }
            SectorState::Inactive => {
                #[cfg(feature = "defmt")]
                warn!("current sector {} is inactive", self.current_sector);
                return Err(FilesystemCorrupted);
            }
        }

        let address = RecordAddress {
            sector_index: self.current_sector,
            record_index: self.next_record,
        };

        let offset = self
            .layout(address.sector_index)
            .record(address.record_index, record_size);

        #[cfg(feature = "debug-logs")]
        println!("  internal: append_record: {address:?} @0x{offset:0>8x}");

        self.write_bytes(offset, record)?;

        match self.increment_record_index() {
            Ok(()) => {}
            Err(SectorFull) => self.activate_next_sector(record_size)?,
            Err(e) => return Err(e),
        }

        Ok(address)
    }

    /// Reads a record into `buf` using the record size stored in its own sector.
    pub(crate) fn load_record(
        &mut self,
        address: RecordAddress,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        #[cfg(feature = "defmt")]
        trace!(
            "load_record: [{}][{}]",
            address.sector_index, address.record_index
        );

        let (footer, _) = self.validate_address(address)?;
        let record_size = footer.record_size as usize;
        let target = buf.get_mut(..record_size).ok_or(Error::BufferTooSmall)?;

        // buf stays untouched unless the whole record could be read
        let mut scratch = [0u8; MAX_RECORD_SIZE as usize];
        let offset = self
            .layout(address.sector_index)
            .record(address.record_index, footer.record_size);
        read_unaligned(&mut self.hal, offset, &mut scratch[..record_size])
            .map_err(|_| Error::FlashError)?;
        target.copy_from_slice(&scratch[..record_size]);

        Ok(record_size)
    }
}

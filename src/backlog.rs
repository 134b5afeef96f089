use crate::bits;
use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{Footer, LifecycleTag, MAX_BITMAP_LEN, SectorSummary, clear_bit};
use crate::{BacklogEntry, Log, RecordAddress};
#[cfg(feature = "defmt")]
use defmt::trace;
#[cfg(feature = "defmt")]
use defmt::warn;

/// Position of the pull-style backlog iterator. `record` is an exclusive upper bound within
/// `sector`, `terminate` is the last sector visited before wrapping into the current pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BacklogCursor {
    pub(crate) sector: u16,
    pub(crate) record: u16,
    pub(crate) terminate: u16,
}

impl<T> Log<T>
where
    T: Platform,
{
    /// Loads the unsent bitmap of a sector, trimmed to the `written` records.
    fn read_unsent_bitmap<'a>(
        &mut self,
        sector_index: u16,
        footer: &Footer,
        written: u16,
        buf: &'a mut [u8; MAX_BITMAP_LEN],
    ) -> Result<&'a [u8], Error> {
        let offset = self
            .layout(sector_index)
            .unsent_bitmap(footer.bitmap_len());
        self.read_bitmap(offset, written, buf)
    }

    pub(crate) fn unsent_count(
        &mut self,
        sector_index: u16,
        footer: &Footer,
        written: u16,
    ) -> Result<usize, Error> {
        if written == 0 {
            return Ok(0);
        }

        let mut buf = [0u8; MAX_BITMAP_LEN];
        let bitmap = self.read_unsent_bitmap(sector_index, footer, written, &mut buf)?;
        Ok(bits::count_set_bits(bitmap, written as usize))
    }

    pub(crate) fn record_sent(&mut self, address: RecordAddress) -> Result<bool, Error> {
        let (footer, written) = self.validate_address(address)?;

        let mut buf = [0u8; MAX_BITMAP_LEN];
        let bitmap = self.read_unsent_bitmap(address.sector_index, &footer, written, &mut buf)?;
        let byte = bitmap[address.record_index as usize / 8];
        Ok(byte & (1 << (address.record_index % 8)) == 0)
    }

    pub(crate) fn mark_sent(&mut self, address: RecordAddress) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!(
            "mark_sent: [{}][{}]",
            address.sector_index, address.record_index
        );

        let (footer, written) = self.validate_address(address)?;

        let offset = self
            .layout(address.sector_index)
            .unsent_bitmap(footer.bitmap_len());
        clear_bit(&mut self.hal, offset, address.record_index).map_err(|_| Error::FlashError)?;

        // the active sector gets its summary once it is deactivated
        if address.sector_index != self.current_sector
            && !footer.summary().is_flushed()
            && self.unsent_count(address.sector_index, &footer, written)? == 0
        {
            self.mark_sector_sent(address.sector_index)?;
        }

        Ok(())
    }

    /// Copies the active tag into the unsent tag so later scans can skip the sector without
    /// looking at its bitmaps.
    pub(crate) fn mark_sector_sent(&mut self, sector_index: u16) -> Result<(), Error> {
        let summary = self.read_summary(sector_index)?;
        if summary.is_flushed() {
            return Ok(());
        }

        if summary.unsent != LifecycleTag::BLANK {
            #[cfg(feature = "defmt")]
            warn!(
                "sector {} has unexpected unsent tag {:#04x}",
                sector_index,
                summary.unsent.raw()
            );
            return Err(Error::InconsistentFlag);
        }

        #[cfg(feature = "debug-logs")]
        println!("  backlog: mark_sector_sent [{sector_index:>3}]: {summary:?}");

        let offset = self.layout(sector_index).summary();
        self.write_bytes(offset, &[summary.active.raw()])
    }

    pub(crate) fn earliest_unsent_index(&mut self, sector_index: u16) -> Result<Option<u16>, Error> {
        let (footer, written) = self.sector_status(sector_index)?;
        if written == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; MAX_BITMAP_LEN];
        let bitmap = self.read_unsent_bitmap(sector_index, &footer, written, &mut buf)?;
        Ok(bits::first_set_bit(bitmap, written as usize).map(|index| index as u16))
    }

    /// Latest unsent record with an index below `preceding`.
    pub(crate) fn latest_unsent_index_before(
        &mut self,
        sector_index: u16,
        preceding: u16,
    ) -> Result<Option<u16>, Error> {
        let (footer, written) = self.sector_status(sector_index)?;
        let bound = written.min(preceding);
        if bound == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; MAX_BITMAP_LEN];
        let bitmap = self.read_unsent_bitmap(sector_index, &footer, bound, &mut buf)?;
        Ok(bits::last_set_bit(bitmap, bound as usize).map(|index| index as u16))
    }

    pub(crate) fn latest_unsent_index(&mut self, sector_index: u16) -> Result<Option<u16>, Error> {
        self.latest_unsent_index_before(sector_index, u16::MAX)
    }

    /// The summary answers for flushed historical sectors, everything else is confirmed
    /// against the unsent bitmap. The active sector never carries a summary.
    fn sector_has_backlog(
        &mut self,
        sector_index: u16,
        summary: SectorSummary,
    ) -> Result<bool, Error> {
        if sector_index != self.current_sector && summary.is_flushed() {
            return Ok(false);
        }

        Ok(self.earliest_unsent_index(sector_index)?.is_some())
    }

    /// Oldest sector holding unsent records, scanning forward from the sector after the
    /// active one.
    pub(crate) fn find_earliest_backlog_sector(&mut self) -> Result<Option<u16>, Error> {
        #[cfg(feature = "defmt")]
        trace!("find_earliest_backlog_sector");

        let mut sector_index = self.next_sector(self.current_sector);
        for _ in 0..self.sectors {
            let summary = self.read_summary(sector_index)?;
            if self.sector_has_backlog(sector_index, summary)? {
                return Ok(Some(sector_index));
            }
            sector_index = self.next_sector(sector_index);
        }

        Ok(None)
    }

    /// Newest sector holding unsent records, scanning backward from the active sector. A blank
    /// sector marks the end of the written history.
    pub(crate) fn find_latest_backlog_sector(&mut self) -> Result<Option<u16>, Error> {
        #[cfg(feature = "defmt")]
        trace!("find_latest_backlog_sector");

        let mut sector_index = if self.next_record == 0 {
            self.prev_sector(self.current_sector)
        } else {
            self.current_sector
        };

        for _ in 0..self.sectors {
            let summary = self.read_summary(sector_index)?;
            if summary.active == LifecycleTag::BLANK {
                return Ok(None);
            }
            if self.sector_has_backlog(sector_index, summary)? {
                return Ok(Some(sector_index));
            }
            sector_index = self.prev_sector(sector_index);
        }

        Ok(None)
    }

    /// Collects unsent records newest first until `budget` bytes are used up or `out` is full.
    /// Only records sharing the record size of the newest one are collected.
    pub(crate) fn retrieve_latest_backlog(
        &mut self,
        budget: usize,
        out: &mut [RecordAddress],
    ) -> Result<usize, Error> {
        #[cfg(feature = "defmt")]
        trace!("retrieve_latest_backlog: {} bytes", budget);

        let Some(start) = self.find_latest_backlog_sector()? else {
            return Ok(0);
        };
        let Some(mut record_index) = self.latest_unsent_index(start)? else {
            return Ok(0);
        };

        let (footer, _) = self.sector_status(start)?;
        let record_size = footer.record_size;

        let mut sector_index = start;
        let mut count = 0;
        let mut total = 0;
        'collect: while count < out.len() && total + record_size as usize <= budget {
            out[count] = RecordAddress {
                sector_index,
                record_index,
            };
            count += 1;
            total += record_size as usize;

            let mut bound = record_index;
            record_index = loop {
                if let Some(previous) = self.latest_unsent_index_before(sector_index, bound)? {
                    break previous;
                }

                sector_index = self.prev_sector(sector_index);
                if sector_index == start {
                    break 'collect;
                }

                let (footer, _) = self.sector_status(sector_index)?;
                if footer.is_blank() || footer.record_size != record_size {
                    break 'collect;
                }
                bound = u16::MAX;
            };
        }

        #[cfg(feature = "debug-logs")]
        println!("  backlog: retrieve_latest_backlog: {count} records, {total} bytes");

        Ok(count)
    }

    fn fresh_cursor(&self) -> BacklogCursor {
        BacklogCursor {
            sector: self.current_sector,
            record: self.next_record,
            terminate: self.next_sector(self.current_sector),
        }
    }

    /// Walks the backlog newest first, one record per call. Returns `None` once the walk
    /// passed the oldest sector or reached a blank one, and starts over on the next call.
    pub(crate) fn next_backlog(&mut self) -> Result<Option<BacklogEntry>, Error> {
        let mut cursor = match self.cursor {
            Some(cursor) => cursor,
            None => self.fresh_cursor(),
        };

        loop {
            if let Some(record_index) =
                self.latest_unsent_index_before(cursor.sector, cursor.record)?
            {
                cursor.record = record_index;
                self.cursor = Some(cursor);

                let (footer, _) = self.sector_status(cursor.sector)?;
                return Ok(Some(BacklogEntry {
                    address: RecordAddress {
                        sector_index: cursor.sector,
                        record_index,
                    },
                    record_size: footer.record_size,
                }));
            }

            if cursor.sector == cursor.terminate {
                break;
            }

            cursor.sector = self.prev_sector(cursor.sector);
            let summary = self.read_summary(cursor.sector)?;
            if summary.active == LifecycleTag::BLANK {
                break;
            }

            cursor.record = if cursor.sector != self.current_sector && summary.is_flushed() {
                0
            } else {
                u16::MAX
            };
        }

        #[cfg(feature = "debug-logs")]
        println!("  backlog: next_backlog: exhausted at sector {}", cursor.sector);

        self.cursor = None;
        Ok(None)
    }
}

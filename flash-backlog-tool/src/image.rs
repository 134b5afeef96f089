use std::convert::Infallible;

use embedded_storage::nor_flash::{
    ErrorType,
    NorFlash,
    ReadNorFlash,
};
use flash_backlog::platform::PowerControl;
use flash_backlog::{
    Log,
    LogStatistics,
    RecordAddress,
    SectorInfo,
    SectorState,
};

use crate::error::Error;
use crate::{
    BacklogImage,
    RecordEntry,
    FLASH_SECTOR_SIZE,
};

/// A flash image held in memory. Behaves like NOR flash: writes can only clear bits.
pub(crate) struct ImageFlash {
    pub(crate) buf: Vec<u8>,
}

impl ImageFlash {
    pub(crate) fn blank(size: usize) -> Self {
        Self {
            buf: vec![0xFF; size],
        }
    }
}

impl ErrorType for ImageFlash {
    type Error = Infallible;
}

impl ReadNorFlash for ImageFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for ImageFlash {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.buf[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        for (dst, &src) in self.buf[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *dst &= src;
        }
        Ok(())
    }
}

impl PowerControl for ImageFlash {}

fn validate_size(size: usize) -> Result<(), Error> {
    if !size.is_multiple_of(FLASH_SECTOR_SIZE) || size < 2 * FLASH_SECTOR_SIZE {
        return Err(Error::InvalidImageSize(size));
    }
    Ok(())
}

/// Per sector details of an image.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorSummary {
    pub index: u16,
    pub info: SectorInfo,
}

/// Footer level view of a whole image.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub current_sector: u16,
    pub next_record: u16,
    pub sectors: Vec<SectorSummary>,
    pub statistics: LogStatistics,
}

/// Reads the footer of every sector, in sector order.
pub(crate) fn inspect_image_data(data: &[u8]) -> Result<Inspection, Error> {
    validate_size(data.len())?;

    let mut flash = ImageFlash { buf: data.to_vec() };
    let mut log = Log::new(0, data.len(), &mut flash)?;

    let sectors = (0..log.sector_count())
        .map(|index| {
            Ok(SectorSummary {
                index,
                info: log.sector_info(index)?,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(Inspection {
        current_sector: log.current_sector_index(),
        next_record: log.next_record_index(),
        sectors,
        statistics: log.statistics()?,
    })
}

/// Reads every written record, oldest first.
pub(crate) fn parse_image_data(data: &[u8]) -> Result<BacklogImage, Error> {
    validate_size(data.len())?;

    let mut flash = ImageFlash { buf: data.to_vec() };
    let mut log = Log::new(0, data.len(), &mut flash)?;
    let mut image = BacklogImage { records: vec![] };

    // the sector after the active one holds the oldest records
    let sector_count = log.sector_count();
    let first = (log.current_sector_index() + 1) % sector_count;
    let mut buf = [0u8; flash_backlog::MAX_RECORD_SIZE as usize];

    for offset in 0..sector_count {
        let sector_index = (first + offset) % sector_count;
        let info = log.sector_info(sector_index)?;
        if info.state == SectorState::Blank {
            continue;
        }

        for record_index in 0..info.written {
            let address = RecordAddress {
                sector_index,
                record_index,
            };
            let size = log.read_record(address, &mut buf)?;
            image.records.push(RecordEntry {
                sector: Some(sector_index),
                record: Some(record_index),
                sent: log.is_record_sent(address)?,
                data: buf[..size].to_vec(),
            });
        }
    }

    Ok(image)
}

/// Writes the records in order into a blank image of `size` bytes.
pub(crate) fn generate_image_data(image: &BacklogImage, size: usize) -> Result<Vec<u8>, Error> {
    validate_size(size)?;

    let mut flash = ImageFlash::blank(size);
    {
        let mut log = Log::new(0, size, &mut flash)?;
        let mut used: Vec<u16> = vec![];

        for entry in &image.records {
            let address = log.write_record(&entry.data)?;
            if entry.sent {
                log.mark_record_sent(address)?;
            }

            // the oldest records must survive, so the ring is not allowed to wrap
            for sector in [address.sector_index, log.current_sector_index()] {
                if used.last() != Some(&sector) {
                    if used.contains(&sector) {
                        return Err(Error::ImageTooSmall(image.records.len()));
                    }
                    used.push(sector);
                }
            }
        }
    }

    Ok(flash.buf)
}

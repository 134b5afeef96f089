use crate::bits::bytes_for_bits;
use crate::error::Error;
use crate::platform::{AlignedOps, MAX_WORD_SIZE, Platform};
use core::cmp;
use core::fmt::{Debug, Formatter};
#[cfg(feature = "defmt")]
use defmt::trace;

pub(crate) const FLASH_SECTOR_SIZE: usize = 4096;
pub(crate) const FOOTER_SIZE: usize = 5;
/// The sector summary are the last two bytes of the footer: unsent tag and active tag.
pub(crate) const SUMMARY_SIZE: usize = 2;
pub(crate) const MAX_RECORD_SIZE: u8 = 254;
pub(crate) const BLANK_CAPACITY: u16 = u16::MAX;
pub(crate) const BLANK_RECORD_SIZE: u8 = u8::MAX;

/// The smallest record size yields the most record slots and therefore the largest bitmaps.
pub(crate) const MAX_CAPACITY: u16 = capacity_for(1);
pub(crate) const MAX_BITMAP_LEN: usize = bytes_for_bits(MAX_CAPACITY as usize);

// Compile-time assertion to ensure the densest layout still fits into a sector
const _: () = assert!(
    FOOTER_SIZE + 2 * MAX_BITMAP_LEN + MAX_CAPACITY as usize <= FLASH_SECTOR_SIZE,
    "Sector layout must fit into a flash sector"
);

const _: () = assert!(
    FOOTER_SIZE
        + 2 * bytes_for_bits(capacity_for(MAX_RECORD_SIZE) as usize)
        + capacity_for(MAX_RECORD_SIZE) as usize * MAX_RECORD_SIZE as usize
        <= FLASH_SECTOR_SIZE,
    "Sector layout must fit into a flash sector"
);

/// Largest `n` for which `n` records of `record_size` bytes, two `n` bit wide bitmaps and the
/// footer fit into one sector. 47 covers the footer bits plus the rounding of both bitmaps to
/// whole bytes.
pub(crate) const fn capacity_for(record_size: u8) -> u16 {
    if record_size == BLANK_RECORD_SIZE {
        return BLANK_CAPACITY;
    }
    ((8 * FLASH_SECTOR_SIZE - 47) / (2 * (1 + 4 * record_size as usize))) as u16
}

/// Lifecycle state of a sector, decoded from its [`LifecycleTag`].
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SectorState {
    /// Erased, no record size committed yet.
    Blank,
    /// Currently accepting writes.
    Active,
    /// Superseded by a later sector, holds history.
    Inactive,
}

/// The single lifecycle byte stored at the very end of every sector.
///
/// A sector is blank when the byte is erased (0xFF). Otherwise the byte is split into nibbles
/// and the sector is active iff `(high << 1) & 0xF == low`. Activation and deactivation only
/// ever clear bits, so both can be programmed in place. Every reuse of a sector moves its tag
/// one step along the cycle
///
/// `FE (active) -> EE (inactive) -> EC -> CC -> C8 -> 88 -> 80 -> 00 -> FE ...`
///
/// which is also the total order of the tags. Along the sector array the tags are piecewise
/// constant: sectors written in the current pass carry one tag, sectors of the previous pass
/// another one, and the active sector sits at the boundary. This is what makes the startup
/// binary search possible, it only ever compares tags for equality.
#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LifecycleTag(pub(crate) u8);

impl LifecycleTag {
    pub(crate) const BLANK: LifecycleTag = LifecycleTag(0xFF);

    pub fn state(self) -> SectorState {
        match self.0 {
            0xFF => SectorState::Blank,
            // would pass the nibble test below but is the last inactive tag of the cycle
            0x00 => SectorState::Inactive,
            tag => {
                let high = tag >> 4;
                let low = tag & 0x0F;
                if (high << 1) & 0x0F == low {
                    SectorState::Active
                } else {
                    SectorState::Inactive
                }
            }
        }
    }

    /// The tag a sector gets when it is activated after carrying `self`.
    pub(crate) fn activated(self) -> LifecycleTag {
        if self.0 == 0x00 {
            return LifecycleTag(0xFE);
        }
        LifecycleTag((self.0 & 0xF0) | ((self.0 << 1) & 0x0F))
    }

    /// The tag an active sector gets once the next sector takes over.
    pub(crate) fn deactivated(self) -> LifecycleTag {
        LifecycleTag(((self.0 & 0xF0) << 1) | (self.0 & 0x0F))
    }

    /// Position of a canonical tag in the reuse cycle, counting from the first activation (0)
    /// to the last deactivation (7). Tags outside the cycle yield `None`.
    pub fn epoch(self) -> Option<u8> {
        const CYCLE: [u8; 8] = [0xFE, 0xEE, 0xEC, 0xCC, 0xC8, 0x88, 0x80, 0x00];
        CYCLE
            .iter()
            .position(|&tag| tag == self.0)
            .map(|position| position as u8)
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

impl Debug for LifecycleTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("LifecycleTag(0x{:0>2x} {})", self.0, self.state()))
    }
}

/// The last two bytes of a sector. `unsent == active` on a non-blank sector means every record
/// of that historical sector was marked as sent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct SectorSummary {
    pub(crate) unsent: LifecycleTag,
    pub(crate) active: LifecycleTag,
}

impl SectorSummary {
    pub(crate) fn from_bytes(raw: [u8; SUMMARY_SIZE]) -> Self {
        Self {
            unsent: LifecycleTag(raw[0]),
            active: LifecycleTag(raw[1]),
        }
    }

    /// True for blank sectors as well, both tags are erased then.
    pub(crate) fn is_flushed(&self) -> bool {
        self.unsent == self.active
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct Footer {
    pub(crate) capacity: u16,
    pub(crate) record_size: u8,
    pub(crate) unsent_tag: LifecycleTag,
    pub(crate) active_tag: LifecycleTag,
}

impl Footer {
    pub(crate) fn blank() -> Self {
        Self::from_bytes([0xFF; FOOTER_SIZE])
    }

    pub(crate) fn new(record_size: u8, active_tag: LifecycleTag) -> Self {
        Self {
            capacity: capacity_for(record_size),
            record_size,
            unsent_tag: LifecycleTag::BLANK,
            active_tag,
        }
    }

    pub(crate) fn from_bytes(raw: [u8; FOOTER_SIZE]) -> Self {
        Self {
            capacity: u16::from_le_bytes([raw[0], raw[1]]),
            record_size: raw[2],
            unsent_tag: LifecycleTag(raw[3]),
            active_tag: LifecycleTag(raw[4]),
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; FOOTER_SIZE] {
        let [lo, hi] = self.capacity.to_le_bytes();
        [lo, hi, self.record_size, self.unsent_tag.0, self.active_tag.0]
    }

    pub(crate) fn state(&self) -> SectorState {
        self.active_tag.state()
    }

    /// A footer without a committed record size, no records can be stored in the sector.
    pub(crate) fn is_blank(&self) -> bool {
        self.active_tag == LifecycleTag::BLANK
            || self.capacity == BLANK_CAPACITY
            || self.record_size == BLANK_RECORD_SIZE
    }

    /// Every byte still in the erased state, so the footer can be programmed.
    pub(crate) fn is_erased(&self) -> bool {
        self.to_bytes() == [0xFF; FOOTER_SIZE]
    }

    /// Rejects footers whose fields don't belong together. Blank footers are always valid.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.active_tag == LifecycleTag::BLANK {
            return Ok(());
        }
        if self.record_size == 0
            || self.record_size > MAX_RECORD_SIZE
            || self.capacity != capacity_for(self.record_size)
        {
            return Err(Error::FilesystemCorrupted);
        }
        Ok(())
    }

    /// Length of each of the two bitmaps in bytes.
    pub(crate) fn bitmap_len(&self) -> usize {
        if self.is_blank() {
            0
        } else {
            bytes_for_bits(self.capacity as usize)
        }
    }

    pub(crate) fn summary(&self) -> SectorSummary {
        SectorSummary {
            unsent: self.unsent_tag,
            active: self.active_tag,
        }
    }
}

impl Debug for Footer {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let capacity = self.capacity;
        let record_size = self.record_size;
        let unsent = self.unsent_tag.0;
        let active = self.active_tag;
        f.write_fmt(format_args!("Footer {{ capacity: {capacity:>4}, record_size: {record_size:>3}, unsent: 0x{unsent:0>2x}, active: {active:?} }}"))
    }
}

/// Byte offsets of the regions of one sector, relative to the start of the flash device.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SectorLayout {
    pub(crate) start: usize,
}

impl SectorLayout {
    pub(crate) fn new(base_address: usize, sector_index: u16) -> Self {
        Self {
            start: base_address + sector_index as usize * FLASH_SECTOR_SIZE,
        }
    }

    pub(crate) fn end(&self) -> usize {
        self.start + FLASH_SECTOR_SIZE
    }

    pub(crate) fn footer(&self) -> usize {
        self.end() - FOOTER_SIZE
    }

    pub(crate) fn summary(&self) -> usize {
        self.end() - SUMMARY_SIZE
    }

    pub(crate) fn active_tag(&self) -> usize {
        self.end() - 1
    }

    pub(crate) fn position_bitmap(&self, bitmap_len: usize) -> usize {
        self.footer() - bitmap_len
    }

    pub(crate) fn unsent_bitmap(&self, bitmap_len: usize) -> usize {
        self.footer() - 2 * bitmap_len
    }

    pub(crate) fn record(&self, record_index: u16, record_size: u8) -> usize {
        self.start + record_index as usize * record_size as usize
    }
}

/// Reads `bytes.len()` bytes at any offset. Whole words are read directly into `bytes`, partial
/// words at either end go through a scratch word.
pub(crate) fn read_unaligned<T: Platform>(
    hal: &mut T,
    offset: usize,
    bytes: &mut [u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("read_unaligned @{:#08x}: [{}]", offset, bytes.len());

    if T::is_read_aligned(offset, bytes.len()) {
        return hal.read(offset as u32, bytes);
    }

    let word = T::READ_SIZE;
    let end = offset + bytes.len();
    let mut pos = offset;
    while pos < end {
        let word_start = T::align_read_floor(pos);
        if pos == word_start && end - pos >= word {
            let len = T::align_read_floor(end - pos);
            hal.read(pos as u32, &mut bytes[pos - offset..pos - offset + len])?;
            pos += len;
        } else {
            let mut scratch = [0xFFu8; MAX_WORD_SIZE];
            hal.read(word_start as u32, &mut scratch[..word])?;
            let from = pos - word_start;
            let len = cmp::min(word - from, end - pos);
            bytes[pos - offset..pos - offset + len].copy_from_slice(&scratch[from..from + len]);
            pos += len;
        }
    }
    Ok(())
}

/// Programs `bytes` at any offset. Partial words at either end are read first and written back
/// with the new bytes merged in, so neighbouring data is programmed with its current value.
pub(crate) fn write_unaligned<T: Platform>(
    hal: &mut T,
    offset: usize,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_unaligned @{:#08x}: [{}]", offset, bytes.len());

    if T::is_write_aligned(offset, bytes.len()) {
        return hal.write(offset as u32, bytes);
    }

    let word = T::WRITE_SIZE;
    let end = offset + bytes.len();
    let mut pos = offset;
    while pos < end {
        let word_start = T::align_write_floor(pos);
        if pos == word_start && end - pos >= word {
            let len = T::align_write_floor(end - pos);
            hal.write(pos as u32, &bytes[pos - offset..pos - offset + len])?;
            pos += len;
        } else {
            let mut scratch = [0xFFu8; MAX_WORD_SIZE];
            read_unaligned(hal, word_start, &mut scratch[..word])?;
            let from = pos - word_start;
            let len = cmp::min(word - from, end - pos);
            scratch[from..from + len].copy_from_slice(&bytes[pos - offset..pos - offset + len]);
            hal.write(word_start as u32, &scratch[..word])?;
            pos += len;
        }
    }
    Ok(())
}

/// Clears a single bit in flash, leaving every other bit of the byte untouched.
pub(crate) fn clear_bit<T: Platform>(
    hal: &mut T,
    bitmap_offset: usize,
    bit: u16,
) -> Result<(), T::Error> {
    let byte_offset = bitmap_offset + bit as usize / 8;
    let mut byte = [0u8; 1];
    read_unaligned(hal, byte_offset, &mut byte)?;
    byte[0] &= !(1u8 << (bit % 8));
    write_unaligned(hal, byte_offset, &byte)
}

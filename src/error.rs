use thiserror::Error;

/// Errors that can occur during log operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API.
///
/// Queries that simply find nothing (no backlog, no written record) are not errors and return
/// `Ok(None)` instead.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition offset has to be aligned to the size of a flash sector (4k)
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition size has to be a multiple of the flash sector size (4k), cover at least two
    /// sectors and fit into the flash device.
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The flash device uses read/write words larger than 16 bytes or erase units that don't
    /// divide a sector.
    #[error("unsupported flash geometry")]
    UnsupportedFlash,

    /// The internal error value is returned from the provided `&mut impl NorFlash`. Once
    /// encountered, all mutating operations keep failing with this error.
    #[error("internal flash error")]
    FlashError,

    /// The sector index is out of range, the sector is blank or the record index is not below
    /// the number of records written to that sector.
    #[error("invalid record address")]
    InvalidAddress,

    /// Records have to be 1 to 254 bytes long. 0xFF marks a blank sector footer.
    #[error("invalid record size")]
    InvalidRecordSize,

    /// The provided buffer can't hold the record(s).
    #[error("buffer too small")]
    BufferTooSmall,

    /// The stored record has a different size than the requested type. The stored size is
    /// reported.
    #[error("record size mismatch: {0}")]
    RecordSizeMismatch(u8),

    /// Footers or bitmaps contradict each other, or no active sector could be found on startup.
    #[error("filesystem corrupted")]
    FilesystemCorrupted,

    /// A sector was expected to be active but carries a different lifecycle tag.
    #[error("inconsistent sector flag")]
    InconsistentFlag,

    /// Used internally to indicate that the active sector ran out of record slots.
    #[error("sector full")]
    SectorFull,
}

//! Host side companion of `flash-backlog`: inspects raw flash images, exports their records to
//! CSV and generates images from CSV.

pub mod error;
pub mod image;

mod csv;

use std::fs;
use std::io::Write;
use std::path::Path;

pub use crate::csv::Encoding;
pub use error::Error;
pub use flash_backlog::SECTOR_SIZE as FLASH_SECTOR_SIZE;
pub use image::{
    Inspection,
    SectorSummary,
};

/// A single record together with its backlog state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    /// Where the record was found. Ignored when generating an image.
    pub sector: Option<u16>,
    /// Where the record was found. Ignored when generating an image.
    pub record: Option<u16>,
    pub sent: bool,
    pub data: Vec<u8>,
}

impl RecordEntry {
    pub fn new(data: Vec<u8>, sent: bool) -> Self {
        Self {
            sector: None,
            record: None,
            sent,
            data,
        }
    }
}

/// The records of a log, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogImage {
    pub records: Vec<RecordEntry>,
}

impl BacklogImage {
    /// Parse CSV content from a string.
    pub fn from_csv(content: &str) -> Result<Self, Error> {
        csv::parser::parse_csv(content)
    }

    /// Parse the CSV file at the given `path`.
    pub fn from_csv_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        csv::parser::parse_csv(&content)
    }

    /// Serialize the records to CSV and return the content as a `String`.
    pub fn to_csv(&self, encoding: Encoding) -> Result<String, Error> {
        csv::writer::write_csv_content(self, encoding)
    }

    /// Serialize the records to a CSV file at the given `path`.
    ///
    /// Records are written oldest first, record data is encoded with `encoding`.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P, encoding: Encoding) -> Result<(), Error> {
        csv::writer::write_csv(self, path, encoding)
    }

    /// Generate a flash image in memory by appending the records in order and marking the ones
    /// flagged as sent.
    ///
    /// `size` must be a multiple of 4096 and hold at least two sectors. Fails if the records
    /// don't fit without the log wrapping around.
    pub fn generate_image(&self, size: usize) -> Result<Vec<u8>, Error> {
        image::generate_image_data(self, size)
    }

    /// Generate a flash image and write it to `path`.
    pub fn generate_image_file<P: AsRef<Path>>(&self, path: P, size: usize) -> Result<(), Error> {
        let data = self.generate_image(size)?;
        fs::File::create(path)?.write_all(&data)?;
        Ok(())
    }

    /// Read every record of an in-memory flash image.
    pub fn parse_image(data: &[u8]) -> Result<Self, Error> {
        image::parse_image_data(data)
    }

    /// Read every record of the flash image at `path`.
    pub fn parse_image_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let data = fs::read(path)?;
        image::parse_image_data(&data)
    }
}

/// Collect per sector details and statistics of an in-memory flash image.
pub fn inspect_image(data: &[u8]) -> Result<Inspection, Error> {
    image::inspect_image_data(data)
}

/// Collect per sector details and statistics of the flash image at `path`.
pub fn inspect_image_file<P: AsRef<Path>>(path: P) -> Result<Inspection, Error> {
    let data = fs::read(path)?;
    image::inspect_image_data(&data)
}

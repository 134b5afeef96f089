use thiserror::Error;

/// Errors that can occur while parsing CSV files or parsing and generating flash images.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to parse CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("hex decoding error: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("base64 decoding error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("invalid image size {0}: must be a multiple of 4096 bytes and hold at least two sectors")]
    InvalidImageSize(usize),

    #[error("image doesn't fit {0} records")]
    ImageTooSmall(usize),

    #[error("log error: {0}")]
    LogError(#[from] flash_backlog::error::Error),
}

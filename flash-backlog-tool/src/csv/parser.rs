use base64::Engine;

use crate::csv::Encoding;
use crate::error::Error;
use crate::{
    BacklogImage,
    RecordEntry,
};

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    sector: Option<u16>,
    record: Option<u16>,
    sent: String,
    encoding: String,
    value: String,
}

/// Parse CSV content from a string into a [`BacklogImage`].
pub(crate) fn parse_csv(content: &str) -> Result<BacklogImage, Error> {
    let mut image = BacklogImage { records: vec![] };
    let mut reader = csv::Reader::from_reader(content.as_bytes());

    for result in reader.deserialize() {
        let row: CsvRow = result?;
        image.records.push(parse_row(row)?);
    }

    Ok(image)
}

fn parse_row(row: CsvRow) -> Result<RecordEntry, Error> {
    let encoding: Encoding = row.encoding.parse()?;
    let data = parse_value(row.value.trim(), encoding)?;

    if data.is_empty() || data.len() > flash_backlog::MAX_RECORD_SIZE as usize {
        return Err(Error::InvalidValue(format!(
            "records must hold 1 to {} bytes, got {}",
            flash_backlog::MAX_RECORD_SIZE,
            data.len()
        )));
    }

    Ok(RecordEntry {
        sector: row.sector,
        record: row.record,
        sent: parse_sent(&row.sent)?,
        data,
    })
}

fn parse_sent(value: &str) -> Result<bool, Error> {
    match value.trim() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        other => Err(Error::InvalidValue(format!("invalid sent flag: {}", other))),
    }
}

fn parse_value(value: &str, encoding: Encoding) -> Result<Vec<u8>, Error> {
    match encoding {
        Encoding::Hex => Ok(hex::decode(value)?),
        Encoding::Base64 => Ok(base64::engine::general_purpose::STANDARD.decode(value)?),
    }
}

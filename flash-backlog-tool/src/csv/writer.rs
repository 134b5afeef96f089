use std::path::Path;

use base64::Engine;
use csv::Writer;

use crate::csv::Encoding;
use crate::error::Error;
use crate::BacklogImage;

/// Serialize the records of an image to a CSV file at the given `output_path`.
pub(crate) fn write_csv<P: AsRef<Path>>(
    image: &BacklogImage,
    output_path: P,
    encoding: Encoding,
) -> Result<(), Error> {
    let mut wtr = Writer::from_path(output_path)?;
    write_records(&mut wtr, image, encoding)
}

/// Serialize the records of an image to CSV and return the content as a `String`.
pub(crate) fn write_csv_content(image: &BacklogImage, encoding: Encoding) -> Result<String, Error> {
    let mut wtr = Writer::from_writer(Vec::new());
    write_records(&mut wtr, image, encoding)?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| Error::IoError(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::InvalidValue(format!("CSV output is not valid UTF-8: {}", e)))
}

fn write_records<W: std::io::Write>(
    wtr: &mut Writer<W>,
    image: &BacklogImage,
    encoding: Encoding,
) -> Result<(), Error> {
    wtr.write_record(["sector", "record", "sent", "encoding", "value"])?;

    for entry in &image.records {
        let value = match encoding {
            Encoding::Hex => hex::encode(&entry.data),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD.encode(&entry.data),
        };

        wtr.write_record([
            entry.sector.map(|s| s.to_string()).unwrap_or_default(),
            entry.record.map(|r| r.to_string()).unwrap_or_default(),
            entry.sent.to_string(),
            encoding.as_str().to_string(),
            value,
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

//! ZIP packaging for submission and receipt extraction.
//!
//! The protocol mandates a single-entry deflate archive named
//! `{stem}.zip` containing `{stem}.xml`, where the stem is
//! `{issuerRuc}-{docTypeCode}-{series}-{sequence}`
//! (see [`crate::core::SeriesNumber::archive_stem`]).

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::ComprobanteError;

fn archive_err(context: &str, e: impl std::fmt::Display) -> ComprobanteError {
    ComprobanteError::Archive(format!("{context}: {e}"))
}

/// Bundle the (signed) XML into a single-entry archive `{stem}.xml`.
pub fn pack_document(xml: &[u8], stem: &str) -> Result<Vec<u8>, ComprobanteError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(format!("{stem}.xml"), options)
        .map_err(|e| archive_err("failed to start archive entry", e))?;
    writer
        .write_all(xml)
        .map_err(|e| archive_err("failed to write archive entry", e))?;
    let cursor = writer
        .finish()
        .map_err(|e| archive_err("failed to finish archive", e))?;
    Ok(cursor.into_inner())
}

/// Extract the first entry of a receipt archive.
///
/// Returns `None` for an archive with no entries — the Beta environment is
/// known to return those; the caller treats it like an absent receipt.
pub fn unpack_single(archive: &[u8]) -> Result<Option<Vec<u8>>, ComprobanteError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| archive_err("failed to open receipt archive", e))?;
    if zip.is_empty() {
        return Ok(None);
    }
    let mut entry = zip
        .by_index(0)
        .map_err(|e| archive_err("failed to read receipt entry", e))?;
    let mut content = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut content)
        .map_err(|e| archive_err("failed to decompress receipt entry", e))?;
    Ok(Some(content))
}

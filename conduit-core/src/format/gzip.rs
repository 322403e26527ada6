/*!
Gzip codec.

Decoding yields the decompressed bytes as [`Record::Raw`]. Encoding
compresses raw bytes as-is; tables are written as csv and documents as JSON
before compression.
*/

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

use super::csv::CsvCodec;
use super::json::JsonCodec;
use super::{Codec, CodecOptions, FormatType};
use crate::error::CodecError;
use crate::record::Record;

/// Gzip-compress `data` at `level` (0-9)
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| CodecError::new(format!("failed to write data for compression: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CodecError::new(format!("failed to finish compression: {e}")))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| CodecError::new(format!("failed to decompress data: {e}")))?;
    Ok(decompressed)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn format(&self) -> FormatType {
        FormatType::Gzip
    }

    fn decode(&self, bytes: &[u8], _options: &CodecOptions) -> Result<Record, CodecError> {
        decompress(bytes).map(Record::Raw)
    }

    fn encode(&self, record: &Record, options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        let plain = match record {
            Record::Raw(bytes) => return compress(bytes, options.gzip_level),
            Record::Table(_) => CsvCodec.encode(record, options)?,
            Record::Document(_) => JsonCodec.encode(record, options)?,
        };
        compress(&plain, options.gzip_level)
    }
}

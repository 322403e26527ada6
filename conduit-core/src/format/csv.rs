/*!
Delimited text codec.

Cells are typed on decode by [`Value::infer`]; anything that is not an
integer, float or boolean stays a string, timestamps included.
*/

use ::csv::{ReaderBuilder, Terminator, WriterBuilder};

use super::{Codec, CodecOptions, FormatType};
use crate::error::CodecError;
use crate::record::{Frame, Record, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCodec;

impl CsvCodec {
    /// Encode a frame as delimited text
    pub fn encode_frame(frame: &Frame, options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        let mut writer = WriterBuilder::new()
            .delimiter(options.delimiter)
            .terminator(Terminator::Any(b'\n'))
            .flexible(true)
            .from_writer(Vec::new());

        if options.has_headers && !frame.columns.is_empty() {
            writer.write_record(&frame.columns)?;
        }
        for row in &frame.rows {
            let cells: Vec<String> = (0..frame.columns.len().max(row.len()))
                .map(|idx| row.get(idx).map(Value::to_text).unwrap_or_default())
                .collect();
            writer.write_record(&cells)?;
        }

        writer
            .into_inner()
            .map_err(|e| CodecError::new(format!("failed to flush csv writer: {e}")))
    }
}

impl Codec for CsvCodec {
    fn format(&self) -> FormatType {
        FormatType::Csv
    }

    fn decode(&self, bytes: &[u8], options: &CodecOptions) -> Result<Record, CodecError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(options.has_headers)
            .flexible(true)
            .from_reader(bytes);

        let mut columns: Vec<String> = if options.has_headers {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            Vec::new()
        };

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let row: Vec<Value> = record.iter().map(Value::infer).collect();
            rows.push(row);
        }

        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(columns.len());
        while columns.len() < width {
            columns.push(columns.len().to_string());
        }
        for row in &mut rows {
            row.resize(width, Value::Null);
        }

        Ok(Record::Table(Frame::new(columns, rows)))
    }

    fn encode(&self, record: &Record, options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        match record {
            Record::Table(frame) => Self::encode_frame(frame, options),
            Record::Document(doc) => {
                let frame = Frame::from_json_records(doc).ok_or_else(|| {
                    CodecError::new("csv can only encode documents that are arrays of objects")
                })?;
                Self::encode_frame(&frame, options)
            }
            Record::Raw(_) => Err(CodecError::new("csv cannot encode raw bytes")),
        }
    }
}

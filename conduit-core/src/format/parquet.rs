/*!
Columnar codec over Apache Parquet.

Each column is typed from its first non-null value: integers map to Int64,
floats to Float64, booleans to Boolean, strings to Utf8 and timestamps to
microsecond timestamps in UTC. A column holding only nulls is written as
Utf8. Decoding widens foreign integer, float and string types to those same
arrow types.
*/

use std::sync::Arc;

use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ::parquet::arrow::ArrowWriter;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use bytes::Bytes;
use chrono::DateTime;

use super::{Codec, CodecOptions, FormatType};
use crate::error::CodecError;
use crate::record::{Frame, Record, Value};

const UTC: &str = "UTC";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetCodec;

impl ParquetCodec {
    fn column_type(frame: &Frame, idx: usize) -> DataType {
        let first = frame
            .rows
            .iter()
            .filter_map(|row| row.get(idx))
            .find(|value| !value.is_null());
        match first {
            Some(Value::Int(_)) => DataType::Int64,
            Some(Value::Float(_)) => DataType::Float64,
            Some(Value::Bool(_)) => DataType::Boolean,
            Some(Value::Timestamp(_)) => timestamp_type(),
            None | Some(Value::Null) | Some(Value::Str(_)) => DataType::Utf8,
        }
    }

    fn build_column(frame: &Frame, idx: usize, data_type: &DataType) -> Result<ArrayRef, CodecError> {
        let name = &frame.columns[idx];
        let cells = frame.rows.iter().map(|row| row.get(idx).unwrap_or(&Value::Null));
        let mismatch = |value: &Value| {
            CodecError::new(format!(
                "column '{name}' mixes types: expected {data_type}, found {value:?}"
            ))
        };

        let array: ArrayRef = match data_type {
            DataType::Int64 => Arc::new(
                cells
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Int(i) => Ok(Some(*i)),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Int64Array, _>>()?,
            ),
            DataType::Float64 => Arc::new(
                cells
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Float(f) => Ok(Some(*f)),
                        Value::Int(i) => Ok(Some(*i as f64)),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Float64Array, _>>()?,
            ),
            DataType::Boolean => Arc::new(
                cells
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Bool(b) => Ok(Some(*b)),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<BooleanArray, _>>()?,
            ),
            DataType::Timestamp(_, _) => Arc::new(
                cells
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Timestamp(ts) => Ok(Some(ts.timestamp_micros())),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<TimestampMicrosecondArray, _>>()?
                    .with_timezone(UTC),
            ),
            _ => Arc::new(
                cells
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Str(s) => Ok(Some(s.clone())),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<StringArray, _>>()?,
            ),
        };
        Ok(array)
    }

    fn to_batch(frame: &Frame) -> Result<RecordBatch, CodecError> {
        if frame.columns.is_empty() {
            return Err(CodecError::new("parquet cannot encode a table without columns"));
        }

        let mut fields = Vec::with_capacity(frame.columns.len());
        let mut arrays = Vec::with_capacity(frame.columns.len());
        for (idx, name) in frame.columns.iter().enumerate() {
            let data_type = Self::column_type(frame, idx);
            arrays.push(Self::build_column(frame, idx, &data_type)?);
            fields.push(Field::new(name, data_type, true));
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .map_err(|e| CodecError::new(format!("failed to build record batch: {e}")))
    }

    /// Widen `array` to one of the arrow types the record model maps onto
    fn normalize(array: &ArrayRef) -> Result<ArrayRef, CodecError> {
        let target = match array.data_type() {
            DataType::Int64 | DataType::Float64 | DataType::Boolean | DataType::Utf8 => return Ok(array.clone()),
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32 => DataType::Int64,
            DataType::Float16 | DataType::Float32 => DataType::Float64,
            DataType::LargeUtf8 | DataType::Utf8View => DataType::Utf8,
            DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => timestamp_type(),
            other => {
                return Err(CodecError::new(format!("unsupported parquet column type {other}")));
            }
        };
        cast(array, &target).map_err(|e| CodecError::new(format!("failed to convert column: {e}")))
    }

    fn column_values(array: &ArrayRef) -> Result<Vec<Value>, CodecError> {
        let array = Self::normalize(array)?;
        let any = array.as_any();
        let values = (0..array.len()).map(|row| {
            if array.is_null(row) {
                return Value::Null;
            }
            if let Some(a) = any.downcast_ref::<Int64Array>() {
                Value::Int(a.value(row))
            } else if let Some(a) = any.downcast_ref::<Float64Array>() {
                Value::Float(a.value(row))
            } else if let Some(a) = any.downcast_ref::<BooleanArray>() {
                Value::Bool(a.value(row))
            } else if let Some(a) = any.downcast_ref::<StringArray>() {
                Value::Str(a.value(row).to_string())
            } else if let Some(a) = any.downcast_ref::<TimestampMicrosecondArray>() {
                DateTime::from_timestamp_micros(a.value(row))
                    .map(Value::Timestamp)
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        });
        Ok(values.collect())
    }
}

impl Codec for ParquetCodec {
    fn format(&self) -> FormatType {
        FormatType::Parquet
    }

    fn decode(&self, bytes: &[u8], _options: &CodecOptions) -> Result<Record, CodecError> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))
            .and_then(|builder| builder.build())
            .map_err(|e| CodecError::new(format!("failed to open parquet payload: {e}")))?;

        let columns: Vec<String> = reader
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect();

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| CodecError::new(format!("failed to read record batch: {e}")))?;
            let decoded = batch
                .columns()
                .iter()
                .map(Self::column_values)
                .collect::<Result<Vec<_>, _>>()?;
            for row in 0..batch.num_rows() {
                rows.push(decoded.iter().map(|column| column[row].clone()).collect());
            }
        }

        Ok(Record::Table(Frame::new(columns, rows)))
    }

    fn encode(&self, record: &Record, _options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        let frame = match record {
            Record::Table(frame) => frame.clone(),
            Record::Document(doc) => Frame::from_json_records(doc).ok_or_else(|| {
                CodecError::new("parquet can only encode documents that are arrays of objects")
            })?,
            Record::Raw(_) => return Err(CodecError::new("parquet cannot encode raw bytes")),
        };

        let batch = Self::to_batch(&frame)?;
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)
            .map_err(|e| CodecError::new(format!("failed to create parquet writer: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| CodecError::new(format!("failed to write parquet batch: {e}")))?;
        writer
            .close()
            .map_err(|e| CodecError::new(format!("failed to finish parquet payload: {e}")))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn round_trip(frame: Frame) -> Frame {
        let bytes = ParquetCodec.encode(&Record::Table(frame), &CodecOptions::default()).unwrap();
        match ParquetCodec.decode(&bytes, &CodecOptions::default()).unwrap() {
            Record::Table(frame) => frame,
            other => panic!("Expected table, got {other:?}"),
        }
    }

    #[test]
    fn test_typed_columns_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap();
        let frame = Frame::new(
            vec!["id".into(), "score".into(), "ok".into(), "name".into(), "at".into()],
            vec![
                vec![Value::Int(1), Value::Float(0.5), Value::Bool(true), Value::Str("a".into()), Value::Timestamp(ts)],
                vec![Value::Null, Value::Float(1.5), Value::Null, Value::Str("b".into()), Value::Null],
            ],
        );
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_all_null_column_becomes_strings() {
        let frame = Frame::new(vec!["empty".into()], vec![vec![Value::Null], vec![Value::Null]]);
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_mixed_column_is_rejected() {
        let frame = Frame::new(
            vec!["x".into()],
            vec![vec![Value::Int(1)], vec![Value::Str("two".into())]],
        );
        assert!(ParquetCodec.encode(&Record::Table(frame), &CodecOptions::default()).is_err());
    }

    #[test]
    fn test_rejects_raw_and_columnless_tables() {
        assert!(ParquetCodec.encode(&Record::Raw(vec![1]), &CodecOptions::default()).is_err());
        assert!(ParquetCodec.encode(&Record::empty(), &CodecOptions::default()).is_err());
        assert!(ParquetCodec.decode(b"PAR1garbage", &CodecOptions::default()).is_err());
    }
}

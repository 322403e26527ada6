//! Binary codec: MessagePack of the whole record, lossless for every value type

use super::{Codec, CodecOptions, FormatType};
use crate::error::CodecError;
use crate::record::Record;

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn format(&self) -> FormatType {
        FormatType::Binary
    }

    fn decode(&self, bytes: &[u8], _options: &CodecOptions) -> Result<Record, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::new(e.to_string()))
    }

    fn encode(&self, record: &Record, _options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(record).map_err(|e| CodecError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Frame, Value};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn round_trip(record: &Record) -> Record {
        let bytes = BinaryCodec.encode(record, &CodecOptions::default()).unwrap();
        BinaryCodec.decode(&bytes, &CodecOptions::default()).unwrap()
    }

    #[test]
    fn test_mixed_frame_round_trip() {
        let ts = Utc.with_ymd_and_hms(2023, 11, 5, 17, 45, 12).unwrap();
        let frame = Frame::new(
            vec!["id".into(), "ratio".into(), "label".into(), "seen".into(), "at".into()],
            vec![
                vec![Value::Int(i64::MIN), Value::Float(0.1 + 0.2), Value::Str("α".into()), Value::Bool(true), Value::Timestamp(ts)],
                vec![Value::Int(42), Value::Float(-0.0), Value::Null, Value::Bool(false), Value::Null],
            ],
        );
        let record = Record::Table(frame);
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_float_bits_are_preserved() {
        let value = 1.0f64 / 3.0;
        let record = Record::Table(Frame::new(vec!["x".into()], vec![vec![Value::Float(value)]]));
        match &round_trip(&record).as_table().unwrap().rows[0][0] {
            Value::Float(f) => assert_eq!(f.to_bits(), value.to_bits()),
            other => panic!("Expected float, got {other:?}"),
        }
    }

    #[test]
    fn test_document_and_raw_round_trip() {
        let doc = Record::Document(json!({"nested": {"list": [1, 2.5, "three", null]}}));
        assert_eq!(round_trip(&doc), doc);

        let raw = Record::Raw(vec![0, 159, 146, 150]);
        assert_eq!(round_trip(&raw), raw);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(BinaryCodec.decode(b"\xc1\xc1\xc1", &CodecOptions::default()).is_err());
    }
}

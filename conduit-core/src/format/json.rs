//! JSON and YAML codecs. Both decode to a document unless `as_table` is set.

use super::{Codec, CodecOptions, FormatType};
use crate::error::CodecError;
use crate::record::{Frame, Record};

fn into_record(value: serde_json::Value, options: &CodecOptions) -> Result<Record, CodecError> {
    if !options.as_table {
        return Ok(Record::Document(value));
    }
    Frame::from_json_records(&value)
        .map(Record::Table)
        .ok_or_else(|| CodecError::new("as_table requires an array of objects"))
}

fn to_document(record: &Record, format: FormatType) -> Result<serde_json::Value, CodecError> {
    match record {
        Record::Table(frame) => Ok(frame.to_json_records()),
        Record::Document(doc) => Ok(doc.clone()),
        Record::Raw(_) => Err(CodecError::new(format!("{format} cannot encode raw bytes"))),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format(&self) -> FormatType {
        FormatType::Json
    }

    fn decode(&self, bytes: &[u8], options: &CodecOptions) -> Result<Record, CodecError> {
        into_record(serde_json::from_slice(bytes)?, options)
    }

    fn encode(&self, record: &Record, _options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&to_document(record, FormatType::Json)?)?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn format(&self) -> FormatType {
        FormatType::Yaml
    }

    fn decode(&self, bytes: &[u8], options: &CodecOptions) -> Result<Record, CodecError> {
        into_record(serde_yaml::from_slice(bytes)?, options)
    }

    fn encode(&self, record: &Record, _options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        Ok(serde_yaml::to_string(&to_document(record, FormatType::Yaml)?)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use serde_json::json;

    fn table_options() -> CodecOptions {
        CodecOptions {
            as_table: true,
            ..CodecOptions::default()
        }
    }

    #[test]
    fn test_json_document_round_trip() {
        let doc = json!({"name": "report", "tags": ["a", "b"], "version": 3});
        let bytes = JsonCodec.encode(&Record::Document(doc.clone()), &CodecOptions::default()).unwrap();
        assert_eq!(
            JsonCodec.decode(&bytes, &CodecOptions::default()).unwrap(),
            Record::Document(doc)
        );
    }

    #[test]
    fn test_json_as_table() {
        let record = JsonCodec
            .decode(br#"[{"id": 1, "ok": true}, {"id": 2, "ok": false}]"#, &table_options())
            .unwrap();
        let frame = record.as_table().unwrap();
        assert_eq!(frame.columns, vec!["id", "ok"]);
        assert_eq!(frame.rows[1], vec![Value::Int(2), Value::Bool(false)]);

        assert!(JsonCodec.decode(br#"{"id": 1}"#, &table_options()).is_err());
    }

    #[test]
    fn test_table_encodes_as_row_objects() {
        let frame = Frame::new(vec!["id".into()], vec![vec![Value::Int(7)]]);
        let bytes = JsonCodec.encode(&Record::Table(frame), &CodecOptions::default()).unwrap();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(), json!([{"id": 7}]));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(JsonCodec.decode(b"{oops", &CodecOptions::default()).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let doc = json!({"threshold": 0.5, "labels": ["x", "y"]});
        let bytes = YamlCodec.encode(&Record::Document(doc.clone()), &CodecOptions::default()).unwrap();
        assert!(String::from_utf8(bytes.clone()).unwrap().contains("threshold: 0.5"));
        assert_eq!(
            YamlCodec.decode(&bytes, &CodecOptions::default()).unwrap(),
            Record::Document(doc)
        );
    }

    #[test]
    fn test_yaml_as_table() {
        let record = YamlCodec
            .decode(b"- id: 1\n  name: a\n- id: 2\n  name: b\n", &table_options())
            .unwrap();
        assert_eq!(record.as_table().unwrap().row_count(), 2);
    }

    #[test]
    fn test_raw_is_rejected() {
        assert!(JsonCodec.encode(&Record::Raw(vec![0]), &CodecOptions::default()).is_err());
        assert!(YamlCodec.encode(&Record::Raw(vec![0]), &CodecOptions::default()).is_err());
    }
}

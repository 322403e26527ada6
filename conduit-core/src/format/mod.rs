/*!
Format dispatch.

A [`FormatTable`] maps each [`FormatType`] to the [`Codec`] that reads and
writes it. The table is built once and shared read-only by every connector.
[`FormatDispatcher`] resolves the format for a contract (explicit
`file_type`, then the path extension, then the backend family default) and
drives the codec against a [`BackendClient`].

Format resolution always happens before any backend call, so an unsupported
format never touches the backend.
*/

pub mod binary;
pub mod csv;
pub mod gzip;
pub mod json;
#[cfg(feature = "parquet")]
pub mod parquet;

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::contract::{Options, ResolvedContract};
use crate::error::CodecError;
use crate::options::FileOptions;
use crate::record::Record;
use crate::storage::{Ack, BackendClient, MissingResource};
use crate::{ConnectorError, Result};

pub use self::binary::BinaryCodec;
pub use self::csv::CsvCodec;
pub use self::gzip::GzipCodec;
pub use self::json::{JsonCodec, YamlCodec};
#[cfg(feature = "parquet")]
pub use self::parquet::ParquetCodec;

/// Serialization formats known to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatType {
    Csv,
    Json,
    Yaml,
    /// Exact round-trip serialization of a whole record
    Binary,
    Parquet,
    Gzip,
}

impl FormatType {
    pub const ALL: [FormatType; 6] = [
        FormatType::Csv,
        FormatType::Json,
        FormatType::Yaml,
        FormatType::Binary,
        FormatType::Parquet,
        FormatType::Gzip,
    ];

    /// Case-insensitive lookup by name or alias
    pub fn from_name(name: &str) -> Option<FormatType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(FormatType::Csv),
            "json" => Some(FormatType::Json),
            "yaml" | "yml" => Some(FormatType::Yaml),
            "pickle" | "pkl" | "binary" | "bin" => Some(FormatType::Binary),
            "parquet" | "pq" => Some(FormatType::Parquet),
            "gz" | "gzip" => Some(FormatType::Gzip),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FormatType::Csv => "csv",
            FormatType::Json => "json",
            FormatType::Yaml => "yaml",
            FormatType::Binary => "binary",
            FormatType::Parquet => "parquet",
            FormatType::Gzip => "gzip",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FormatType::Csv => "text/csv",
            FormatType::Json => "application/json",
            FormatType::Yaml => "application/yaml",
            FormatType::Binary => "application/octet-stream",
            FormatType::Parquet => "application/vnd.apache.parquet",
            FormatType::Gzip => "application/gzip",
        }
    }

    /// Extension used when naming new resources of this format
    pub fn extension(&self) -> &'static str {
        match self {
            FormatType::Csv => "csv",
            FormatType::Json => "json",
            FormatType::Yaml => "yaml",
            FormatType::Binary => "pkl",
            FormatType::Parquet => "parquet",
            FormatType::Gzip => "gz",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings a codec reads while encoding or decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    pub delimiter: u8,
    pub has_headers: bool,
    /// Decode JSON/YAML arrays of objects into a table instead of a document
    pub as_table: bool,
    pub gzip_level: u32,
}

impl Default for CodecOptions {
    fn default() -> Self {
        CodecOptions {
            delimiter: b',',
            has_headers: true,
            as_table: false,
            gzip_level: 6,
        }
    }
}

/// Serializer/deserializer for one format
pub trait Codec: Send + Sync {
    fn format(&self) -> FormatType;

    fn decode(&self, bytes: &[u8], options: &CodecOptions) -> std::result::Result<Record, CodecError>;

    fn encode(&self, record: &Record, options: &CodecOptions) -> std::result::Result<Vec<u8>, CodecError>;

    fn mime_type(&self) -> &'static str {
        self.format().mime_type()
    }
}

/// A format bound to its codec
#[derive(Clone)]
pub struct FormatSpec {
    pub format: FormatType,
    pub codec: Arc<dyn Codec>,
}

impl fmt::Debug for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatSpec")
            .field("format", &self.format)
            .field("mime_type", &self.codec.mime_type())
            .finish()
    }
}

static STANDARD_TABLE: Lazy<Arc<FormatTable>> = Lazy::new(|| {
    let mut table = FormatTable::new();
    table.register(Arc::new(CsvCodec));
    table.register(Arc::new(JsonCodec));
    table.register(Arc::new(YamlCodec));
    table.register(Arc::new(BinaryCodec));
    table.register(Arc::new(GzipCodec));
    #[cfg(feature = "parquet")]
    table.register(Arc::new(ParquetCodec));
    Arc::new(table)
});

/// Read-only mapping from format to codec
#[derive(Debug, Clone, Default)]
pub struct FormatTable {
    specs: BTreeMap<FormatType, FormatSpec>,
}

impl FormatTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared table holding every codec compiled into this build
    pub fn standard() -> Arc<FormatTable> {
        STANDARD_TABLE.clone()
    }

    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        let format = codec.format();
        self.specs.insert(format, FormatSpec { format, codec });
    }

    /// Copy of this table limited to `formats`
    pub fn restricted(&self, formats: &[FormatType]) -> FormatTable {
        FormatTable {
            specs: self
                .specs
                .iter()
                .filter(|(format, _)| formats.contains(format))
                .map(|(format, spec)| (*format, spec.clone()))
                .collect(),
        }
    }

    pub fn supports(&self, format: FormatType) -> bool {
        self.specs.contains_key(&format)
    }

    pub fn get(&self, format: FormatType) -> Option<&FormatSpec> {
        self.specs.get(&format)
    }

    pub fn formats(&self) -> impl Iterator<Item = FormatType> + '_ {
        self.specs.keys().copied()
    }
}

/// Resolves formats for contracts and drives codecs against a backend
#[derive(Debug, Clone)]
pub struct FormatDispatcher {
    table: Arc<FormatTable>,
    default_format: FormatType,
    gzip_level: u32,
}

impl FormatDispatcher {
    pub fn new(table: Arc<FormatTable>, default_format: FormatType) -> Self {
        Self {
            table,
            default_format,
            gzip_level: 6,
        }
    }

    pub fn with_gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = level;
        self
    }

    pub fn default_format(&self) -> FormatType {
        self.default_format
    }

    pub fn table(&self) -> &FormatTable {
        &self.table
    }

    /// Explicit `file_type`, else extension, else the family default
    ///
    /// Fails with `UnsupportedFormat` when the name is unknown or the format
    /// is not in this dispatcher's table.
    pub fn resolve(&self, contract: &ResolvedContract, overrides: &Options) -> Result<FormatType> {
        let hint = contract.file_type_hint_with(overrides);
        let format = if hint.is_empty() {
            self.default_format
        } else {
            FormatType::from_name(&hint)
                .ok_or_else(|| ConnectorError::unsupported_format(&hint, &contract.path))?
        };

        if !self.table.supports(format) {
            return Err(ConnectorError::unsupported_format(format.name(), &contract.path));
        }
        Ok(format)
    }

    /// Codec settings from the merged option view
    pub fn codec_options(&self, contract: &ResolvedContract, overrides: &Options) -> Result<CodecOptions> {
        let file_options = FileOptions::from_options(&contract.options_with(overrides))?;
        Ok(file_options.codec_options(self.gzip_level))
    }

    fn codec(&self, format: FormatType, key: &str) -> Result<&Arc<dyn Codec>> {
        self.table
            .get(format)
            .map(|spec| &spec.codec)
            .ok_or_else(|| ConnectorError::unsupported_format(format.name(), key))
    }

    /// Decode `bytes` read from `key`
    pub fn decode(&self, key: &str, format: FormatType, bytes: &[u8], options: &CodecOptions) -> Result<Record> {
        debug!(key = %key, format = %format, size = bytes.len(), "Decoding payload");
        self.codec(format, key)?
            .decode(bytes, options)
            .map_err(|e| ConnectorError::Decode {
                key: key.to_string(),
                format: format.name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Encode `record` for storage under `key`
    pub fn encode(&self, key: &str, format: FormatType, record: &Record, options: &CodecOptions) -> Result<Vec<u8>> {
        debug!(key = %key, format = %format, kind = record.kind(), "Encoding record");
        self.codec(format, key)?
            .encode(record, options)
            .map_err(|e| ConnectorError::Encode {
                key: key.to_string(),
                format: format.name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Read `key` through `reader` and decode it
    ///
    /// Missing or zero-length payloads become the empty-table sentinel under
    /// [`MissingResource::EmptyResult`] and `ResourceNotFound` otherwise.
    pub fn load(
        &self,
        contract: &ResolvedContract,
        key: &str,
        reader: &dyn BackendClient,
        missing: MissingResource,
        overrides: &Options,
    ) -> Result<Record> {
        let format = self.resolve(contract, overrides)?;
        let options = self.codec_options(contract, overrides)?;

        let bytes = match reader.read(key) {
            Ok(bytes) => Some(bytes).filter(|b| !b.is_empty()),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        match (bytes, missing) {
            (Some(bytes), _) => self.decode(key, format, &bytes, &options),
            (None, MissingResource::EmptyResult) => {
                debug!(key = %key, "Resource missing or empty, returning empty result");
                Ok(Record::empty())
            }
            (None, MissingResource::NotFound) => Err(ConnectorError::not_found("load", key)),
        }
    }

    /// Encode `record` and write it under `key` through `writer`
    pub fn persist(
        &self,
        contract: &ResolvedContract,
        key: &str,
        record: &Record,
        writer: &dyn BackendClient,
        overrides: &Options,
    ) -> Result<Ack> {
        let format = self.resolve(contract, overrides)?;
        let options = self.codec_options(contract, overrides)?;
        let payload = self.encode(key, format, record, &options)?;

        writer.write(key, &payload, format.mime_type())?;
        Ok(Ack {
            key: key.to_string(),
            bytes: payload.len(),
            content_type: format.mime_type().to_string(),
        })
    }
}

/*!
# Conduit Core

Uniform data access through connector contracts.

A connector contract is a URI such as `s3://bucket/reports/daily.csv?sep=;`
plus optional keyword options. The core turns it into a bound [`Connector`]
that speaks a fixed verb set against any backend:

- Contract parsing with `${NAME}` environment substitution
- Layered credential and endpoint resolution over an ordered source list
- Format dispatch from `file_type` or the path extension to a codec
- Change detection from backend fingerprints

## Architecture

Backends are adapters behind the [`BackendClient`] port and are selected
through a static registry keyed by scheme. Codecs sit behind the [`Codec`]
trait in a shared, read-only [`FormatTable`]. Cloud backends and the
parquet codec are cargo features.

## Usage

```rust
use conduit_core::{Connector, ConnectorConfig, Frame, Options, Record, Value};

let config = ConnectorConfig::default();
let connector = Connector::open("mem://usage/people.csv", &Options::new(), &Options::new(), &config)?;

let frame = Frame::new(
    vec!["name".into(), "age".into()],
    vec![vec![Value::Str("ada".into()), Value::Int(36)]],
);
connector.persist(&Record::Table(frame))?;

let loaded = connector.load()?;
assert_eq!(loaded.as_table().map(|f| f.row_count()), Some(1));
# Ok::<(), conduit_core::ConnectorError>(())
```
*/

pub mod change;
pub mod config;
pub mod connector;
pub mod contract;
pub mod credentials;
pub mod error;
pub mod format;
pub mod observability;
pub mod options;
pub mod record;
pub mod registry;
pub mod storage;

pub use change::{ChangeState, ChangeTracker, Fingerprint};
pub use config::{ConnectorConfig, CredentialConfig, TransferConfig};
pub use connector::{AdapterPolicy, Connector};
pub use contract::{ContractParser, EnvSource, Options, ProcessEnv, ResolvedContract};
pub use credentials::{Credential, CredentialResolver, ResolutionSource};
pub use error::{CodecError, ConnectorError, Result};
pub use format::{Codec, FormatDispatcher, FormatTable, FormatType};
pub use observability::{init_default_observability, init_observability};
pub use record::{Frame, Record, Value};
pub use registry::BackendKind;
pub use storage::{Ack, BackendClient, LocalFileClient, MemoryClient, MissingResource};

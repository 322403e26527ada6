/*!
End-to-end tests for conduit connectors.
These tests drive contracts from parsing through the registry to the backend.
*/

use chrono::{TimeZone, Utc};
use conduit_core::{
    BackendKind, Connector, ConnectorConfig, ConnectorError, ContractParser, CredentialConfig,
    CredentialResolver, FormatType, Frame, Options, Record, Value,
};
use std::collections::HashMap;
use tempfile::TempDir;

fn no_options() -> Options {
    Options::new()
}

fn open(uri: &str) -> Connector {
    Connector::open(uri, &no_options(), &no_options(), &ConnectorConfig::default()).unwrap()
}

fn sample_frame(rows: usize) -> Frame {
    let columns = vec!["id".into(), "name".into(), "score".into(), "active".into(), "created".into()];
    let rows = (0..rows)
        .map(|i| {
            vec![
                Value::Int(i as i64),
                Value::Str(format!("user-{i}")),
                Value::Float(i as f64 * 1.5),
                Value::Bool(i % 2 == 0),
                Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 9, 30, 0).unwrap()),
            ]
        })
        .collect();
    Frame::new(columns, rows)
}

#[test]
fn test_scenario_a_extension_inference() {
    let contract = ContractParser::with_env(HashMap::new())
        .parse("mem://x.csv", &no_options(), &no_options())
        .unwrap();
    assert_eq!(contract.scheme, "mem");
    assert_eq!(contract.path, "x.csv");
    assert_eq!(contract.file_type_hint(), "csv");
}

#[test]
fn test_scenario_b_query_file_type() {
    let contract = ContractParser::with_env(HashMap::new())
        .parse("mem://x?file_type=json", &no_options(), &no_options())
        .unwrap();
    assert_eq!(contract.path, "x");
    assert_eq!(contract.file_type_hint(), "json");
}

#[test]
fn test_scenario_c_env_before_explicit() {
    let env: HashMap<String, String> = [("API_TOKEN".to_string(), "abc123".to_string())].into_iter().collect();
    let resolver = CredentialResolver::with_env(env, &CredentialConfig::default());
    let token = resolver
        .resolve_token(&["local-process-env", "explicit-arg"], None)
        .unwrap();
    assert_eq!(token.as_deref(), Some("abc123"));
}

#[test]
fn test_scenario_d_explicit_before_env() {
    let env: HashMap<String, String> = [("API_TOKEN".to_string(), "abc123".to_string())].into_iter().collect();
    let resolver = CredentialResolver::with_env(env, &CredentialConfig::default());
    let token = resolver
        .resolve_token(&["explicit-arg", "local-process-env"], Some("zzz"))
        .unwrap();
    assert_eq!(token.as_deref(), Some("zzz"));
}

#[test]
fn test_scenario_e_csv_round_trip_stringifies_timestamps() {
    let connector = open("mem://e2e/scenario_e.csv");
    let frame = sample_frame(5);
    connector.persist(&Record::Table(frame.clone())).unwrap();

    let loaded = connector.load().unwrap();
    let loaded = loaded.as_table().unwrap();
    assert_eq!(loaded.row_count(), 5);
    assert_eq!(loaded.column_names(), frame.column_names());

    for value in loaded.column("created").unwrap() {
        assert!(matches!(value, Value::Str(_)), "expected a string, got {value:?}");
    }
    assert_eq!(loaded.rows[2][0], Value::Int(2));
    assert_eq!(loaded.rows[3][3], Value::Bool(false));
}

#[test]
fn test_scenario_f_unsupported_format() {
    let connector = open("mem://e2e/scenario_f?file_type=xml");
    let err = connector.load().unwrap_err();
    match err {
        ConnectorError::UnsupportedFormat { format, key } => {
            assert_eq!(format, "xml");
            assert_eq!(key, "e2e/scenario_f");
        }
        other => panic!("Expected UnsupportedFormat, got {other:?}"),
    }
    assert!(!connector.exists().unwrap());
}

#[test]
fn test_binary_round_trip_is_exact() {
    let connector = open("mem://e2e/state.pkl");
    assert_eq!(connector.format().unwrap(), FormatType::Binary);

    let record = Record::Table(sample_frame(3));
    connector.persist(&record).unwrap();
    assert_eq!(connector.load().unwrap(), record);
}

#[test]
fn test_change_tracking_lifecycle() {
    let connector = open("mem://e2e/changes.json");
    connector
        .persist(&Record::Document(serde_json::json!({"version": 1})))
        .unwrap();

    assert!(connector.has_changed().unwrap());
    connector.reset_changed(false).unwrap();
    assert!(!connector.has_changed().unwrap());

    // a second connector on the same resource writes a new version
    let writer = open("mem://e2e/changes.json");
    writer
        .persist(&Record::Document(serde_json::json!({"version": 2})))
        .unwrap();
    assert!(connector.has_changed().unwrap());

    let fresh = open("mem://e2e/changes.json");
    assert!(fresh.has_changed().unwrap());
}

#[test]
fn test_local_files_and_backup_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConnectorConfig::with_local_base(temp_dir.path());
    let connector = Connector::open("file://reports/daily.yaml", &no_options(), &no_options(), &config).unwrap();
    assert_eq!(connector.kind(), BackendKind::Local);

    let err = connector.load().unwrap_err();
    assert!(err.is_not_found());
    assert!(connector.has_changed().unwrap());

    let document = serde_json::json!({"total": 12, "regions": ["eu", "us"]});
    connector.persist(&Record::Document(document.clone())).unwrap();
    assert!(temp_dir.path().join("reports/daily.yaml").is_file());
    assert_eq!(connector.load().unwrap(), Record::Document(document));

    assert_eq!(
        connector.rotate_backups(connector.max_backups().unwrap()).unwrap().as_deref(),
        Some("reports/daily_00.yaml")
    );
    assert_eq!(connector.rotate_backups(10).unwrap(), None);
    assert!(temp_dir.path().join("reports/daily_00.yaml").is_file());

    assert!(connector.remove().unwrap());
    assert!(connector.remove().unwrap_err().is_not_found());
}

#[test]
fn test_local_gzip_payload() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConnectorConfig::with_local_base(temp_dir.path());
    let connector = Connector::open("file://archive/blob.gz", &no_options(), &no_options(), &config).unwrap();

    let payload = b"line one\nline two\n".repeat(50);
    let ack = connector.persist(&Record::Raw(payload.clone())).unwrap();
    assert_eq!(ack.content_type, "application/gzip");
    assert!(ack.bytes < payload.len());
    assert_eq!(connector.load().unwrap(), Record::Raw(payload));
}

#[test]
fn test_environment_placeholder_in_contract() {
    std::env::set_var("CONDUIT_E2E_DATASET", "placeholder");
    let connector = open("mem://e2e/${CONDUIT_E2E_DATASET}.csv");
    assert_eq!(connector.key(), "e2e/placeholder.csv");

    let err = Connector::open(
        "mem://e2e/${CONDUIT_E2E_UNSET_VARIABLE}.csv",
        &no_options(),
        &no_options(),
        &ConnectorConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConnectorError::MissingEnvironmentVariable(name) if name == "CONDUIT_E2E_UNSET_VARIABLE"));
}

#[test]
fn test_memory_remove_is_lenient() {
    let connector = open("mem://e2e/never_written.csv");
    assert!(connector.load().unwrap().is_empty());
    assert!(!connector.remove().unwrap());
}

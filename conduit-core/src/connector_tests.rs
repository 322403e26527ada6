/*!
Tests for the connector verbs.
*/

use super::*;
use crate::record::{Frame, Value};
use crate::storage::{MemoryClient, MockBackendClient};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn contract(uri: &str) -> ResolvedContract {
    ContractParser::with_env(HashMap::new())
        .parse(uri, &Options::new(), &Options::new())
        .unwrap()
}

fn contract_with(uri: &str, kwargs: &[(&str, &str)]) -> ResolvedContract {
    let kwargs: Options = kwargs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ContractParser::with_env(HashMap::new())
        .parse(uri, &kwargs, &Options::new())
        .unwrap()
}

fn memory_connector(uri: &str, store: &MemoryClient) -> Connector {
    memory_connector_for(contract(uri), store, BackendKind::Memory.default_policy())
}

fn memory_connector_for(contract: ResolvedContract, store: &MemoryClient, policy: AdapterPolicy) -> Connector {
    Connector::with_client(BackendKind::Memory, contract, Box::new(store.clone()), policy).unwrap()
}

fn fast_retries(retries: usize) -> RetryPolicy {
    RetryPolicy::with_retries(retries).with_initial_interval(Duration::from_millis(1))
}

fn table(values: &[i64]) -> Record {
    Record::Table(Frame::new(
        vec!["n".into()],
        values.iter().map(|v| vec![Value::Int(*v)]).collect(),
    ))
}

fn mock_client() -> MockBackendClient {
    let mut mock = MockBackendClient::new();
    mock.expect_name().return_const("mock");
    mock
}

#[test]
fn test_first_check_reports_changed() {
    let store = MemoryClient::new();
    store.write("x.csv", b"n\n1\n", "text/csv").unwrap();
    let connector = memory_connector("mem://x.csv", &store);
    assert!(connector.has_changed().unwrap());
}

#[test]
fn test_reset_then_check_is_unchanged() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://x.csv", &store);
    connector.persist(&table(&[1, 2])).unwrap();

    assert!(connector.has_changed().unwrap());
    connector.reset_changed(false).unwrap();
    assert!(!connector.has_changed().unwrap());
    assert_eq!(connector.change_state().unwrap(), ChangeState::Unchanged);
}

#[test]
fn test_reset_before_any_probe_is_unchanged() {
    let store = MemoryClient::new();
    store.write("x.csv", b"n\n1\n", "text/csv").unwrap();
    let connector = memory_connector("mem://x.csv", &store);
    connector.reset_changed(false).unwrap();
    assert!(!connector.has_changed().unwrap());
}

#[test]
fn test_absent_resource_settles_after_reset() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://never_written.csv", &store);

    assert!(connector.has_changed().unwrap());
    connector.reset_changed(false).unwrap();
    assert!(!connector.has_changed().unwrap());
    assert!(!connector.has_changed().unwrap());

    connector.persist(&table(&[1])).unwrap();
    assert!(connector.has_changed().unwrap());
}

#[test]
fn test_write_after_probe_is_detected() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://x.csv", &store);
    connector.persist(&table(&[1])).unwrap();
    connector.has_changed().unwrap();
    assert!(!connector.has_changed().unwrap());

    connector.persist(&table(&[1, 2, 3])).unwrap();
    assert!(connector.has_changed().unwrap());
}

#[test]
fn test_load_acknowledges_current_state() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://x.csv", &store);
    connector.persist(&table(&[5])).unwrap();

    let loaded = connector.load().unwrap();
    assert_eq!(loaded.as_table().unwrap().row_count(), 1);
    assert_eq!(connector.change_state().unwrap(), ChangeState::Unchanged);
    assert!(!connector.has_changed().unwrap());
}

#[test]
fn test_reset_to_changed_is_observable() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://x.csv", &store);
    connector.reset_changed(false).unwrap();
    connector.reset_changed(true).unwrap();
    assert_eq!(connector.change_state().unwrap(), ChangeState::Changed);
}

#[test]
fn test_load_missing_follows_policy() {
    let store = MemoryClient::new();
    let lenient = memory_connector("mem://absent.csv", &store);
    assert!(lenient.load().unwrap().is_empty());

    let strict = memory_connector_for(
        contract("mem://absent.csv"),
        &store,
        AdapterPolicy::new(MissingResource::NotFound, 0, FormatType::Csv),
    );
    let err = strict.load().unwrap_err();
    assert!(matches!(err, ConnectorError::ResourceNotFound { verb: "load", .. }));
}

#[test]
fn test_remove_follows_policy() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://gone.csv", &store);
    connector.persist(&table(&[1])).unwrap();
    assert!(connector.exists().unwrap());
    assert!(connector.remove().unwrap());
    assert!(!connector.exists().unwrap());
    assert!(!connector.remove().unwrap());

    let strict = memory_connector_for(
        contract("mem://gone.csv"),
        &store,
        AdapterPolicy::new(MissingResource::NotFound, 0, FormatType::Csv),
    );
    assert!(strict.remove().unwrap_err().is_not_found());
}

#[test]
fn test_unsupported_format_never_reaches_backend() {
    let mut mock = mock_client();
    mock.expect_read().never();
    mock.expect_write().never();

    let connector = Connector::with_client(
        BackendKind::Memory,
        contract("mem://x?file_type=xml"),
        Box::new(mock),
        BackendKind::Memory.default_policy(),
    )
    .unwrap();

    assert!(matches!(
        connector.load(),
        Err(ConnectorError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        connector.persist(&table(&[1])),
        Err(ConnectorError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_transient_read_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let mut mock = mock_client();
    mock.expect_read().returning(move |key| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ConnectorError::unavailable("read", key, "connection reset"))
        } else {
            Ok(b"n\n1\n2\n".to_vec())
        }
    });

    let connector = Connector::with_client(
        BackendKind::Memory,
        contract("mem://x.csv"),
        Box::new(mock),
        AdapterPolicy::new(MissingResource::EmptyResult, 2, FormatType::Csv),
    )
    .unwrap()
    .with_retry_policy(fast_retries(2));

    let record = connector.load().unwrap();
    assert_eq!(record.as_table().unwrap().row_count(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_exhausted_retries_surface_the_transient_error() {
    let mut mock = mock_client();
    mock.expect_write()
        .times(3)
        .returning(|key, _, _| Err(ConnectorError::Timeout { verb: "write", key: key.to_string() }));

    let connector = Connector::with_client(
        BackendKind::Memory,
        contract("mem://x.json"),
        Box::new(mock),
        AdapterPolicy::new(MissingResource::EmptyResult, 2, FormatType::Csv),
    )
    .unwrap()
    .with_retry_policy(fast_retries(2));

    let err = connector.persist(&table(&[1])).unwrap_err();
    assert!(matches!(err, ConnectorError::Timeout { .. }));
}

#[test]
fn test_permanent_failure_is_not_retried() {
    let mut mock = mock_client();
    mock.expect_read()
        .times(1)
        .returning(|key| Err(ConnectorError::backend("read", key, "access denied")));

    let connector = Connector::with_client(
        BackendKind::Memory,
        contract("mem://x.csv"),
        Box::new(mock),
        AdapterPolicy::new(MissingResource::EmptyResult, 2, FormatType::Csv),
    )
    .unwrap()
    .with_retry_policy(fast_retries(2));

    assert!(matches!(connector.load(), Err(ConnectorError::Backend { .. })));
}

#[test]
fn test_persist_with_overrides_format() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://x.csv", &store);
    let overrides: Options = [("file_type".to_string(), "json".to_string())].into_iter().collect();

    let ack = connector.persist_with(&table(&[7]), &overrides).unwrap();
    assert_eq!(ack.content_type, "application/json");
    assert_eq!(store.read("x.csv").unwrap(), br#"[{"n":7}]"#);
}

#[test]
fn test_restricted_formats() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://x.yaml", &store).with_formats(&[FormatType::Csv]);
    assert!(matches!(
        connector.persist(&table(&[1])),
        Err(ConnectorError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_backup_inherits_kwargs() {
    let store = MemoryClient::new();
    let connector = memory_connector_for(
        contract_with("mem://data.csv", &[("sep", ";")]),
        &store,
        BackendKind::Memory.default_policy(),
    );
    let record = Record::Table(Frame::new(
        vec!["a".into(), "b".into()],
        vec![vec![Value::Int(1), Value::Int(2)]],
    ));

    connector.backup(&record, "mem://backups/data.csv").unwrap();
    assert_eq!(store.read("backups/data.csv").unwrap(), b"a;b\n1;2\n");

    connector.backup_ignore_kwargs(&record, "mem://backups/plain.csv").unwrap();
    assert_eq!(store.read("backups/plain.csv").unwrap(), b"a,b\n1,2\n");
}

#[test]
fn test_backup_must_stay_on_the_same_backend() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://data.csv", &store);
    let err = connector.backup(&table(&[1]), "file:///tmp/data.csv").unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidContract { .. }));
}

#[test]
fn test_backup_slot_keys() {
    assert_eq!(backup_slot_key("data.csv", 0), "data_00.csv");
    assert_eq!(backup_slot_key("dir/sub/data.tar.gz", 12), "dir/sub/data.tar_12.gz");
    assert_eq!(backup_slot_key("dir/README", 3), "dir/README_03");
    assert_eq!(backup_slot_key("dir.d/.hidden", 1), "dir.d/.hidden_01");
}

#[test]
fn test_rotate_backups() {
    let store = MemoryClient::new();
    let connector = memory_connector("mem://state.csv", &store);
    connector.persist(&table(&[1])).unwrap();

    assert_eq!(connector.rotate_backups(3).unwrap().as_deref(), Some("state_00.csv"));
    // identical content is not copied again
    assert_eq!(connector.rotate_backups(3).unwrap(), None);

    connector.persist(&table(&[1, 2])).unwrap();
    assert_eq!(connector.rotate_backups(3).unwrap().as_deref(), Some("state_01.csv"));
    assert_eq!(store.read("state_00.csv").unwrap(), b"n\n1\n");

    connector.persist(&table(&[3])).unwrap();
    assert_eq!(connector.rotate_backups(3).unwrap().as_deref(), Some("state_02.csv"));
    connector.persist(&table(&[4])).unwrap();
    assert_eq!(connector.rotate_backups(3).unwrap(), None);
    assert!(!store.exists("state_03.csv").unwrap());
}

#[test]
fn test_rotate_missing_resource_follows_policy() {
    let store = MemoryClient::new();
    assert_eq!(memory_connector("mem://none.csv", &store).rotate_backups(2).unwrap(), None);

    let strict = memory_connector_for(
        contract("mem://none.csv"),
        &store,
        AdapterPolicy::new(MissingResource::NotFound, 0, FormatType::Csv),
    );
    assert!(strict.rotate_backups(2).unwrap_err().is_not_found());
}

#[test]
fn test_max_backups_option() {
    let store = MemoryClient::new();
    assert_eq!(memory_connector("mem://x.csv", &store).max_backups().unwrap(), 10);
    assert_eq!(
        memory_connector("mem://x.csv?max_backups=4", &store).max_backups().unwrap(),
        4
    );
}

#[test]
fn test_open_through_registry() {
    let config = ConnectorConfig::default();
    let connector = Connector::open(
        "mem://connector-tests/open.json",
        &Options::new(),
        &Options::new(),
        &config,
    )
    .unwrap();
    assert_eq!(connector.kind(), BackendKind::Memory);
    assert_eq!(connector.key(), "connector-tests/open.json");
    assert_eq!(connector.format().unwrap(), FormatType::Json);
    assert_eq!(connector.retry_policy().max_retries, 0);
    assert!(connector.credential().is_none());
}

#[test]
fn test_config_retries_override_family_default() {
    let mut config = ConnectorConfig::default();
    config.transfer.retries = Some(4);
    let connector = Connector::open("mem://connector-tests/retry.csv", &Options::new(), &Options::new(), &config).unwrap();
    assert_eq!(connector.retry_policy().max_retries, 4);
}

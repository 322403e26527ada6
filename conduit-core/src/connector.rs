/*!
The generic connector.

A [`Connector`] binds one resolved contract to one backend client and
implements the verb set on top of it: `load`, `persist`, `exists`,
`has_changed`, `reset_changed`, `remove`, `backup` and `rotate_backups`.
Backend families differ only in their client and their [`AdapterPolicy`].

Verbs run synchronously on the caller's thread. Transfers on one instance
are serialized by an instance-scoped lock; the change tracker has its own.
*/

use std::sync::{Mutex, MutexGuard};

use conduit_retry::RetryPolicy;
use tracing::{debug, error, info, warn};

use crate::change::{ChangeState, ChangeTracker};
use crate::config::ConnectorConfig;
use crate::contract::{ContractParser, Options, ResolvedContract};
use crate::credentials::Credential;
use crate::format::{FormatDispatcher, FormatTable, FormatType};
#[cfg(feature = "metrics")]
use crate::observability::{ConnectorMetrics, MetricsTimer};
use crate::options::FileOptions;
use crate::record::Record;
use crate::registry::{self, BackendKind};
use crate::storage::{Ack, BackendClient, MissingResource, RetryingClient};
use crate::{ConnectorError, Result};

/// Documented per-family behaviour of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterPolicy {
    /// What `load` and `remove` do when nothing is stored under the key
    pub missing: MissingResource,
    /// Retries on transient upload/download failures
    pub retries: usize,
    /// Format used when neither `file_type` nor an extension is given
    pub default_format: FormatType,
}

impl AdapterPolicy {
    pub fn new(missing: MissingResource, retries: usize, default_format: FormatType) -> Self {
        Self {
            missing,
            retries,
            default_format,
        }
    }
}

/// One contract bound to one backend
pub struct Connector {
    contract: ResolvedContract,
    kind: BackendKind,
    client: Box<dyn BackendClient>,
    key: String,
    dispatcher: FormatDispatcher,
    policy: AdapterPolicy,
    retry: RetryPolicy,
    tracker: Mutex<ChangeTracker>,
    transfer_lock: Mutex<()>,
    credential: Option<Credential>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("contract", &self.contract.to_string())
            .field("backend", &self.kind)
            .field("key", &self.key)
            .field("policy", &self.policy)
            .field("credential", &self.credential)
            .finish()
    }
}

impl Connector {
    /// Parse `uri` and bind it to its backend through the registry
    ///
    /// # Example
    /// ```rust
    /// use conduit_core::{Connector, ConnectorConfig, Options};
    ///
    /// let connector = Connector::open("mem://docs/example.csv", &Options::new(), &Options::new(), &ConnectorConfig::default())?;
    /// assert!(connector.has_changed()?);
    /// # Ok::<(), conduit_core::ConnectorError>(())
    /// ```
    pub fn open(uri: &str, kwargs: &Options, query: &Options, config: &ConnectorConfig) -> Result<Self> {
        let contract = ContractParser::new().parse(uri, kwargs, query)?;
        Self::from_contract(contract, config)
    }

    /// Bind an already parsed contract
    pub fn from_contract(contract: ResolvedContract, config: &ConnectorConfig) -> Result<Self> {
        let (kind, binding) = registry::bind(&contract, config)?;
        let retry = config.transfer.retry_policy(binding.policy.retries);
        let dispatcher = FormatDispatcher::new(FormatTable::standard(), binding.policy.default_format)
            .with_gzip_level(config.gzip_level);

        info!(
            contract = %contract,
            backend = %kind,
            key = %binding.key,
            retries = retry.max_retries,
            "Opened connector"
        );

        Ok(Self {
            contract,
            kind,
            client: binding.client,
            key: binding.key,
            dispatcher,
            policy: binding.policy,
            retry,
            tracker: Mutex::new(ChangeTracker::new()),
            transfer_lock: Mutex::new(()),
            credential: binding.credential,
        })
    }

    /// Bind a contract to a caller-supplied client
    ///
    /// The key is derived from the contract the way `kind` would derive it.
    pub fn with_client(
        kind: BackendKind,
        contract: ResolvedContract,
        client: Box<dyn BackendClient>,
        policy: AdapterPolicy,
    ) -> Result<Self> {
        let key = kind.locate(&contract)?.key;
        Ok(Self {
            contract,
            kind,
            client,
            key,
            dispatcher: FormatDispatcher::new(FormatTable::standard(), policy.default_format),
            policy,
            retry: RetryPolicy::with_retries(policy.retries),
            tracker: Mutex::new(ChangeTracker::new()),
            transfer_lock: Mutex::new(()),
            credential: None,
        })
    }

    /// Replace the retry policy applied to reads and writes
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Restrict the formats this connector accepts
    pub fn with_formats(mut self, formats: &[FormatType]) -> Self {
        let table = self.dispatcher.table().restricted(formats);
        self.dispatcher = FormatDispatcher::new(std::sync::Arc::new(table), self.policy.default_format);
        self
    }

    pub fn contract(&self) -> &ResolvedContract {
        &self.contract
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> &AdapterPolicy {
        &self.policy
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Format that `load` and `persist` would use without overrides
    pub fn format(&self) -> Result<FormatType> {
        self.dispatcher.resolve(&self.contract, &Options::new())
    }

    /// Load the resource
    pub fn load(&self) -> Result<Record> {
        self.load_with(&Options::new())
    }

    /// Load the resource with per-call option overrides
    ///
    /// A successful load acknowledges the current state: the change flag is
    /// set to unchanged without probing the backend.
    pub fn load_with(&self, overrides: &Options) -> Result<Record> {
        info!(backend = %self.kind, key = %self.key, verb = "load", "Loading resource");
        let record = self.instrument("load", || {
            let _transfer = self.transfer_guard("load")?;
            let reader = RetryingClient::new(self.client.as_ref(), &self.retry);
            self.dispatcher
                .load(&self.contract, &self.key, &reader, self.policy.missing, overrides)
        })?;
        self.tracker("load")?.reset(false);
        Ok(record)
    }

    /// Persist `record` to the resource
    pub fn persist(&self, record: &Record) -> Result<Ack> {
        self.persist_with(record, &Options::new())
    }

    pub fn persist_with(&self, record: &Record, overrides: &Options) -> Result<Ack> {
        info!(backend = %self.kind, key = %self.key, verb = "persist", kind = record.kind(), "Persisting resource");
        let ack = self.instrument("persist", || {
            let _transfer = self.transfer_guard("persist")?;
            let writer = RetryingClient::new(self.client.as_ref(), &self.retry);
            self.dispatcher
                .persist(&self.contract, &self.key, record, &writer, overrides)
        })?;
        #[cfg(feature = "metrics")]
        ConnectorMetrics::global().observe_payload(ack.bytes);
        info!(key = %ack.key, bytes = ack.bytes, content_type = %ack.content_type, "Persisted resource");
        Ok(ack)
    }

    pub fn exists(&self) -> Result<bool> {
        debug!(backend = %self.kind, key = %self.key, verb = "exists", "Probing resource");
        self.instrument("exists", || self.client.exists(&self.key))
    }

    /// Probe the backend and report whether its state moved since the last probe
    ///
    /// The first probe of a fresh connector always reports a change. A
    /// `false` result only describes the fingerprint seen at probe time.
    pub fn has_changed(&self) -> Result<bool> {
        let probe = self.instrument("has_changed", || self.client.fingerprint(&self.key))?;
        let changed = self.tracker("has_changed")?.observe(probe.clone());
        debug!(key = %self.key, fingerprint = %probe, changed, "Checked for changes");
        Ok(changed)
    }

    /// Force the change flag without probing the backend
    pub fn reset_changed(&self, changed: bool) -> Result<()> {
        self.tracker("reset_changed")?.reset(changed);
        Ok(())
    }

    /// Current change flag, as left by the last probe, load or reset
    pub fn change_state(&self) -> Result<ChangeState> {
        Ok(self.tracker("change_state")?.state())
    }

    /// Delete the resource
    ///
    /// Returns whether something was deleted. A missing resource yields
    /// `Ok(false)` under [`MissingResource::EmptyResult`] and
    /// `ResourceNotFound` under [`MissingResource::NotFound`].
    pub fn remove(&self) -> Result<bool> {
        info!(backend = %self.kind, key = %self.key, verb = "remove", "Removing resource");
        self.instrument("remove", || {
            let _transfer = self.transfer_guard("remove")?;
            match self.client.delete(&self.key) {
                Ok(()) => Ok(true),
                Err(e) if e.is_not_found() && self.policy.missing == MissingResource::EmptyResult => {
                    debug!(key = %self.key, "Nothing to remove");
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Persist `record` to another contract on the same backend
    ///
    /// The backup contract inherits this contract's kwargs; its format is
    /// inferred from its own path and options.
    pub fn backup(&self, record: &Record, uri: &str) -> Result<Ack> {
        self.backup_to(record, uri, false)
    }

    /// Like [`backup`](Self::backup) without inheriting kwargs
    pub fn backup_ignore_kwargs(&self, record: &Record, uri: &str) -> Result<Ack> {
        self.backup_to(record, uri, true)
    }

    fn backup_to(&self, record: &Record, uri: &str, ignore_kwargs: bool) -> Result<Ack> {
        let kwargs = if ignore_kwargs {
            Options::new()
        } else {
            self.contract.kwargs.clone()
        };
        let target = ContractParser::new().parse(uri, &kwargs, &Options::new())?;
        if BackendKind::from_scheme(&target.scheme) != Some(self.kind) {
            return Err(ConnectorError::invalid_contract(
                uri,
                format!("backup must target the same backend ({})", self.kind),
            ));
        }
        let location = self.kind.locate(&target)?;
        let own_scope = self.kind.locate(&self.contract)?.scope;
        if location.scope != own_scope {
            return Err(ConnectorError::invalid_contract(
                uri,
                "backup must target the same bucket or project",
            ));
        }

        info!(backend = %self.kind, key = %location.key, source = %self.key, verb = "backup", "Writing backup");
        self.instrument("backup", || {
            let _transfer = self.transfer_guard("backup")?;
            let writer = RetryingClient::new(self.client.as_ref(), &self.retry);
            self.dispatcher
                .persist(&target, &location.key, record, &writer, &Options::new())
        })
    }

    /// `max_backups` option of this contract (10 unless set)
    pub fn max_backups(&self) -> Result<usize> {
        Ok(FileOptions::from_options(&self.contract.options())?.max_backups)
    }

    /// Copy the current payload into the first free `name_NN.ext` slot
    ///
    /// Slots run from `00` to `max_backups - 1` and are never overwritten.
    /// Nothing is written when the newest existing slot already holds the
    /// same bytes or when every slot is taken. Returns the key written.
    pub fn rotate_backups(&self, max_backups: usize) -> Result<Option<String>> {
        info!(backend = %self.kind, key = %self.key, max_backups, verb = "rotate_backups", "Rotating backups");
        self.instrument("rotate_backups", || {
            let _transfer = self.transfer_guard("rotate_backups")?;
            let client = RetryingClient::new(self.client.as_ref(), &self.retry);

            let current = match client.read(&self.key) {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() && self.policy.missing == MissingResource::EmptyResult => {
                    debug!(key = %self.key, "Nothing to back up");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            let content_type = self
                .format()
                .map(|format| format.mime_type())
                .unwrap_or("application/octet-stream");

            for slot in 0..max_backups {
                let slot_key = backup_slot_key(&self.key, slot);
                if client.exists(&slot_key)? {
                    continue;
                }
                if slot > 0 {
                    let previous = client.read(&backup_slot_key(&self.key, slot - 1))?;
                    if previous == current {
                        debug!(key = %self.key, slot = slot - 1, "Newest backup is identical, skipping");
                        return Ok(None);
                    }
                }
                client.write(&slot_key, &current, content_type)?;
                info!(key = %self.key, backup = %slot_key, "Backup written");
                return Ok(Some(slot_key));
            }

            warn!(key = %self.key, max_backups, "Every backup slot is taken");
            Ok(None)
        })
    }

    fn instrument<T>(&self, verb: &'static str, op: impl FnOnce() -> Result<T>) -> Result<T> {
        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(self.client.name(), verb);

        let outcome = op();

        #[cfg(feature = "metrics")]
        timer.finish_with(&outcome);

        if let Err(e) = &outcome {
            error!(backend = %self.kind, key = %self.key, verb, error = %e, "Connector verb failed");
        }
        outcome
    }

    fn transfer_guard(&self, verb: &'static str) -> Result<MutexGuard<'_, ()>> {
        self.transfer_lock
            .lock()
            .map_err(|_| ConnectorError::backend(verb, &self.key, "transfer lock poisoned"))
    }

    fn tracker(&self, verb: &'static str) -> Result<MutexGuard<'_, ChangeTracker>> {
        self.tracker
            .lock()
            .map_err(|_| ConnectorError::backend(verb, &self.key, "change tracker lock poisoned"))
    }
}

/// `dir/name.ext` -> `dir/name_NN.ext`
pub fn backup_slot_key(key: &str, slot: usize) -> String {
    let (dir, name) = match key.rfind('/') {
        Some(idx) => key.split_at(idx + 1),
        None => ("", key),
    };
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{dir}{stem}_{slot:02}.{ext}"),
        _ => format!("{dir}{name}_{slot:02}"),
    }
}

#[cfg(test)]
#[path = "connector_tests.rs"]
mod connector_tests;

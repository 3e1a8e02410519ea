//! TransactionStore
//!
//! Owns the CURRENT and SAVED partitions and the replay staging directory.
//!
//! ## State
//!
//! - per partition an ordered index `id -> RecordSummary`
//! - one cache `id -> Arc<TransactionRecord>`; an id is cached for at most
//!   one partition
//!
//! Both sit behind one `parking_lot::Mutex` that is never held across I/O.
//! Blocking file work runs on `spawn_blocking`; bulk deletes and startup
//! pruning go through the single `BulkWorker`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use monitor_store::{codec::XmlRecordCodec, Partition, StoreConfig, TransactionStore};
//!
//! let store = TransactionStore::new(StoreConfig::new("/var/lib/httpmonitor"), XmlRecordCodec);
//! store.initialize().await?;
//! let ids = store.load_all().await?;
//!
//! store.move_records(ids.current.clone(), Partition::Current, Partition::Saved).await?;
//! let report = store.clear_partition(Partition::Saved, None)?.wait().await?;
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::domain::{
    build_tree, HostProbe, Partition, ProgressSink, RecordCodec, RecordSummary, SortOrder,
    TransactionNode, TransactionRecord,
};
use crate::infrastructure::{validate_id, Location, RecordFiles, TcpHostProbe};
use crate::replay::{replay_url, ReplayDescriptor, ReplayStatus};
use crate::worker::{BatchHandle, BatchReport, BulkWorker};
use crate::{ErrorKind, Result, StoreError};

/// Ids known after `load_all`, in the configured default order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedIds {
    pub current: Vec<String>,
    pub saved: Vec<String>,
}

/// How `fetch` uses the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Serve from the cache when possible
    pub use_cache: bool,
    /// Cache a record read from disk
    pub cache_result: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_result: true,
        }
    }
}

/// Outcome of `move_records`
#[derive(Debug, Default)]
pub struct MoveReport {
    pub moved: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
}

impl MoveReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
struct CachedRecord {
    partition: Partition,
    record: Arc<TransactionRecord>,
}

#[derive(Debug, Default)]
struct StoreState {
    ready: bool,
    current: BTreeMap<String, RecordSummary>,
    saved: BTreeMap<String, RecordSummary>,
    cache: HashMap<String, CachedRecord>,
}

impl StoreState {
    fn index(&self, partition: Partition) -> &BTreeMap<String, RecordSummary> {
        match partition {
            Partition::Current => &self.current,
            Partition::Saved => &self.saved,
        }
    }

    fn index_mut(&mut self, partition: Partition) -> &mut BTreeMap<String, RecordSummary> {
        match partition {
            Partition::Current => &mut self.current,
            Partition::Saved => &mut self.saved,
        }
    }

    fn reset(&mut self) {
        self.current.clear();
        self.saved.clear();
        self.cache.clear();
    }

    fn contains(&self, id: &str, partition: Partition) -> bool {
        self.index(partition).contains_key(id)
    }

    fn partition_of(&self, id: &str) -> Option<Partition> {
        Partition::ALL.into_iter().find(|p| self.contains(id, *p))
    }

    fn cached(&self, id: &str, partition: Partition) -> Option<Arc<TransactionRecord>> {
        self.cache
            .get(id)
            .filter(|c| c.partition == partition)
            .map(|c| Arc::clone(&c.record))
    }

    /// Index `record` under `partition`, dropping any entry it had elsewhere
    fn register(&mut self, partition: Partition, record: Arc<TransactionRecord>, cache: bool) {
        let id = record.id.clone();
        for other in Partition::ALL {
            if other != partition && self.index_mut(other).remove(&id).is_some() {
                warn!("Record {} was indexed in {}, now {}", id, other, partition);
            }
        }
        self.index_mut(partition)
            .insert(id.clone(), record.summary(partition));
        if cache {
            self.cache.insert(id, CachedRecord { partition, record });
        } else {
            self.cache.remove(&id);
        }
    }

    fn cache_record(&mut self, partition: Partition, record: Arc<TransactionRecord>) {
        if self.contains(&record.id, partition) {
            self.cache
                .insert(record.id.clone(), CachedRecord { partition, record });
        }
    }

    /// Move the index and cache entry of `id`; false if it was not in `from`
    fn relocate(&mut self, id: &str, from: Partition, to: Partition) -> bool {
        let Some(mut summary) = self.index_mut(from).remove(id) else {
            return false;
        };
        summary.partition = to;
        self.index_mut(to).insert(id.to_string(), summary);
        if let Some(cached) = self.cache.get_mut(id) {
            cached.partition = to;
        }
        true
    }

    fn remove(&mut self, id: &str) -> Option<Partition> {
        let partition = self.partition_of(id)?;
        self.index_mut(partition).remove(id);
        self.cache.remove(id);
        Some(partition)
    }

    fn summaries(&self, partition: Partition, order: SortOrder) -> Vec<RecordSummary> {
        let mut summaries: Vec<RecordSummary> = self.index(partition).values().cloned().collect();
        order.sort(&mut summaries);
        summaries
    }
}

/// Records found on disk by `load_all`
struct Scan {
    loaded: Vec<(Partition, TransactionRecord)>,
    stale: Vec<String>,
}

pub struct TransactionStore {
    config: StoreConfig,
    files: RecordFiles,
    codec: Arc<dyn RecordCodec>,
    probe: Arc<dyn HostProbe>,
    watermark: DateTime<Utc>,
    state: Mutex<StoreState>,
    worker: Mutex<Option<BulkWorker>>,
}

impl std::fmt::Debug for TransactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStore")
            .field("root", &self.config.root)
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}

impl TransactionStore {
    /// Create a store over `config.root`
    ///
    /// The startup watermark is taken now. Nothing touches the disk until
    /// `initialize`. A grace window reaching past the earliest representable
    /// time keeps every CURRENT record.
    pub fn new(config: StoreConfig, codec: impl RecordCodec + 'static) -> Self {
        let watermark = chrono::Duration::from_std(config.grace_window())
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let files = RecordFiles::new(config.root.clone(), codec.extension());
        Self {
            watermark,
            files,
            codec: Arc::new(codec),
            probe: Arc::new(TcpHostProbe),
            state: Mutex::new(StoreState::default()),
            worker: Mutex::new(None),
            config,
        }
    }

    pub fn with_probe(mut self, probe: impl HostProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Replace the startup watermark
    pub fn with_watermark(mut self, watermark: DateTime<Utc>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn files(&self) -> &RecordFiles {
        &self.files
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Create `current/`, `save/` and `replay/` under the root
    ///
    /// Idempotent. Until a call succeeds every disk operation fails with
    /// `StorageUnavailable`.
    pub async fn initialize(&self) -> Result<()> {
        self.config.validate()?;

        if let Err(e) = self.run_blocking(|files, _| files.ensure_dirs()).await {
            error!("Store at {} is unavailable: {}", self.config.root.display(), e);
            self.state.lock().ready = false;
            return Err(e);
        }

        {
            let mut worker = self.worker.lock();
            if worker.is_none() {
                *worker = Some(BulkWorker::spawn(self.files.clone())?);
            }
        }

        self.state.lock().ready = true;
        info!("Store initialized at {}", self.config.root.display());
        Ok(())
    }

    /// Rebuild the index from disk
    ///
    /// CURRENT files modified before the watermark are not indexed; they are
    /// queued for deletion and the call does not wait for it. Files that fail
    /// to parse are skipped. Bulk work already queued finishes before the
    /// scan.
    pub async fn load_all(&self) -> Result<LoadedIds> {
        self.ensure_ready()?;
        self.flush().await?;

        let watermark = self.watermark;
        let scan = self
            .run_blocking(move |files, codec| scan_partitions(files, codec, watermark))
            .await?;

        {
            let mut state = self.state.lock();
            state.reset();
            for (partition, record) in scan.loaded {
                state.register(partition, Arc::new(record), false);
            }
        }

        if !scan.stale.is_empty() {
            info!(
                "Pruning {} current records older than {}",
                scan.stale.len(),
                watermark
            );
            let items = scan
                .stale
                .into_iter()
                .map(|id| (id, Location::Current))
                .collect();
            if let Err(e) = self.worker()?.prune(items) {
                warn!("Could not queue prune: {}", e);
            }
        }

        let loaded = LoadedIds {
            current: self.ids(Partition::Current),
            saved: self.ids(Partition::Saved),
        };
        info!(
            "Loaded {} current and {} saved records",
            loaded.current.len(),
            loaded.saved.len()
        );
        Ok(loaded)
    }

    /// Look up a record
    ///
    /// `Ok(None)` when the id is not indexed in `partition` or its file cannot
    /// be read or parsed.
    pub async fn get(
        &self,
        id: &str,
        partition: Partition,
        use_cache: bool,
    ) -> Result<Option<Arc<TransactionRecord>>> {
        self.fetch(
            id,
            partition,
            FetchOptions {
                use_cache,
                cache_result: true,
            },
        )
        .await
    }

    pub async fn fetch(
        &self,
        id: &str,
        partition: Partition,
        options: FetchOptions,
    ) -> Result<Option<Arc<TransactionRecord>>> {
        self.ensure_ready()?;

        {
            let state = self.state.lock();
            if !state.contains(id, partition) {
                return Ok(None);
            }
            if options.use_cache {
                if let Some(record) = state.cached(id, partition) {
                    return Ok(Some(record));
                }
            }
        }

        let key = id.to_string();
        let loaded = self
            .run_blocking(move |files, codec| {
                read_record(files, codec, Location::from(partition), &key)
            })
            .await;

        match loaded {
            Ok(record) => {
                let record = Arc::new(record);
                if options.cache_result {
                    self.state.lock().cache_record(partition, Arc::clone(&record));
                }
                Ok(Some(record))
            }
            Err(e) => {
                recover("Fetch", id, e)?;
                Ok(None)
            }
        }
    }

    /// Register `current/<id>` written by the capture agent
    ///
    /// `Ok(false)` if the file cannot be read or parsed; nothing is indexed.
    pub async fn add(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        if let Err(e) = validate_id(id) {
            recover("Add", id, e)?;
            return Ok(false);
        }

        let key = id.to_string();
        let loaded = self
            .run_blocking(move |files, codec| read_record(files, codec, Location::Current, &key))
            .await;

        match loaded {
            Ok(record) => {
                self.state
                    .lock()
                    .register(Partition::Current, Arc::new(record), true);
                debug!("Added record {}", id);
                Ok(true)
            }
            Err(e) => {
                recover("Add", id, e)?;
                Ok(false)
            }
        }
    }

    /// Write an in-process capture into CURRENT and register it
    pub async fn add_record(&self, record: TransactionRecord) -> Result<bool> {
        self.ensure_ready()?;
        if let Err(e) = validate_id(&record.id) {
            recover("Add", &record.id, e)?;
            return Ok(false);
        }

        let bytes = match self.codec.write(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                recover("Serialize", &record.id, e)?;
                return Ok(false);
            }
        };
        let id = record.id.clone();
        let written = self
            .run_blocking(move |files, _| files.write(Location::Current, &id, &bytes))
            .await;

        match written {
            Ok(()) => {
                debug!("Added record {}", record.id);
                self.state
                    .lock()
                    .register(Partition::Current, Arc::new(record), true);
                Ok(true)
            }
            Err(e) => {
                recover("Add", &record.id, e)?;
                Ok(false)
            }
        }
    }

    /// Ingest raw record bytes under `id`, then `add` it
    pub async fn submit(&self, id: &str, bytes: Vec<u8>) -> Result<bool> {
        self.ensure_ready()?;
        if let Err(e) = validate_id(id) {
            recover("Submit", id, e)?;
            return Ok(false);
        }

        let key = id.to_string();
        let written = self
            .run_blocking(move |files, _| files.write(Location::Current, &key, &bytes))
            .await;
        if let Err(e) = written {
            recover("Submit", id, e)?;
            return Ok(false);
        }
        self.add(id).await
    }

    /// Move records between partitions
    ///
    /// Each id's index and cache entry move only after its file moved. Failed
    /// ids stay where they were and are listed in the report.
    pub async fn move_records<I>(&self, ids: I, from: Partition, to: Partition) -> Result<MoveReport>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.ensure_ready()?;

        let mut report = MoveReport::default();
        if from == to {
            return Ok(report);
        }

        for id in ids.into_iter().map(Into::<String>::into) {
            if !self.state.lock().contains(&id, from) {
                report
                    .failed
                    .push((id.clone(), StoreError::not_found(format!("{} in {}", id, from))));
                continue;
            }

            let key = id.clone();
            let moved = self
                .run_blocking(move |files, _| {
                    files.move_file(&key, Location::from(from), Location::from(to))
                })
                .await;

            match moved {
                Ok(()) => {
                    self.state.lock().relocate(&id, from, to);
                    report.moved.push(id);
                }
                Err(e) if e.kind == ErrorKind::StorageUnavailable => return Err(e),
                Err(e) => {
                    warn!("Failed to move {} from {} to {}: {}", id, from, to, e);
                    report.failed.push((id, e));
                }
            }
        }

        info!(
            "Moved {} records from {} to {} ({} failed)",
            report.moved.len(),
            from,
            to,
            report.failed.len()
        );
        Ok(report)
    }

    /// Delete records from whichever partition holds them
    ///
    /// The ids leave the index and cache immediately; the files are removed by
    /// the bulk worker. Unknown ids are reported as `NotFound` failures.
    pub fn delete<I>(&self, ids: I, sink: Option<Arc<dyn ProgressSink>>) -> Result<BatchHandle>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.ensure_ready()?;
        let worker = self.worker()?;

        let mut items = Vec::new();
        let mut unknown = Vec::new();
        {
            let mut state = self.state.lock();
            for id in ids.into_iter().map(Into::<String>::into) {
                match state.remove(&id) {
                    Some(partition) => items.push((id, Location::from(partition))),
                    None => {
                        let err = StoreError::not_found(id.clone());
                        unknown.push((id, err));
                    }
                }
            }
        }

        if items.is_empty() {
            return Ok(BatchHandle::ready(BatchReport {
                completed: Vec::new(),
                failed: unknown,
            }));
        }

        debug!("Queued deletion of {} records", items.len());
        Ok(worker.delete(items, sink)?.with_failures(unknown))
    }

    /// Delete every record of `partition`
    pub fn clear_partition(
        &self,
        partition: Partition,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<BatchHandle> {
        self.ensure_ready()?;

        let ids: Vec<String> = self.state.lock().index(partition).keys().cloned().collect();
        if ids.is_empty() {
            debug!("Nothing to clear in {}", partition);
            return Ok(BatchHandle::ready(BatchReport::default()));
        }
        info!("Clearing {} records from {}", ids.len(), partition);
        self.delete(ids, sink)
    }

    /// Wait until all bulk work queued so far has finished
    pub async fn flush(&self) -> Result<()> {
        self.ensure_ready()?;
        self.worker()?.delete(Vec::new(), None)?.wait().await?;
        Ok(())
    }

    /// Stage `record` for replay and check that its server is reachable
    pub async fn build_replay_request(
        &self,
        record: &TransactionRecord,
        status: ReplayStatus,
    ) -> Result<ReplayDescriptor> {
        self.ensure_ready()?;
        validate_id(&record.id)?;

        let bytes = self.codec.write(record)?;
        let id = record.id.clone();
        self.run_blocking(move |files, _| files.recreate(Location::Replay, &id, &bytes))
            .await?;

        let url = replay_url(record, status, self.config.callback_port);
        let host = &record.server.name;
        let port = record.server.port;
        if let Err(e) = self
            .probe
            .probe(host, port, self.config.probe_timeout())
            .await
        {
            warn!("Replay of {} rejected: {}", record.id, e);
            return Err(e);
        }

        info!("Replay of {} via {}", record.id, url);
        Ok(ReplayDescriptor {
            url,
            record_id: record.id.clone(),
            status,
            staged_path: self.files.path(Location::Replay, &record.id),
        })
    }

    /// Run `f` over the dispatch tree of a record
    pub async fn with_tree<F, R>(&self, id: &str, partition: Partition, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&TransactionNode<'_>) -> R,
    {
        let record = self.get(id, partition, true).await?;
        Ok(record.map(|record| f(&build_tree(&record))))
    }

    /// Index entries of `partition` in `order`
    pub fn summaries(&self, partition: Partition, order: SortOrder) -> Vec<RecordSummary> {
        self.state.lock().summaries(partition, order)
    }

    /// Ids of `partition` in the configured default order
    pub fn ids(&self, partition: Partition) -> Vec<String> {
        self.summaries(partition, self.config.default_order)
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    pub fn partition_of(&self, id: &str) -> Option<Partition> {
        self.state.lock().partition_of(id)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state.lock().ready {
            Ok(())
        } else {
            Err(StoreError::storage_unavailable(format!(
                "Store at {} is not initialized",
                self.config.root.display()
            )))
        }
    }

    fn worker(&self) -> Result<BulkWorker> {
        self.worker
            .lock()
            .clone()
            .ok_or_else(|| StoreError::worker("Bulk worker not started"))
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RecordFiles, &dyn RecordCodec) -> Result<T> + Send + 'static,
    {
        let files = self.files.clone();
        let codec = Arc::clone(&self.codec);
        tokio::task::spawn_blocking(move || f(&files, codec.as_ref())).await?
    }
}

/// Log a per-record failure; only `StorageUnavailable` is passed on
fn recover(action: &str, id: &str, e: StoreError) -> Result<()> {
    match e.kind {
        ErrorKind::StorageUnavailable => Err(e),
        ErrorKind::NotFound => {
            debug!("{} {}: {}", action, id, e);
            Ok(())
        }
        _ => {
            warn!("{} {} failed: {}", action, id, e);
            Ok(())
        }
    }
}

fn read_record(
    files: &RecordFiles,
    codec: &dyn RecordCodec,
    location: Location,
    id: &str,
) -> Result<TransactionRecord> {
    let bytes = files.read(location, id)?;
    let record = codec.parse(&bytes)?;
    if record.id != id {
        return Err(StoreError::malformed(
            id,
            format!("file holds record {}", record.id),
        ));
    }
    Ok(record)
}

fn scan_partitions(
    files: &RecordFiles,
    codec: &dyn RecordCodec,
    watermark: DateTime<Utc>,
) -> Result<Scan> {
    let mut scan = Scan {
        loaded: Vec::new(),
        stale: Vec::new(),
    };

    for partition in Partition::ALL {
        for file in files.list(Location::from(partition))? {
            if partition == Partition::Current && file.modified < watermark {
                scan.stale.push(file.id);
                continue;
            }
            match read_record(files, codec, Location::from(partition), &file.id) {
                Ok(record) => scan.loaded.push((partition, record)),
                Err(e) => warn!("Skipping {} record {}: {}", partition, file.id, e),
            }
        }
    }
    Ok(scan)
}

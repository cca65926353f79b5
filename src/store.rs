use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::{Entity, Period, Record};
use crate::wal::Wal;

#[derive(Debug)]
pub enum StoreError {
    Wal(String),
    Closed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::Closed => write!(f, "WAL writer shut down"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Row-store contract the engine reads rules and overrides through.
///
/// Query results are ordered by period start, then id.
#[async_trait]
pub trait Store<T: Entity>: Send + Sync {
    async fn find_by_id(&self, id: Ulid) -> Result<Option<T>, StoreError>;

    async fn find_all(&self) -> Result<Vec<T>, StoreError>;

    async fn find_by_status(&self, status: T::Status) -> Result<Vec<T>, StoreError>;

    /// Every entity, in any status, whose period overlaps `period`.
    async fn find_overlapping_period(
        &self,
        period: Period,
        exclude: Option<Ulid>,
    ) -> Result<Vec<T>, StoreError>;

    async fn find_all_non_archived(&self, exclude: Option<Ulid>) -> Result<Vec<T>, StoreError>;

    /// ACTIVE entities whose period ended strictly before `now`.
    async fn find_active_ending_before(&self, now: DateTime<Utc>) -> Result<Vec<T>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Insert or replace by id.
    async fn save(&self, entity: T) -> Result<(), StoreError>;

    /// Returns false if nothing had that id.
    async fn delete_by_id(&self, id: Ulid) -> Result<bool, StoreError>;
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand<T> {
    Append {
        record: Record<T>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record<T>>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend<T> = (Record<T>, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Drains every append already queued, commits them with one
/// fsync, then answers all senders.
async fn wal_writer_loop<T: Entity>(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand<T>>) {
    while let Some(cmd) = rx.recv().await {
        let (record, response) = match cmd {
            WalCommand::Append { record, response } => (record, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend<T>> = vec![(record, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let result = flush_batch(&mut wal, &batch);
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch<T: Entity>(wal: &mut Wal, batch: &[PendingAppend<T>]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(record, _)| wal.append_buffered(record));
    // Flush even after a failed append so stale buffered bytes don't leak into
    // the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append<T: Entity>(wal: &mut Wal, cmd: WalCommand<T>) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// DashMap-backed store. Durable when opened on a WAL path, volatile otherwise.
pub struct InMemoryStore<T: Entity> {
    records: DashMap<Ulid, T>,
    wal_tx: Option<mpsc::Sender<WalCommand<T>>>,
    /// Writers share it; compaction takes it exclusively so its snapshot never
    /// misses a record already committed to the log.
    commit_lock: RwLock<()>,
}

impl<T: Entity> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> InMemoryStore<T> {
    /// Volatile store with no log.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            wal_tx: None,
            commit_lock: RwLock::new(()),
        }
    }

    /// Replay `path` and spawn its writer task. Must be called inside a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let replayed = Wal::replay::<T>(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let records = DashMap::new();
        for record in replayed {
            match record {
                Record::Saved(entity) => {
                    records.insert(entity.id(), entity);
                }
                Record::Deleted(id) => {
                    records.remove(&id);
                }
            }
        }
        tracing::info!("{} store {}: {} records loaded", T::KIND, path.display(), records.len());

        Ok(Self {
            records,
            wal_tx: Some(wal_tx),
            commit_lock: RwLock::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    async fn wal_append(&self, record: Record<T>) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append { record, response: tx })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await
            .map_err(|_| StoreError::Closed)?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the log with one `Saved` record per live entity.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _exclusive = self.commit_lock.write().await;
        let records: Vec<Record<T>> = self
            .sorted(|_| true)
            .into_iter()
            .map(Record::Saved)
            .collect();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await
            .map_err(|_| StoreError::Closed)?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    fn sorted(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        let mut out: Vec<T> = self
            .records
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            a.period()
                .start
                .cmp(&b.period().start)
                .then_with(|| a.id().cmp(&b.id()))
        });
        out
    }
}

#[async_trait]
impl<T: Entity> Store<T> for InMemoryStore<T> {
    async fn find_by_id(&self, id: Ulid) -> Result<Option<T>, StoreError> {
        Ok(self.records.get(&id).map(|e| e.value().clone()))
    }

    async fn find_all(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.sorted(|_| true))
    }

    async fn find_by_status(&self, status: T::Status) -> Result<Vec<T>, StoreError> {
        Ok(self.sorted(|e| e.status() == status))
    }

    async fn find_overlapping_period(
        &self,
        period: Period,
        exclude: Option<Ulid>,
    ) -> Result<Vec<T>, StoreError> {
        Ok(self.sorted(|e| Some(e.id()) != exclude && e.period().overlaps(&period)))
    }

    async fn find_all_non_archived(&self, exclude: Option<Ulid>) -> Result<Vec<T>, StoreError> {
        Ok(self.sorted(|e| Some(e.id()) != exclude && !e.is_archived()))
    }

    async fn find_active_ending_before(&self, now: DateTime<Utc>) -> Result<Vec<T>, StoreError> {
        Ok(self.sorted(|e| e.is_active() && e.period().end < now))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }

    async fn save(&self, entity: T) -> Result<(), StoreError> {
        let _shared = self.commit_lock.read().await;
        self.wal_append(Record::Saved(entity.clone())).await?;
        self.records.insert(entity.id(), entity);
        Ok(())
    }

    async fn delete_by_id(&self, id: Ulid) -> Result<bool, StoreError> {
        let _shared = self.commit_lock.read().await;
        if !self.records.contains_key(&id) {
            return Ok(false);
        }
        self.wal_append(Record::Deleted(id)).await?;
        Ok(self.records.remove(&id).is_some())
    }
}

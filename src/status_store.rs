//! Shared job status storage
//!
//! Job snapshots live in a [`StatusCache`], keyed by [`JobId`]. The cache may be shared
//! between processes, which is why every write replaces the whole snapshot: a poll from
//! any process sees the same record no matter which process wrote it.
//!
//! - [`MemoryStatusCache`] is the in-process backend, with per-entry TTL and a size cap
//! - [`StatusStore`] adds transition checks, serialized read-modify-write within one
//!   process, and a [`Event::StatusChanged`] broadcast after every write
//!
//! Across processes sharing one cache, concurrent writers to the same key remain
//! last-write-wins.

use crate::error::{Error, Result};
use crate::types::{Event, JobId, JobStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};

/// Key-value backend for job snapshots
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Fetch the snapshot, `None` when missing or expired
    async fn get(&self, id: &JobId) -> Result<Option<JobStatus>>;

    /// Store the snapshot, replacing any previous one and restarting its TTL
    async fn put(&self, status: JobStatus) -> Result<()>;

    /// Whether a live snapshot exists
    async fn contains(&self, id: &JobId) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Drop the snapshot; returns whether one existed
    async fn remove(&self, id: &JobId) -> Result<bool>;
}

struct CacheEntry {
    value: JobStatus,
    inserted: Instant,
}

impl CacheEntry {
    fn new(value: JobStatus) -> Self {
        Self {
            value,
            inserted: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() > ttl
    }
}

/// In-memory [`StatusCache`] with per-entry TTL
///
/// When full, expired entries are evicted first, then the oldest entry.
pub struct MemoryStatusCache {
    entries: RwLock<HashMap<JobId, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryStatusCache {
    /// Create an empty cache
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StatusCache for MemoryStatusCache {
    async fn get(&self, id: &JobId) -> Result<Option<JobStatus>> {
        let map = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(map
            .get(id)
            .filter(|e| !e.is_expired(self.ttl))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, status: JobStatus) -> Result<()> {
        let mut map = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !map.contains_key(&status.id) && map.len() >= self.max_entries {
            map.retain(|_, entry| !entry.is_expired(self.ttl));
            if map.len() >= self.max_entries {
                let oldest = map
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    tracing::debug!(job_id = %oldest, "status cache full, evicting oldest entry");
                    map.remove(&oldest);
                }
            }
        }
        map.insert(status.id.clone(), CacheEntry::new(status));
        Ok(())
    }

    async fn remove(&self, id: &JobId) -> Result<bool> {
        let mut map = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(map.remove(id).is_some())
    }
}

/// Status Store facade over a [`StatusCache`]
#[derive(Clone)]
pub struct StatusStore {
    cache: Arc<dyn StatusCache>,
    event_tx: broadcast::Sender<Event>,
    // serializes read-modify-write within this process
    write_lock: Arc<Mutex<()>>,
}

impl StatusStore {
    /// Wrap a cache; every write is announced on `event_tx`
    pub fn new(cache: Arc<dyn StatusCache>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            cache,
            event_tx,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Subscribe to status events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Latest snapshot, or [`Error::JobNotFound`] when the id is unknown or expired
    pub async fn get(&self, id: &JobId) -> Result<JobStatus> {
        self.cache
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound { id: id.clone() })
    }

    /// Whether a snapshot exists for the id
    pub async fn contains(&self, id: &JobId) -> Result<bool> {
        self.cache.contains(id).await
    }

    /// Replace the snapshot for `status.id`
    ///
    /// Rejected with [`Error::InvalidTransition`] when the stored state cannot move to
    /// the new one. Writing a job that does not exist yet creates it.
    pub async fn set(&self, status: JobStatus) -> Result<JobStatus> {
        let _guard = self.write_lock.lock().await;
        if let Some(current) = self.cache.get(&status.id).await? {
            check_transition(&current, &status)?;
        }
        self.write(status).await
    }

    /// Read the latest snapshot, apply `f` to a copy and write it back
    ///
    /// Nothing is written (and no event is sent) when `f` leaves the snapshot unchanged.
    pub async fn update<F>(&self, id: &JobId, f: F) -> Result<JobStatus>
    where
        F: FnOnce(&mut JobStatus) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let current = self
            .cache
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound { id: id.clone() })?;

        let mut next = current.clone();
        f(&mut next);
        if next == current {
            return Ok(current);
        }
        check_transition(&current, &next)?;
        self.write(next).await
    }

    /// Flip the canceled flag of a non-terminal job
    ///
    /// Terminal jobs are returned unchanged.
    pub async fn request_cancel(&self, id: &JobId) -> Result<JobStatus> {
        self.update(id, |status| {
            if !status.is_terminal() {
                status.canceled = true;
            }
        })
        .await
    }

    /// Whether cancellation was requested for the job
    ///
    /// A missing snapshot or a cache error counts as "not requested".
    pub async fn is_cancel_requested(&self, id: &JobId) -> bool {
        match self.cache.get(id).await {
            Ok(Some(status)) => status.canceled,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "status cache read failed during cancel check");
                false
            }
        }
    }

    async fn write(&self, mut status: JobStatus) -> Result<JobStatus> {
        status.updated_at = Utc::now();
        self.cache.put(status.clone()).await?;
        self.event_tx
            .send(Event::StatusChanged {
                status: status.clone(),
            })
            .ok();
        Ok(status)
    }
}

fn check_transition(current: &JobStatus, next: &JobStatus) -> Result<()> {
    if current.state.can_transition_to(next.state) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            id: current.id.clone(),
            from: current.state,
            to: next.state,
        })
    }
}

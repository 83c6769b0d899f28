//! Sighting storage seen from the ingestion pipeline.
//!
//! The pipeline only needs a handful of row-level operations; nothing here
//! promises isolation across calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tigerhall_common::{Sighting, TigerLastSeen};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait SightingRepository: Send + Sync {
    /// Most recent sighting of a tiger by timestamp. `None` when it has never been seen.
    async fn last_sighting(&self, tiger_id: i64) -> Result<Option<Sighting>>;

    /// Move the tiger's last-known position.
    async fn update_last_seen(
        &self,
        tiger_id: i64,
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
    ) -> Result<()>;

    /// Store a sighting and return it with its assigned id.
    async fn save_sighting(&self, sighting: Sighting) -> Result<Sighting>;

    /// Distinct users that have reported this tiger.
    async fn list_observers(&self, tiger_id: i64) -> Result<BTreeSet<i64>>;

    /// One page of a tiger's sightings, newest first.
    async fn list_sightings(&self, tiger_id: i64, limit: usize, offset: usize) -> Result<Vec<Sighting>>;

    async fn tiger_last_seen(&self, tiger_id: i64) -> Result<Option<TigerLastSeen>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Store {
    next_id: i64,
    /// Sightings grouped by tiger, in insertion order
    sightings: BTreeMap<i64, Vec<Sighting>>,
    tigers: BTreeMap<i64, TigerLastSeen>,
}

impl Store {
    fn of_tiger(&self, tiger_id: i64) -> &[Sighting] {
        self.sightings.get(&tiger_id).map(Vec::as_slice).unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.sightings.values().map(Vec::len).sum()
    }
}

/// In-process repository with an optional JSON snapshot on disk.
///
/// Reads only touch the sightings of the requested tiger. Without a snapshot
/// mutations are applied in place. With one, each mutation is applied to a
/// copy, the whole snapshot is rewritten, and only then is the copy made
/// visible, so a failed write leaves memory and disk in agreement. That makes
/// every write O(total sightings); the snapshot suits development and small
/// deployments, not large histories.
pub struct MemoryRepository {
    store: RwLock<Store>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryRepository {
    /// Volatile repository, nothing touches the disk.
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store::default()),
            snapshot_path: None,
        }
    }

    /// Repository backed by a snapshot file, loading it when present.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let store = if fs::try_exists(&path).await.unwrap_or(false) {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read snapshot {:?}", path))?;
            let store: Store = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse snapshot {:?}", path))?;
            info!(
                "Loaded {} sightings for {} tigers from {:?}",
                store.len(),
                store.tigers.len(),
                path
            );
            store
        } else {
            debug!("Snapshot {:?} does not exist, starting empty", path);
            Store::default()
        };

        Ok(Self {
            store: RwLock::new(store),
            snapshot_path: Some(path),
        })
    }

    async fn persist(path: &Path, store: &Store) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create snapshot directory {:?}", parent))?;
        }

        let content = serde_json::to_string(store).context("Failed to serialize snapshot")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write snapshot {:?}", tmp))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace snapshot {:?}", path))?;
        Ok(())
    }

    async fn mutate<T>(&self, apply: impl FnOnce(&mut Store) -> T) -> Result<T> {
        let mut guard = self.store.write().await;
        let Some(path) = &self.snapshot_path else {
            return Ok(apply(&mut *guard));
        };

        let mut next = guard.clone();
        let out = apply(&mut next);
        Self::persist(path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(a: &Sighting, b: &Sighting) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
}

#[async_trait]
impl SightingRepository for MemoryRepository {
    async fn last_sighting(&self, tiger_id: i64) -> Result<Option<Sighting>> {
        let store = self.store.read().await;
        Ok(store
            .of_tiger(tiger_id)
            .iter()
            .min_by(|a, b| newest_first(a, b))
            .cloned())
    }

    async fn update_last_seen(
        &self,
        tiger_id: i64,
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
    ) -> Result<()> {
        self.mutate(|store| {
            store
                .tigers
                .insert(tiger_id, TigerLastSeen { timestamp, lat, lon });
        })
        .await
    }

    async fn save_sighting(&self, mut sighting: Sighting) -> Result<Sighting> {
        self.mutate(|store| {
            store.next_id += 1;
            sighting.id = store.next_id;
            store
                .sightings
                .entry(sighting.tiger_id)
                .or_default()
                .push(sighting.clone());
            sighting
        })
        .await
    }

    async fn list_observers(&self, tiger_id: i64) -> Result<BTreeSet<i64>> {
        let store = self.store.read().await;
        Ok(store.of_tiger(tiger_id).iter().map(|s| s.user_id).collect())
    }

    async fn list_sightings(&self, tiger_id: i64, limit: usize, offset: usize) -> Result<Vec<Sighting>> {
        let store = self.store.read().await;
        let mut sightings = store.of_tiger(tiger_id).to_vec();
        sightings.sort_by(newest_first);
        Ok(sightings.into_iter().skip(offset).take(limit).collect())
    }

    async fn tiger_last_seen(&self, tiger_id: i64) -> Result<Option<TigerLastSeen>> {
        Ok(self.store.read().await.tigers.get(&tiger_id).copied())
    }
}

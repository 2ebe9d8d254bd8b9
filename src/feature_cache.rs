use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::features::{FeatureConfig, FeatureTable};
use crate::match_data::MatchRecord;

pub const CACHE_SCHEMA_VERSION: u32 = 1;
const CACHE_FILE: &str = "features.json";

/// Identity of a feature table: computation version, feature configuration and
/// the content of every match row that can influence a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    feature_version: String,
    fingerprint: String,
    row_count: usize,
    max_kickoff_unix: Option<i64>,
}

impl CacheKey {
    pub fn for_dataset(feature_version: &str, cfg: &FeatureConfig, matches: &[MatchRecord]) -> Self {
        let mut ordered: Vec<&MatchRecord> = matches.iter().collect();
        ordered.sort_by_key(|m| m.chrono_key());

        let mut hasher = Sha256::new();
        hasher.update(feature_version.as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::to_vec(cfg).unwrap_or_default());
        hasher.update((matches.len() as u64).to_le_bytes());
        let max_kickoff_unix = ordered.last().map(|m| m.kickoff_unix);
        hasher.update(max_kickoff_unix.unwrap_or(i64::MIN).to_le_bytes());
        for m in ordered {
            hasher.update(row_digest(m));
        }

        Self {
            feature_version: feature_version.to_string(),
            fingerprint: hex(&hasher.finalize()),
            row_count: matches.len(),
            max_kickoff_unix,
        }
    }

    pub fn feature_version(&self) -> &str {
        &self.feature_version
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn max_kickoff_unix(&self) -> Option<i64> {
        self.max_kickoff_unix
    }
}

fn row_digest(m: &MatchRecord) -> Vec<u8> {
    let mut hasher = Sha256::new();
    // Team names do not feed any feature.
    let row = (
        m.match_id,
        m.league_id,
        m.season_id,
        m.kickoff_unix,
        m.home_team_id,
        m.away_team_id,
        &m.score,
        &m.stats,
        &m.prematch,
        &m.odds,
    );
    hasher.update(serde_json::to_vec(&row).unwrap_or_default());
    hasher.finalize().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub schema_version: u32,
    pub feature_version: String,
    pub fingerprint: String,
    pub row_count: usize,
    pub max_kickoff_unix: Option<i64>,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFeatures {
    pub metadata: CacheMetadata,
    pub table: FeatureTable,
}

impl CachedFeatures {
    fn new(key: &CacheKey, table: FeatureTable) -> Self {
        Self {
            metadata: CacheMetadata {
                schema_version: CACHE_SCHEMA_VERSION,
                feature_version: key.feature_version.clone(),
                fingerprint: key.fingerprint.clone(),
                row_count: key.row_count,
                max_kickoff_unix: key.max_kickoff_unix,
                generated_at: chrono::Utc::now().timestamp(),
            },
            table,
        }
    }

    // None when the entry is valid for `key`.
    fn mismatch(&self, key: &CacheKey) -> Option<CacheMiss> {
        let meta = &self.metadata;
        if meta.schema_version != CACHE_SCHEMA_VERSION
            || meta.feature_version != key.feature_version
            || self.table.version != key.feature_version
        {
            return Some(CacheMiss::VersionChanged);
        }
        if meta.fingerprint != key.fingerprint {
            return Some(CacheMiss::FingerprintChanged);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheMiss {
    Empty,
    VersionChanged,
    FingerprintChanged,
    Unreadable,
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
    Hit,
    Regenerated(CacheMiss),
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: Arc<CachedFeatures>,
    pub status: CacheStatus,
}

impl CacheLookup {
    pub fn table(&self) -> &FeatureTable {
        &self.entry.table
    }
}

enum DiskState {
    Missing,
    Unreadable,
    Loaded(CachedFeatures),
}

/// Memoized feature table. Readers see either the previous or the new entry,
/// never a partial one; recomputation is serialized through `writer`.
pub struct FeatureCache {
    path: Option<PathBuf>,
    snapshot: RwLock<Option<Arc<CachedFeatures>>>,
    writer: Mutex<()>,
}

impl FeatureCache {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            snapshot: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: Some(dir.as_ref().join(CACHE_FILE)),
            snapshot: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn current(&self) -> Option<Arc<CachedFeatures>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn hit(&self, key: &CacheKey) -> Option<Arc<CachedFeatures>> {
        self.current().filter(|entry| entry.mismatch(key).is_none())
    }

    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<FeatureTable, EngineError>,
    {
        if let Some(entry) = self.hit(key) {
            return Ok(CacheLookup {
                entry,
                status: CacheStatus::Hit,
            });
        }

        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another writer may have published while we waited.
        if let Some(entry) = self.hit(key) {
            return Ok(CacheLookup {
                entry,
                status: CacheStatus::Hit,
            });
        }

        let miss = match self.load_disk() {
            DiskState::Loaded(entry) => match entry.mismatch(key) {
                None => {
                    let entry = Arc::new(entry);
                    self.publish(entry.clone());
                    info!(fingerprint = %short(key.fingerprint()), "feature cache hit on disk");
                    return Ok(CacheLookup {
                        entry,
                        status: CacheStatus::Hit,
                    });
                }
                Some(miss) => miss,
            },
            DiskState::Unreadable => CacheMiss::Unreadable,
            DiskState::Missing => match self.current() {
                Some(entry) => entry.mismatch(key).unwrap_or(CacheMiss::Empty),
                None => CacheMiss::Empty,
            },
        };

        self.regenerate(key, miss, compute)
    }

    pub fn force_regenerate<F>(&self, key: &CacheKey, compute: F) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<FeatureTable, EngineError>,
    {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.regenerate(key, CacheMiss::Forced, compute)
    }

    pub fn invalidate(&self) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("remove {}", path.display()));
                }
            }
        }
        info!("feature cache invalidated");
        Ok(())
    }

    // Caller holds the writer lock.
    fn regenerate<F>(&self, key: &CacheKey, miss: CacheMiss, compute: F) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<FeatureTable, EngineError>,
    {
        info!(
            reason = ?miss,
            fingerprint = %short(key.fingerprint()),
            rows = key.row_count(),
            "regenerating feature table"
        );
        // A cancelled or failed compute leaves the previous entry untouched.
        let table = compute()?;
        let entry = Arc::new(CachedFeatures::new(key, table));
        if let Err(err) = self.persist(&entry) {
            warn!(error = %err, "feature cache not persisted; keeping in memory only");
        }
        self.publish(entry.clone());
        Ok(CacheLookup {
            entry,
            status: CacheStatus::Regenerated(miss),
        })
    }

    fn publish(&self, entry: Arc<CachedFeatures>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(entry);
    }

    fn load_disk(&self) -> DiskState {
        let Some(path) = &self.path else {
            return DiskState::Missing;
        };
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return DiskState::Missing,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "feature cache unreadable");
                return DiskState::Unreadable;
            }
        };
        match serde_json::from_str::<CachedFeatures>(&raw) {
            Ok(entry) => DiskState::Loaded(entry),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "feature cache corrupt");
                DiskState::Unreadable
            }
        }
    }

    fn persist(&self, entry: &CachedFeatures) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(entry).context("serialize feature cache")?;
        fs::write(&tmp, json).context("write feature cache")?;
        fs::rename(&tmp, path).context("swap feature cache")?;
        Ok(())
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

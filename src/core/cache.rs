// src/core/cache.rs

//! Persistent script cache.
//!
//! Two tables serialized as one lz4-compressed bincode blob: a revision
//! table (four environment keys that globally invalidate the cache) and a
//! path-keyed entry table holding serialized scripts fingerprinted by
//! `(last write time UTC, file size)`. Readers take a `CachePool` snapshot;
//! a single decode failure flips the pool invalid so the load falls back to
//! parsing from source.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use thiserror::Error;

use rayon::prelude::*;

use crate::constants;
use crate::core::script::{Script, ScriptType};
use crate::models::path_key;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("cache decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("cache blob is corrupted: {0}")]
    Corrupt(#[from] lz4_flex::block::DecompressError),
}

const REV_ENGINE_VERSION: &str = "EngineVersion";
const REV_BASE_DIR: &str = "BaseDir";
const REV_CACHE_REVISION: &str = "CacheRevision";
const REV_ASTERISK_BUG_DIR_LINK: &str = "AsteriskBugDirLink";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheEntry {
    pub real_path: String,
    pub last_write_utc: SystemTime,
    pub file_size: u64,
    pub serialized: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct CacheDb {
    revisions: HashMap<String, String>,
    /// Keyed by lowercased real path.
    entries: HashMap<String, CacheEntry>,
}

/// Which tables `clear_table` wipes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearTableOptions {
    pub revisions: bool,
    pub entries: bool,
}

pub struct ScriptCache {
    path: PathBuf,
    db: Mutex<CacheDb>,
    /// Outstanding users. `wait_close` spins until this drops to zero.
    refs: AtomicUsize,
}

impl ScriptCache {
    /// Opens (or creates) the cache at `path`. A corrupt blob is discarded
    /// with a warning; the cache then starts empty.
    pub fn new(path: &Path) -> Result<Self, CacheError> {
        let db = if path.is_file() {
            match Self::read_db(path) {
                Ok(db) => db,
                Err(e) => {
                    log::warn!("discarding corrupt cache [{}]: {e}", path.display());
                    CacheDb::default()
                }
            }
        } else {
            CacheDb::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            db: Mutex::new(db),
            refs: AtomicUsize::new(0),
        })
    }

    fn read_db(path: &Path) -> Result<CacheDb, CacheError> {
        let compressed = fs::read(path)?;
        let bytes = lz4_flex::decompress_size_prepended(&compressed)?;
        let (db, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(db)
    }

    /// Writes the whole database back to disk. Rewriting the blob is also
    /// the compaction step: dropped entries stop occupying space.
    pub fn flush(&self) -> Result<(), CacheError> {
        let bytes = {
            let db = self.lock_db();
            bincode::serde::encode_to_vec(&*db, bincode::config::standard())?
        };
        let compressed = lz4_flex::compress_prepend_size(&bytes);
        fs::write(&self.path, compressed)?;
        Ok(())
    }

    fn lock_db(&self) -> std::sync::MutexGuard<'_, CacheDb> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- REFERENCE COUNTING ---

    pub fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "cache released more times than acquired");
    }

    /// Blocks until every user released the cache, then flushes it.
    pub fn wait_close(&self) -> Result<(), CacheError> {
        while self.refs.load(Ordering::SeqCst) != 0 {
            std::thread::sleep(Duration::from_millis(200));
        }
        self.flush()
    }

    // --- REVISION TABLE ---

    /// Stamps the four environment keys the cache is only valid under.
    pub fn save_cache_revision(&self, base_dir: &Path, asterisk_bug_summary: &str) {
        let mut db = self.lock_db();
        db.revisions.insert(
            REV_ENGINE_VERSION.to_string(),
            constants::ENGINE_VERSION.to_string(),
        );
        db.revisions.insert(
            REV_BASE_DIR.to_string(),
            base_dir.to_string_lossy().into_owned(),
        );
        db.revisions.insert(
            REV_CACHE_REVISION.to_string(),
            constants::CACHE_REVISION.to_string(),
        );
        db.revisions.insert(
            REV_ASTERISK_BUG_DIR_LINK.to_string(),
            asterisk_bug_summary.to_string(),
        );
    }

    /// True when all four keys match the current environment. Any mismatch
    /// (or an unstamped cache) means every entry must be ignored.
    pub fn check_cache_revision(&self, base_dir: &Path, asterisk_bug_summary: &str) -> bool {
        let db = self.lock_db();
        let matches = |key: &str, expected: &str| {
            db.revisions.get(key).is_some_and(|v| v == expected)
        };
        matches(REV_ENGINE_VERSION, constants::ENGINE_VERSION)
            && matches(REV_BASE_DIR, &base_dir.to_string_lossy())
            && matches(REV_CACHE_REVISION, constants::CACHE_REVISION)
            && matches(REV_ASTERISK_BUG_DIR_LINK, asterisk_bug_summary)
    }

    // --- POOL (read snapshot) ---

    pub fn load_cache_pool(&self) -> CachePool {
        CachePool {
            entries: self.lock_db().entries.clone(),
            valid: AtomicBool::new(true),
        }
    }

    // --- BULK UPSERT ---

    /// Serializes every changed script into the cache, in parallel, then
    /// commits all updates in one bulk insert and flushes. Returns
    /// `(updated, total)` counts.
    pub fn cache_scripts(&self, scripts: &[&Script]) -> Result<(usize, usize), CacheError> {
        let pool = self.load_cache_pool();
        let updates: Mutex<Vec<CacheEntry>> = Mutex::new(Vec::new());
        let updated = AtomicUsize::new(0);

        scripts.par_iter().for_each(|sc| {
            if let Err(e) = Self::serialize_script(sc, &pool, &updates, &updated) {
                log::warn!("unable to cache [{}]: {e}", sc.real_path().display());
            }
        });

        let updates = updates
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        {
            let mut db = self.lock_db();
            for entry in updates {
                db.entries.insert(entry.real_path.to_lowercase(), entry);
            }
        }
        self.flush()?;
        Ok((updated.load(Ordering::SeqCst), scripts.len()))
    }

    fn serialize_script(
        sc: &Script,
        pool: &CachePool,
        updates: &Mutex<Vec<CacheEntry>>,
        updated: &AtomicUsize,
    ) -> Result<(), CacheError> {
        if sc.script_type() == ScriptType::Directory {
            return Ok(());
        }
        let metadata = fs::metadata(sc.real_path())?;
        let last_write_utc = metadata.modified()?;
        let file_size = metadata.len();
        let key = path_key(sc.real_path());

        let unchanged = pool
            .entries
            .get(&key)
            .is_some_and(|e| e.last_write_utc == last_write_utc && e.file_size == file_size);
        if !unchanged {
            let serialized =
                bincode::serde::encode_to_vec(sc, bincode::config::standard())?;
            updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(CacheEntry {
                    real_path: sc.real_path().to_string_lossy().into_owned(),
                    last_write_utc,
                    file_size,
                    serialized,
                });
            updated.fetch_add(1, Ordering::SeqCst);
        }

        // A link's resolved target is a script of its own; cache it too.
        if let Some(target) = sc.link_target() {
            Self::serialize_script(target, pool, updates, updated)?;
        }
        Ok(())
    }

    /// Wipes the selected tables and compacts the blob.
    pub fn clear_table(&self, options: ClearTableOptions) -> Result<(), CacheError> {
        {
            let mut db = self.lock_db();
            if options.revisions {
                db.revisions.clear();
            }
            if options.entries {
                db.entries.clear();
            }
        }
        self.flush()
    }

    pub fn entry_count(&self) -> usize {
        self.lock_db().entries.len()
    }
}

/// An immutable snapshot of the entry table, shared across loader threads.
pub struct CachePool {
    entries: HashMap<String, CacheEntry>,
    /// Flips false on the first decode failure; every later lookup misses so
    /// the loader falls back to source parsing.
    valid: AtomicBool,
}

impl CachePool {
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Returns the cached script for `real_path` when the fingerprint still
    /// matches, or `None` for a miss. A decode failure invalidates the pool.
    pub fn deserialize_script(&self, real_path: &Path) -> Option<Script> {
        if !self.is_valid() {
            return None;
        }
        let entry = self.entries.get(&path_key(real_path))?;
        let metadata = fs::metadata(real_path).ok()?;
        let last_write_utc = metadata.modified().ok()?;
        if entry.last_write_utc != last_write_utc || entry.file_size != metadata.len() {
            return None;
        }
        match bincode::serde::decode_from_slice::<Script, _>(
            &entry.serialized,
            bincode::config::standard(),
        ) {
            Ok((script, _)) => Some(script),
            Err(e) => {
                log::warn!(
                    "cache entry for [{}] failed to decode, invalidating pool: {e}",
                    real_path.display()
                );
                self.valid.store(false, Ordering::SeqCst);
                None
            }
        }
    }
}

//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache entries in a
//! memory-mapped file that survives process restarts.
//!
//! # Value Format
//!
//! `[expires_at: 8 bytes, i64 LE unix millis][value: UTF-8]`
//!
//! Expiry is wall-clock time because entries outlive the process. Expired
//! entries are reported as misses and evicted on the read that finds them;
//! [`LmdbCacheBackend::purge_expired`] sweeps the rest.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, writes and
//! evictions use write transactions, and hit/miss counters are atomics.
//! No transaction is held across an await point.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use warehouse_core::CacheError;

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheStats};
use crate::context::OpContext;

const EXPIRY_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes are not a valid entry.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Result of looking a key up in LMDB.
enum Lookup {
    Live(String),
    Expired,
    Absent,
}

/// Persistent [`CacheBackend`] over LMDB.
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| LmdbCacheError::EnvOpen(format!("map size of {max_size_mb} MB overflows")))?;

        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process
        // and never reopened while a handle is alive.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn encode(value: &str, ttl: Duration) -> Vec<u8> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let mut bytes = Vec::with_capacity(EXPIRY_LEN + value.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(value.as_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<(i64, &str), LmdbCacheError> {
        if bytes.len() < EXPIRY_LEN {
            return Err(LmdbCacheError::Corrupt(format!(
                "entry is {} bytes, shorter than its expiry header",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(EXPIRY_LEN);
        let mut expiry = [0u8; EXPIRY_LEN];
        expiry.copy_from_slice(header);
        let value =
            std::str::from_utf8(body).map_err(|e| LmdbCacheError::Corrupt(e.to_string()))?;
        Ok((i64::from_le_bytes(expiry), value))
    }

    fn lookup(&self, key: &CacheKey) -> Result<Lookup, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? else {
            return Ok(Lookup::Absent);
        };
        let (expires_at, value) = Self::decode(bytes)?;
        if expires_at <= Utc::now().timestamp_millis() {
            Ok(Lookup::Expired)
        } else {
            Ok(Lookup::Live(value.to_string()))
        }
    }

    fn put(&self, key: &CacheKey, value: &str, ttl: Duration) -> Result<(), LmdbCacheError> {
        let bytes = Self::encode(value, ttl);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    /// Number of stored entries, expired-but-unevicted included.
    pub fn len(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.db.len(&rtxn).map_err(txn_err)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbCacheError> {
        Ok(self.len()? == 0)
    }

    /// Delete every expired or unreadable entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();
        let doomed: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let mut doomed = Vec::new();
            for entry in self.db.iter(&rtxn).map_err(txn_err)? {
                let (key, bytes) = entry.map_err(txn_err)?;
                match Self::decode(bytes) {
                    Ok((expires_at, _)) if expires_at > now => {}
                    _ => doomed.push(key.to_vec()),
                }
            }
            doomed
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &doomed {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, ctx: &OpContext, key: &CacheKey) -> Result<Option<String>, CacheError> {
        ctx.check()?;
        match self.lookup(key)? {
            Lookup::Live(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Lookup::Expired => {
                self.remove(key)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Lookup::Absent => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        ctx: &OpContext,
        key: &CacheKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        ctx.check()?;
        self.put(key, &value, ttl)?;
        Ok(())
    }

    async fn del(&self, ctx: &OpContext, key: &CacheKey) -> Result<(), CacheError> {
        ctx.check()?;
        self.remove(key)?;
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: 0,
            entry_count: self.len()?,
        })
    }
}

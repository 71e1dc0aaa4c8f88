//! Ordered key-value storage backing the address index.

use crate::interrupt::Interrupt;
use crate::Result;
use parking_lot::RwLock;
use rocksdb::{Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;

/// Storage engine selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum BackendType {
    /// Volatile, for tests and one-shot tools.
    InMem,
    /// Persistent RocksDB database.
    #[default]
    RocksDb,
}

/// One mutation of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

pub enum Backend {
    InMem(InMemBackend),
    RocksDb(RocksDbBackend),
}

impl Backend {
    pub fn in_mem() -> Self {
        Self::InMem(InMemBackend::new())
    }

    pub fn open_rocksdb(path: &Path, cache_size: usize) -> Result<Self> {
        RocksDbBackend::open(path, cache_size).map(Self::RocksDb)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            Self::InMem(backend) => Ok(backend.get(key)),
            Self::RocksDb(backend) => backend.get(key),
        }
    }

    /// Applies all `ops` in order, atomically.
    pub fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        match self {
            Self::InMem(backend) => {
                backend.write_batch(ops);
                Ok(())
            }
            Self::RocksDb(backend) => backend.write_batch(ops),
        }
    }

    /// Visits the entries whose key starts with `prefix` in key order until `visit` breaks.
    ///
    /// The walk observes a consistent view: a batch committed concurrently is either
    /// entirely visible or not at all.
    pub fn scan_prefix<F>(&self, prefix: &[u8], interrupt: &Interrupt, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    {
        match self {
            Self::InMem(backend) => backend.scan_prefix(prefix, interrupt, visit),
            Self::RocksDb(backend) => backend.scan_prefix(prefix, interrupt, visit),
        }
    }
}

#[derive(Default)]
pub struct InMemBackend {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    fn write_batch(&self, ops: Vec<BatchOp>) {
        let mut entries = self.entries.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
    }

    fn scan_prefix<F>(&self, prefix: &[u8], interrupt: &Interrupt, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    {
        // Holding the read guard for the whole walk keeps writers out.
        let entries = self.entries.read();
        for (key, value) in entries.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            interrupt.check()?;
            if visit(key, value)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

pub struct RocksDbBackend {
    db: DB,
}

impl RocksDbBackend {
    fn open(path: &Path, cache_size: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.set_write_buffer_size(cache_size.max(4 * 1024 * 1024));
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Point lookups of best block and unspent keys benefit from bloom filters.
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        db_opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&db_opts, path)?;

        tracing::info!(path = %path.display(), "Opened address index database");

        Ok(Self { db })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.put(key, value),
                BatchOp::Delete { key } => batch.delete(key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn scan_prefix<F>(&self, prefix: &[u8], interrupt: &Interrupt, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    {
        // The iterator pins an implicit snapshot taken at creation.
        let mut iter = self.db.raw_iterator();
        iter.seek(prefix);

        while iter.valid() {
            let (Some(key), Some(value)) = (iter.key(), iter.value()) else {
                break;
            };
            if !key.starts_with(prefix) {
                break;
            }
            interrupt.check()?;
            if visit(key, value)?.is_break() {
                break;
            }
            iter.next();
        }

        iter.status()?;

        Ok(())
    }
}

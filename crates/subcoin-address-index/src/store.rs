//! Persistent address index.

use crate::backend::{Backend, BackendType, BatchOp};
use crate::config::AddressIndexConfig;
use crate::interrupt::Interrupt;
use crate::keys::{
    decode_best_block, decode_history_value, encode_best_block, encode_history_value,
    history_prefix, unspent_prefix, AddressKey, HistoryKey, UnspentKey, UnspentValue,
    BEST_BLOCK_KEY,
};
use crate::types::IndexedBlock;
use crate::Result;
use std::ops::ControlFlow;

/// Index mutations produced by one block, committed as a single batch.
#[derive(Debug, Clone, Default)]
pub struct BlockMutations {
    /// Outputs to record as unspent. A null value erases the key instead.
    pub unspent_upserts: Vec<(UnspentKey, UnspentValue)>,
    /// Receive and spend events to append.
    pub history: Vec<(HistoryKey, i64)>,
    /// Outputs consumed by the block's inputs.
    pub unspent_deletes: Vec<UnspentKey>,
    /// Block the index is at once the batch is committed.
    pub best_block: Option<IndexedBlock>,
}

impl BlockMutations {
    /// Whether the batch carries no index entry change.
    pub fn is_empty(&self) -> bool {
        self.unspent_upserts.is_empty() && self.history.is_empty() && self.unspent_deletes.is_empty()
    }

    fn into_batch(self) -> Vec<BatchOp> {
        let mut ops = Vec::with_capacity(
            self.unspent_upserts.len() + self.history.len() + self.unspent_deletes.len() + 1,
        );

        for (key, value) in self.unspent_upserts {
            if value.is_null() {
                ops.push(BatchOp::Delete { key: key.encode() });
            } else {
                ops.push(BatchOp::Put {
                    key: key.encode(),
                    value: value.encode(),
                });
            }
        }

        for (key, amount) in self.history {
            ops.push(BatchOp::Put {
                key: key.encode(),
                value: encode_history_value(amount).to_vec(),
            });
        }

        // Deletes go last so an output created and spent in the same block ends up erased.
        for key in self.unspent_deletes {
            ops.push(BatchOp::Delete { key: key.encode() });
        }

        if let Some(IndexedBlock { number, hash }) = self.best_block {
            ops.push(BatchOp::Put {
                key: BEST_BLOCK_KEY.to_vec(),
                value: encode_best_block(number, &hash),
            });
        }

        ops
    }
}

/// Secondary index of the history and unspent outputs of every indexable address.
pub struct AddressIndexStore {
    backend: Backend,
    interrupt: Interrupt,
}

impl AddressIndexStore {
    pub fn new(backend: Backend, interrupt: Interrupt) -> Self {
        Self { backend, interrupt }
    }

    /// Opens the index described by `config`.
    pub fn open(config: &AddressIndexConfig, interrupt: Interrupt) -> Result<Self> {
        let backend = match config.backend {
            BackendType::InMem => Backend::in_mem(),
            BackendType::RocksDb => Backend::open_rocksdb(&config.db_path(), config.cache_size)?,
        };
        Ok(Self::new(backend, interrupt))
    }

    /// Creates a volatile index.
    pub fn in_mem() -> Self {
        Self::new(Backend::in_mem(), Interrupt::new())
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Returns the outputs of `address` that are currently unspent, in key order.
    pub fn read_unspent(&self, address: &AddressKey) -> Result<Vec<(UnspentKey, UnspentValue)>> {
        let mut unspent = Vec::new();
        self.backend
            .scan_prefix(&unspent_prefix(address), &self.interrupt, |key, value| {
                unspent.push((UnspentKey::decode(key)?, UnspentValue::decode(value)?));
                Ok(ControlFlow::Continue(()))
            })?;
        Ok(unspent)
    }

    /// Returns the history of `address` in chronological order.
    ///
    /// With `up_to_height`, the scan stops at the first event above that height.
    pub fn read_history(
        &self,
        address: &AddressKey,
        up_to_height: Option<u32>,
    ) -> Result<Vec<(HistoryKey, i64)>> {
        let mut history = Vec::new();
        self.backend
            .scan_prefix(&history_prefix(address), &self.interrupt, |key, value| {
                let key = HistoryKey::decode(key)?;
                if up_to_height.is_some_and(|max| key.block_height > max) {
                    return Ok(ControlFlow::Break(()));
                }
                history.push((key, decode_history_value(value)?));
                Ok(ControlFlow::Continue(()))
            })?;
        Ok(history)
    }

    /// Height of the earliest event of `address`, reading a single key.
    pub fn first_history_height(&self, address: &AddressKey) -> Result<Option<u32>> {
        let mut first = None;
        self.backend
            .scan_prefix(&history_prefix(address), &self.interrupt, |key, _| {
                first = Some(HistoryKey::decode(key)?.block_height);
                Ok(ControlFlow::Break(()))
            })?;
        Ok(first)
    }

    /// Whether `address` has ever received or spent an indexed output.
    pub fn has_history(&self, address: &AddressKey) -> Result<bool> {
        self.first_history_height(address).map(|first| first.is_some())
    }

    /// Commits the unspent upserts, history appends and unspent deletions as one batch.
    ///
    /// Either every mutation becomes visible or, on error, none does.
    pub fn apply_block_mutations(&self, mutations: BlockMutations) -> Result<()> {
        self.backend.write_batch(mutations.into_batch())
    }

    /// Returns the last block whose mutations were committed.
    pub fn best_block(&self) -> Result<Option<IndexedBlock>> {
        self.backend
            .get(BEST_BLOCK_KEY)?
            .map(|bytes| decode_best_block(&bytes).map(|(number, hash)| IndexedBlock { number, hash }))
            .transpose()
    }
}

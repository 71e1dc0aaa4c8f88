//! Gap limit discovery of the funds and activity of an extended public key.

use crate::hd::{AddressEncoding, Chain, HdPublicDeriver};
use crate::keys::AddressKey;
use crate::store::AddressIndexStore;
use crate::types::{FirstUsedBlock, RecoveryResult};
use crate::{Error, Result};
use bitcoin::{Network, Txid};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Default number of addresses derived per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Default number of consecutive unused addresses ending a scan.
pub const DEFAULT_GAP_LIMIT: u32 = 100;

/// Chain and encoding pairs scanned by a full recovery, in scan order.
const SCAN_COMBINATIONS: [(Chain, AddressEncoding); 4] = [
    (Chain::External, AddressEncoding::SegwitV0),
    (Chain::External, AddressEncoding::Legacy),
    (Chain::Internal, AddressEncoding::Legacy),
    (Chain::Internal, AddressEncoding::SegwitV0),
];

/// Runs gap limit scans of derived addresses against the address index.
#[derive(Clone)]
pub struct AddressRecoveryScanner {
    store: Arc<AddressIndexStore>,
    batch_size: u32,
    gap_limit: u32,
}

impl AddressRecoveryScanner {
    pub fn new(store: Arc<AddressIndexStore>) -> Self {
        Self::with_params(store, DEFAULT_BATCH_SIZE, DEFAULT_GAP_LIMIT)
    }

    pub fn with_params(store: Arc<AddressIndexStore>, batch_size: u32, gap_limit: u32) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            gap_limit,
        }
    }

    pub fn store(&self) -> &Arc<AddressIndexStore> {
        &self.store
    }

    /// Collects the unspent outputs of every chain and encoding, ordered by height.
    pub fn recover_utxos(&self, deriver: &HdPublicDeriver) -> Result<RecoveryResult> {
        let mut result = RecoveryResult::default();

        for (chain, encoding) in SCAN_COMBINATIONS {
            let batches = self.scan(deriver, chain, encoding, |_, keys| {
                let mut activity = false;
                for key in keys {
                    let unspent = self.store.read_unspent(key)?;
                    activity |= !unspent.is_empty();
                    result.utxos.extend(unspent);
                }
                if !activity {
                    activity = self.any_history(keys)?;
                }
                Ok(activity)
            })?;
            result.batches_scanned += batches;
        }

        // Stable: entries at equal heights keep their scan order.
        result.utxos.sort_by_key(|(_, value)| value.block_height);

        tracing::debug!(
            utxos = result.utxos.len(),
            batches = result.batches_scanned,
            "Recovered unspent outputs"
        );

        Ok(result)
    }

    /// Collects the distinct transactions touching any derived address, ordered by height.
    pub fn recover_txs(&self, deriver: &HdPublicDeriver) -> Result<Vec<Txid>> {
        let mut touched = BTreeSet::new();

        for (chain, encoding) in SCAN_COMBINATIONS {
            self.scan(deriver, chain, encoding, |_, keys| {
                let mut activity = false;
                for key in keys {
                    for (history_key, _) in self.store.read_history(key, None)? {
                        activity = true;
                        touched.insert((history_key.block_height, history_key.txid));
                    }
                }
                Ok(activity)
            })?;
        }

        Ok(touched.into_iter().map(|(_, txid)| txid).collect())
    }

    /// Highest receive address index with indexed history, segwit encoding only.
    pub fn last_used_index(&self, deriver: &HdPublicDeriver) -> Result<Option<u32>> {
        let mut last_used = None;

        self.scan(deriver, Chain::External, AddressEncoding::SegwitV0, |start, keys| {
            let mut activity = false;
            for (offset, key) in (0u32..).zip(keys) {
                if self.store.has_history(key)? {
                    activity = true;
                    last_used = Some(start + offset);
                }
            }
            Ok(activity)
        })?;

        Ok(last_used)
    }

    /// Lowest block height with activity on any derived address.
    pub fn first_used_block(&self, deriver: &HdPublicDeriver) -> Result<FirstUsedBlock> {
        let mut first_height: Option<u32> = None;

        for (chain, encoding) in SCAN_COMBINATIONS {
            self.scan(deriver, chain, encoding, |_, keys| {
                let mut activity = false;
                for key in keys {
                    if let Some(height) = self.store.first_history_height(key)? {
                        activity = true;
                        first_height = Some(first_height.map_or(height, |h| h.min(height)));
                    }
                }
                Ok(activity)
            })?;
        }

        Ok(first_height.map_or(FirstUsedBlock::Unused, FirstUsedBlock::Height))
    }

    /// Validates `xpub` before scanning, reporting an unusable key as a result.
    pub fn first_used_block_of(&self, xpub: &str, network: Network) -> Result<FirstUsedBlock> {
        match HdPublicDeriver::new(xpub, network) {
            Ok(deriver) => self.first_used_block(&deriver),
            Err(Error::InvalidXpub(_)) => Ok(FirstUsedBlock::InvalidXpub),
            Err(err) => Err(err),
        }
    }

    fn any_history(&self, keys: &[AddressKey]) -> Result<bool> {
        for key in keys {
            if self.store.has_history(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Derives batches of one chain until `gap_limit` consecutive addresses showed no
    /// activity. `visit` receives the first index of the batch and its keys and reports
    /// whether any of them was used. Returns the number of batches derived.
    fn scan<F>(
        &self,
        deriver: &HdPublicDeriver,
        chain: Chain,
        encoding: AddressEncoding,
        mut visit: F,
    ) -> Result<u32>
    where
        F: FnMut(u32, &[AddressKey]) -> Result<bool>,
    {
        let chain_key = deriver.derive_chain_key(chain)?;

        let mut cursor = 0u32;
        let mut consecutive_empty = 0u32;
        let mut batches = 0u32;

        loop {
            self.store.interrupt().check()?;

            let keys = deriver.derive_address_keys(&chain_key, cursor, self.batch_size, encoding)?;
            batches += 1;

            if visit(cursor, &keys)? {
                consecutive_empty = 0;
            } else {
                consecutive_empty = consecutive_empty.saturating_add(self.batch_size);
            }

            if consecutive_empty >= self.gap_limit {
                break;
            }

            cursor += self.batch_size;
        }

        tracing::trace!(?chain, ?encoding, batches, "Finished gap limit scan");

        Ok(batches)
    }
}

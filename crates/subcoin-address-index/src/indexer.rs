//! Block indexer implementation.

use crate::classify::{is_unspendable, ScriptClassifier, StandardScriptClassifier};
use crate::keys::{HistoryKey, UnspentKey, UnspentValue};
use crate::store::{AddressIndexStore, BlockMutations};
use crate::types::IndexedBlock;
use crate::{Error, Result};
use bitcoin::{Block, BlockHash, OutPoint, Transaction, TxOut, Txid};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Base transaction index used to resolve the outputs spent by a block's inputs.
pub trait TransactionIndex: Send + Sync {
    /// Returns the transaction and the hash of the block containing it, `None` if unknown.
    fn find_transaction(&self, txid: &Txid) -> Result<Option<(BlockHash, Transaction)>>;
}

/// [`TransactionIndex`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemTransactionIndex {
    transactions: RwLock<HashMap<Txid, (BlockHash, Transaction)>>,
}

impl InMemTransactionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_block(&self, block: &Block) {
        let block_hash = block.block_hash();
        let mut transactions = self.transactions.write();
        for tx in &block.txdata {
            transactions.insert(tx.compute_txid(), (block_hash, tx.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }
}

impl TransactionIndex for InMemTransactionIndex {
    fn find_transaction(&self, txid: &Txid) -> Result<Option<(BlockHash, Transaction)>> {
        Ok(self.transactions.read().get(txid).cloned())
    }
}

/// Lifecycle of an index fed by the node's block connection pipeline.
pub trait BlockConsumerIndex {
    /// Prepares the index, returning the block it is synced to.
    fn init(&self) -> Result<Option<IndexedBlock>>;

    /// Indexes a block connected at `height`.
    fn write_block(&self, block: &Block, height: u32) -> Result<()>;
}

/// Turns connected blocks into address index entries.
pub struct BlockIndexer {
    store: Arc<AddressIndexStore>,
    tx_index: Arc<dyn TransactionIndex>,
    classifier: Arc<dyn ScriptClassifier>,
}

impl BlockIndexer {
    pub fn new(store: Arc<AddressIndexStore>, tx_index: Arc<dyn TransactionIndex>) -> Self {
        Self::with_classifier(store, tx_index, Arc::new(StandardScriptClassifier))
    }

    pub fn with_classifier(
        store: Arc<AddressIndexStore>,
        tx_index: Arc<dyn TransactionIndex>,
        classifier: Arc<dyn ScriptClassifier>,
    ) -> Self {
        Self {
            store,
            tx_index,
            classifier,
        }
    }

    /// Indexes `block` at `height` and advances the indexed tip in the same batch.
    ///
    /// Blocks must arrive in chain order: once a tip exists, only `tip + 1` is accepted.
    pub fn on_block_connected(&self, block: &Block, height: u32) -> Result<()> {
        if let Some(tip) = self.store.best_block()? {
            let expected = tip.number + 1;
            if height != expected {
                return Err(Error::NonSequentialBlock {
                    expected,
                    got: height,
                });
            }
        }

        let mut mutations = self.block_mutations(block, height)?;

        let (received, spent) = (mutations.unspent_upserts.len(), mutations.unspent_deletes.len());

        mutations.best_block = Some(IndexedBlock {
            number: height,
            hash: block.block_hash(),
        });

        self.store.apply_block_mutations(mutations)?;

        tracing::debug!(
            height,
            txs = block.txdata.len(),
            received,
            spent,
            "Indexed block"
        );

        Ok(())
    }

    /// Computes the index mutations of `block` without writing them.
    pub fn block_mutations(&self, block: &Block, height: u32) -> Result<BlockMutations> {
        let mut mutations = BlockMutations::default();

        // Genesis outputs are unspendable by consensus.
        if height == 0 {
            return Ok(mutations);
        }

        let txids = block
            .txdata
            .iter()
            .map(|tx| tx.compute_txid())
            .collect::<Vec<_>>();

        for (tx_index, (tx, txid)) in block.txdata.iter().zip(&txids).enumerate() {
            let tx_position = tx_index as u32;

            for (vout, output) in tx.output.iter().enumerate() {
                if is_unspendable(&output.script_pubkey) {
                    continue;
                }

                let Some(address) = self.classifier.classify(&output.script_pubkey) else {
                    continue;
                };

                let amount = output.value.to_sat() as i64;
                let output_index = vout as u32;

                mutations.history.push((
                    HistoryKey {
                        address,
                        block_height: height,
                        tx_index: tx_position,
                        txid: *txid,
                        output_index,
                        spending: false,
                    },
                    amount,
                ));
                mutations.unspent_upserts.push((
                    UnspentKey {
                        address,
                        txid: *txid,
                        output_index,
                    },
                    UnspentValue::new(amount, output.script_pubkey.clone(), height),
                ));
            }

            if tx.is_coinbase() {
                continue;
            }

            for (input_index, input) in tx.input.iter().enumerate() {
                let Some(spent) =
                    self.resolve_spent_output(block, &txids[..tx_index], input.previous_output)?
                else {
                    tracing::debug!(
                        height,
                        %txid,
                        out_point = %input.previous_output,
                        "Spent output not found, skipping input"
                    );
                    continue;
                };

                let Some(address) = self.classifier.classify(&spent.script_pubkey) else {
                    continue;
                };

                mutations.history.push((
                    HistoryKey {
                        address,
                        block_height: height,
                        tx_index: tx_position,
                        txid: *txid,
                        output_index: input_index as u32,
                        spending: true,
                    },
                    spent.value.to_sat() as i64,
                ));
                mutations.unspent_deletes.push(UnspentKey {
                    address,
                    txid: input.previous_output.txid,
                    output_index: input.previous_output.vout,
                });
            }
        }

        Ok(mutations)
    }

    /// Looks the spent output up among the earlier transactions of the block first,
    /// then in the transaction index.
    fn resolve_spent_output(
        &self,
        block: &Block,
        earlier_txids: &[Txid],
        out_point: OutPoint,
    ) -> Result<Option<TxOut>> {
        let OutPoint { txid, vout } = out_point;

        if let Some(position) = earlier_txids.iter().position(|id| *id == txid) {
            return Ok(block.txdata[position].output.get(vout as usize).cloned());
        }

        Ok(self
            .tx_index
            .find_transaction(&txid)?
            .and_then(|(_block_hash, tx)| tx.output.get(vout as usize).cloned()))
    }
}

impl BlockConsumerIndex for BlockIndexer {
    fn init(&self) -> Result<Option<IndexedBlock>> {
        let tip = self.store.best_block()?;
        match tip {
            Some(tip) => tracing::info!("Address index synced to {tip}"),
            None => tracing::info!("Address index is empty"),
        }
        Ok(tip)
    }

    fn write_block(&self, block: &Block, height: u32) -> Result<()> {
        self.on_block_connected(block, height)
    }
}

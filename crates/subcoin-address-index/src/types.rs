//! Types returned by the address index queries.

use crate::classify::AddressCodec;
use crate::keys::{AddressType, HistoryKey, UnspentKey, UnspentValue};
use crate::Result;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, ScriptBuf, Txid};
use serde::Serialize;

/// Represents an indexed Bitcoin block, identified by its block number and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexedBlock {
    /// Block number.
    pub number: u32,
    /// Block hash.
    pub hash: BlockHash,
}

impl std::fmt::Display for IndexedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{},{}", self.number, self.hash)
    }
}

impl Default for IndexedBlock {
    fn default() -> Self {
        Self {
            number: 0u32,
            hash: BlockHash::all_zeros(),
        }
    }
}

/// An unspent output of an address, as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtxoRecord {
    /// Address text owning the output.
    pub address: String,
    /// Script kind of the address.
    pub address_type: AddressType,
    /// Transaction ID containing this output.
    pub txid: Txid,
    /// Output index within the transaction.
    pub output_index: u32,
    /// The locking script.
    pub script: ScriptBuf,
    /// Value in satoshis.
    pub satoshis: i64,
    /// Block height where this output was created.
    pub height: u32,
}

impl UtxoRecord {
    pub fn render(codec: &AddressCodec, key: &UnspentKey, value: &UnspentValue) -> Result<Self> {
        Ok(Self {
            address: codec.encode(&key.address)?,
            address_type: key.address.address_type,
            txid: key.txid,
            output_index: key.output_index,
            script: value.script.clone(),
            satoshis: value.amount,
            height: value.block_height,
        })
    }
}

/// A receive or spend event of an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub address: String,
    pub txid: Txid,
    pub block_height: u32,
    /// Position of the transaction in its block.
    pub tx_index: u32,
    pub output_index: u32,
    /// `true` if the event spends a previously received output.
    pub spending: bool,
    /// Value of the received or spent output, always positive.
    pub satoshis: i64,
}

impl HistoryRecord {
    pub fn render(codec: &AddressCodec, key: &HistoryKey, satoshis: i64) -> Result<Self> {
        Ok(Self {
            address: codec.encode(&key.address)?,
            txid: key.txid,
            block_height: key.block_height,
            tx_index: key.tx_index,
            output_index: key.output_index,
            spending: key.spending,
            satoshis,
        })
    }
}

/// Address balance summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressBalance {
    /// Sum of the unspent outputs in satoshis.
    pub confirmed: u64,
    /// Number of distinct transactions involving the addresses.
    pub tx_count: u64,
    /// Number of unspent outputs.
    pub utxo_count: u64,
    /// Total received in satoshis.
    pub total_received: u64,
    /// Total sent in satoshis.
    pub total_sent: u64,
}

/// Unspent outputs recovered from an extended public key.
#[derive(Debug, Clone, Default)]
pub struct RecoveryResult {
    /// Entries ordered by ascending confirmation height, stable for equal heights.
    pub utxos: Vec<(UnspentKey, UnspentValue)>,
    /// Number of address batches derived across all scanned chains.
    pub batches_scanned: u32,
}

impl RecoveryResult {
    pub fn records(&self, codec: &AddressCodec) -> Result<Vec<UtxoRecord>> {
        self.utxos
            .iter()
            .map(|(key, value)| UtxoRecord::render(codec, key, value))
            .collect()
    }
}

/// Outcome of a first-used-block query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FirstUsedBlock {
    /// Lowest block height with activity on any derived address.
    Height(u32),
    /// No derived address has indexed history.
    Unused,
    /// The input was not a usable extended public key.
    InvalidXpub,
}

impl FirstUsedBlock {
    /// Legacy integer form: the height, `-1` when unused, `-2` for an invalid key.
    pub fn code(&self) -> i64 {
        match self {
            Self::Height(height) => *height as i64,
            Self::Unused => -1,
            Self::InvalidXpub => -2,
        }
    }
}

/// Legacy integer form of a last-used-index: the index, or `-1` if nothing was used.
pub fn last_used_index_code(index: Option<u32>) -> i64 {
    index.map_or(-1, i64::from)
}

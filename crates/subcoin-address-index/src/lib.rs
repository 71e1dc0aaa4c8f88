//! Address index for Subcoin.
//!
//! This crate maintains a secondary index of the Bitcoin chain keyed by address, enabling:
//! - Unspent outputs and history lookup by P2PKH, P2SH and P2WPKH address
//! - Gap limit discovery of the funds of an extended public key
//! - A compact binary command protocol over both

mod backend;
mod classify;
mod config;
mod error;
mod hd;
mod indexer;
mod interrupt;
mod keys;
mod queries;
mod recovery;
mod serialize;
mod store;
mod types;

pub mod protocol;

pub use backend::{Backend, BackendType, BatchOp};
pub use classify::{is_unspendable, script_for, AddressCodec, ScriptClassifier, StandardScriptClassifier};
#[cfg(feature = "cli")]
pub use config::{AddressIndexParams, BitcoinChain};
pub use config::AddressIndexConfig;
pub use error::Error;
pub use hd::{AddressEncoding, Chain, ChainKey, HdPublicDeriver, XPUB_SIZE};
pub use indexer::{BlockConsumerIndex, BlockIndexer, InMemTransactionIndex, TransactionIndex};
pub use interrupt::Interrupt;
pub use keys::{AddressKey, AddressType, HistoryKey, UnspentKey, UnspentValue};
pub use protocol::{ProtocolError, WireCommandProtocol};
pub use queries::AddressQuery;
pub use recovery::{AddressRecoveryScanner, DEFAULT_BATCH_SIZE, DEFAULT_GAP_LIMIT};
pub use store::{AddressIndexStore, BlockMutations};
pub use types::{
    last_used_index_code, AddressBalance, FirstUsedBlock, HistoryRecord, IndexedBlock,
    RecoveryResult, UtxoRecord,
};

/// Address index result type.
pub type Result<T> = std::result::Result<T, Error>;

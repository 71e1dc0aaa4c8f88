//! Error types for the address index.

use bitcoin::bip32;

/// Errors that can occur while building or querying the address index.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored key or value does not match its expected layout.
    #[error("Corrupted index entry: {0}")]
    Decode(String),

    /// An address type tag that no supported [`crate::AddressType`] maps to.
    #[error("Unknown address type: {0}")]
    UnknownAddressType(u8),

    /// The extended public key could not be parsed or is unusable.
    #[error("Invalid extended public key: {0}")]
    InvalidXpub(String),

    /// Child key derivation failed.
    #[error("Key derivation error: {0}")]
    Bip32(#[from] bip32::Error),

    /// Address text that is not a supported P2PKH/P2SH/P2WPKH address of the configured network.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The transaction index collaborator failed (not merely "not found").
    #[error("Transaction index error: {0}")]
    TransactionIndex(String),

    /// A block that does not extend the last indexed block.
    #[error("Block #{got} does not extend the indexed tip, expected #{expected}")]
    NonSequentialBlock { expected: u32, got: u32 },

    /// A long running scan was interrupted.
    #[error("Interrupted")]
    Interrupted,
}

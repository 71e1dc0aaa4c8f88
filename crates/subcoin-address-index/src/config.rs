use crate::backend::BackendType;
use crate::recovery::{DEFAULT_BATCH_SIZE, DEFAULT_GAP_LIMIT};
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default RocksDB write buffer budget.
const DEFAULT_CACHE_SIZE: usize = 64 * 1024 * 1024;

/// Address index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressIndexConfig {
    /// Node base path, the index lives in a network specific directory below it.
    pub base_path: PathBuf,
    /// Network the indexed addresses are rendered for.
    pub network: Network,
    pub backend: BackendType,
    /// Addresses derived per recovery batch.
    pub batch_size: u32,
    /// Consecutive unused addresses ending a recovery scan.
    pub gap_limit: u32,
    /// RocksDB write buffer size in bytes.
    pub cache_size: usize,
}

impl Default for AddressIndexConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            network: Network::Bitcoin,
            backend: BackendType::RocksDb,
            batch_size: DEFAULT_BATCH_SIZE,
            gap_limit: DEFAULT_GAP_LIMIT,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl AddressIndexConfig {
    /// Directory of the index database.
    ///
    /// Each network gets its own directory so that data of different networks never mix.
    pub fn db_path(&self) -> PathBuf {
        let network_dir = match self.network {
            Network::Bitcoin => "mainnet",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
            _ => "unknown",
        };
        self.base_path
            .join("indexes")
            .join("addressindex")
            .join(network_dir)
    }
}

/// Bitcoin chain type.
#[cfg(feature = "cli")]
#[derive(Clone, Copy, Default, Debug, clap::ValueEnum)]
pub enum BitcoinChain {
    /// Bitcoin mainnet.
    #[default]
    Mainnet,
    /// Bitcoin testnet.
    Testnet,
    /// Bitcoin signet.
    Signet,
    /// Local regression test chain.
    Regtest,
}

#[cfg(feature = "cli")]
impl BitcoinChain {
    pub fn bitcoin_network(&self) -> Network {
        match self {
            Self::Mainnet => Network::Bitcoin,
            Self::Testnet => Network::Testnet,
            Self::Signet => Network::Signet,
            Self::Regtest => Network::Regtest,
        }
    }
}

/// Address index parameters.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, clap::Args)]
pub struct AddressIndexParams {
    /// Specify custom base path.
    #[arg(long, short = 'd', value_name = "PATH", default_value = ".")]
    pub base_path: PathBuf,

    /// Specify the chain.
    #[arg(long, value_name = "CHAIN", default_value = "mainnet")]
    pub chain: BitcoinChain,

    /// Storage backend of the index.
    #[arg(long, value_enum, default_value_t = BackendType::RocksDb, ignore_case = true)]
    pub backend: BackendType,

    /// Number of addresses derived per recovery batch.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u32,

    /// Number of consecutive unused addresses after which a recovery scan stops.
    #[arg(long, default_value_t = DEFAULT_GAP_LIMIT)]
    pub gap_limit: u32,

    /// RocksDB write buffer size in MiB.
    #[arg(long, default_value_t = 64)]
    pub cache_size: usize,
}

#[cfg(feature = "cli")]
impl AddressIndexParams {
    pub fn into_config(self) -> AddressIndexConfig {
        let Self {
            base_path,
            chain,
            backend,
            batch_size,
            gap_limit,
            cache_size,
        } = self;

        AddressIndexConfig {
            base_path,
            network: chain.bitcoin_network(),
            backend,
            batch_size,
            gap_limit,
            cache_size: cache_size * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_networks_use_separate_directories() {
        let mut config = AddressIndexConfig {
            base_path: PathBuf::from("/data"),
            ..Default::default()
        };
        assert_eq!(
            config.db_path(),
            PathBuf::from("/data/indexes/addressindex/mainnet")
        );
        config.network = Network::Regtest;
        assert_eq!(
            config.db_path(),
            PathBuf::from("/data/indexes/addressindex/regtest")
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AddressIndexConfig =
            serde_json::from_str(r#"{"network":"testnet","backend":"InMem"}"#).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.backend, BackendType::InMem);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.gap_limit, DEFAULT_GAP_LIMIT);
    }
}

use clap::Parser;
use std::path::PathBuf;
use subcoin_address_index::AddressIndexParams;

/// Subcoin address index tool.
#[derive(Debug, Parser)]
#[clap(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub index: AddressIndexParams,

    /// Sets a custom logging filter (syntax: `<target>=<level>`).
    ///
    /// Falls back to `RUST_LOG`, then to `info`.
    ///
    /// *Example*: `--log info,subcoin_address_index=debug`.
    #[arg(short = 'l', long, value_name = "LOG_PATTERN", num_args = 1.., global = true)]
    pub log: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct XpubArg {
    /// Account level extended public key.
    #[arg(long)]
    pub xpub: String,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Derive addresses of an extended public key.
    Generate {
        #[clap(flatten)]
        xpub: XpubArg,

        /// Index of the first address.
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// Number of addresses to derive.
        #[arg(long, default_value_t = 20)]
        count: u32,

        /// Derive change addresses instead of receive addresses.
        #[arg(long)]
        change: bool,

        /// Render base58 P2PKH addresses instead of bech32 P2WPKH.
        #[arg(long)]
        legacy: bool,
    },

    /// Recover the unspent outputs of an extended public key.
    Utxos(XpubArg),

    /// Recover the transaction ids of an extended public key.
    Txs(XpubArg),

    /// Print the highest used receive address index, `-1` if none is used.
    LastUsedIndex(XpubArg),

    /// Print the height of the first block using any derived address.
    ///
    /// `-1` if no derived address is used, `-2` if the key is invalid.
    FirstUsedBlock(XpubArg),

    /// List the unspent outputs of addresses.
    AddressUtxos {
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Print the history of addresses.
    History {
        #[arg(required = true)]
        addresses: Vec<String>,

        /// Ignore events above this height.
        #[arg(long)]
        up_to_height: Option<u32>,
    },

    /// Print the balance of addresses.
    Balance {
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Index hex encoded blocks, one per line, in chain order.
    Import {
        /// File with one hex encoded block per line.
        #[arg(long)]
        blocks: PathBuf,

        /// Height of the first block in the file.
        #[arg(long)]
        start_height: u32,
    },

    /// Run a hex encoded request through the binary command protocol.
    Wire {
        /// Request frame in hex.
        request: String,

        /// Blocks to build the transaction index from, enabling `T` requests.
        #[arg(long)]
        blocks: Option<PathBuf>,
    },

    /// Print the last indexed block.
    Status,
}

use crate::cli::{Cli, Command, XpubArg};
use crate::error::{Error, Result};
use bitcoin::Block;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use subcoin_address_index::{
    last_used_index_code, AddressEncoding, AddressIndexConfig, AddressIndexStore, AddressQuery,
    AddressRecoveryScanner, BlockConsumerIndex, BlockIndexer, Chain, HdPublicDeriver,
    InMemTransactionIndex, Interrupt, TransactionIndex, WireCommandProtocol,
};

/// How often to log progress while importing.
const PROGRESS_LOG_INTERVAL: usize = 1000;

pub fn run(cli: Cli) -> Result<()> {
    let Cli { command, index, .. } = cli;
    let config = index.into_config();
    let network = config.network;

    match command {
        Command::Generate {
            xpub: XpubArg { xpub },
            start,
            count,
            change,
            legacy,
        } => {
            let deriver = HdPublicDeriver::new(&xpub, network)?;
            let chain_key = deriver.derive_chain_key(Chain::from_internal(change))?;
            let encoding = if legacy {
                AddressEncoding::Legacy
            } else {
                AddressEncoding::SegwitV0
            };
            for address in deriver.derive_addresses(&chain_key, start, count, encoding)? {
                println!("{address}");
            }
        }
        Command::Utxos(XpubArg { xpub }) => {
            let scanner = open_scanner(&config)?;
            let deriver = HdPublicDeriver::new(&xpub, network)?;
            let recovered = scanner.recover_utxos(&deriver)?;
            tracing::debug!(batches = recovered.batches_scanned, "Recovery scan finished");
            print_json(&recovered.records(deriver.codec())?)?;
        }
        Command::Txs(XpubArg { xpub }) => {
            let scanner = open_scanner(&config)?;
            let deriver = HdPublicDeriver::new(&xpub, network)?;
            print_json(&scanner.recover_txs(&deriver)?)?;
        }
        Command::LastUsedIndex(XpubArg { xpub }) => {
            let scanner = open_scanner(&config)?;
            let deriver = HdPublicDeriver::new(&xpub, network)?;
            println!("{}", last_used_index_code(scanner.last_used_index(&deriver)?));
        }
        Command::FirstUsedBlock(XpubArg { xpub }) => {
            let scanner = open_scanner(&config)?;
            println!("{}", scanner.first_used_block_of(&xpub, network)?.code());
        }
        Command::AddressUtxos { addresses } => {
            print_json(&open_query(&config)?.utxos(&addresses)?)?;
        }
        Command::History {
            addresses,
            up_to_height,
        } => {
            print_json(&open_query(&config)?.history(&addresses, up_to_height)?)?;
        }
        Command::Balance { addresses } => {
            print_json(&open_query(&config)?.balance(&addresses)?)?;
        }
        Command::Import {
            blocks,
            start_height,
        } => import_blocks(&config, &blocks, start_height)?,
        Command::Wire { request, blocks } => {
            let tx_index = match blocks {
                Some(path) => {
                    let tx_index = InMemTransactionIndex::new();
                    for block in read_blocks(&path)? {
                        tx_index.index_block(&block);
                    }
                    Some(Arc::new(tx_index) as Arc<dyn TransactionIndex>)
                }
                None => None,
            };
            let protocol = WireCommandProtocol::new(open_scanner(&config)?, network, tx_index);
            let response = protocol.handle(&hex::decode(request.trim())?);
            println!("{}", hex::encode(response));
        }
        Command::Status => match open_query(&config)?.indexed_tip()? {
            Some(tip) => print_json(&tip)?,
            None => println!("Address index is empty"),
        },
    }

    Ok(())
}

fn open_store(config: &AddressIndexConfig) -> Result<Arc<AddressIndexStore>> {
    Ok(Arc::new(AddressIndexStore::open(config, Interrupt::new())?))
}

fn open_scanner(config: &AddressIndexConfig) -> Result<AddressRecoveryScanner> {
    Ok(AddressRecoveryScanner::with_params(
        open_store(config)?,
        config.batch_size,
        config.gap_limit,
    ))
}

fn open_query(config: &AddressIndexConfig) -> Result<AddressQuery> {
    Ok(AddressQuery::new(open_store(config)?, config.network))
}

fn read_blocks(path: &Path) -> Result<Vec<Block>> {
    std::fs::read_to_string(path)?
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| -> Result<Block> {
            let bytes = hex::decode(line.trim())?;
            bitcoin::consensus::deserialize(&bytes).map_err(|err| Error::InvalidBlock {
                line: index + 1,
                err,
            })
        })
        .collect()
}

fn import_blocks(config: &AddressIndexConfig, path: &Path, start_height: u32) -> Result<()> {
    let blocks = read_blocks(path)?;
    let store = open_store(config)?;
    let tx_index = Arc::new(InMemTransactionIndex::new());
    let indexer = BlockIndexer::new(store, tx_index.clone());

    if let Some(tip) = indexer.init()? {
        tracing::info!("Resuming on top of {tip}");
    }

    let start_time = Instant::now();
    let total = blocks.len();

    for (offset, block) in blocks.iter().enumerate() {
        let height = start_height + offset as u32;
        indexer.write_block(block, height)?;
        tx_index.index_block(block);

        let processed = offset + 1;
        if processed % PROGRESS_LOG_INTERVAL == 0 || processed == total {
            tracing::info!(processed, total, height, "Indexing progress");
        }
    }

    tracing::info!(
        blocks = total,
        duration_secs = start_time.elapsed().as_secs(),
        "Import complete"
    );

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

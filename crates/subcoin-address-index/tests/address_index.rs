use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version};
use bitcoin::hashes::Hash;
use bitcoin::{
    transaction, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Witness,
};
use std::sync::Arc;
use subcoin_address_index::protocol::{self, Command, Response};
use subcoin_address_index::{
    script_for, AddressEncoding, AddressIndexConfig, AddressIndexStore, AddressKey, AddressQuery,
    AddressRecoveryScanner, BackendType, BlockConsumerIndex, BlockIndexer, Chain, FirstUsedBlock,
    HdPublicDeriver, InMemTransactionIndex, Interrupt, TransactionIndex, WireCommandProtocol,
};

const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

fn make_block(prev_blockhash: BlockHash, txdata: Vec<Transaction>) -> Block {
    Block {
        header: Header {
            version: Version::ONE,
            prev_blockhash,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_700_000_000,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        },
        txdata,
    }
}

fn make_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

fn coinbase(height: u32, output: Vec<TxOut>) -> Transaction {
    make_tx(
        vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(height.to_le_bytes().to_vec()),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output,
    )
}

fn spend(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

fn pay(address: &AddressKey, sats: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: script_for(address),
    }
}

fn wallet_key(chain: Chain, encoding: AddressEncoding, index: u32) -> AddressKey {
    let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();
    let chain_key = deriver.derive_chain_key(chain).unwrap();
    deriver
        .derive_address_keys(&chain_key, index, 1, encoding)
        .unwrap()[0]
}

/// Chain of three blocks moving funds through the wallet:
///
/// - #1 pays receive address 0 (segwit) and receive address 1 (legacy).
/// - #2 spends receive address 0 into change address 0 (legacy) and an outside address.
/// - #3 pays receive address 4 (segwit).
fn wallet_chain() -> Vec<(u32, Block)> {
    let receive_0 = wallet_key(Chain::External, AddressEncoding::SegwitV0, 0);
    let receive_1 = wallet_key(Chain::External, AddressEncoding::Legacy, 1);
    let receive_4 = wallet_key(Chain::External, AddressEncoding::SegwitV0, 4);
    let change_0 = wallet_key(Chain::Internal, AddressEncoding::Legacy, 0);
    let outsider = AddressKey::new(subcoin_address_index::AddressType::P2sh, [0x77; 20]);

    let funding = coinbase(1, vec![pay(&receive_0, 50_000), pay(&receive_1, 20_000)]);
    let block_1 = make_block(BlockHash::all_zeros(), vec![funding.clone()]);

    let payment = make_tx(
        vec![spend(OutPoint {
            txid: funding.compute_txid(),
            vout: 0,
        })],
        vec![pay(&outsider, 30_000), pay(&change_0, 19_000)],
    );
    let block_2 = make_block(block_1.block_hash(), vec![coinbase(2, vec![]), payment]);

    let block_3 = make_block(
        block_2.block_hash(),
        vec![coinbase(3, vec![pay(&receive_4, 1_000)])],
    );

    vec![(1, block_1), (2, block_2), (3, block_3)]
}

struct Node {
    store: Arc<AddressIndexStore>,
    tx_index: Arc<InMemTransactionIndex>,
}

fn index_wallet_chain(config: &AddressIndexConfig) -> Node {
    let store = Arc::new(AddressIndexStore::open(config, Interrupt::new()).unwrap());
    let tx_index = Arc::new(InMemTransactionIndex::new());
    let indexer = BlockIndexer::new(store.clone(), tx_index.clone());

    assert_eq!(indexer.init().unwrap(), None);

    for (height, block) in wallet_chain() {
        indexer.write_block(&block, height).unwrap();
        tx_index.index_block(&block);
    }

    Node { store, tx_index }
}

#[test]
fn test_index_then_recover() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = AddressIndexConfig {
        base_path: temp_dir.path().to_path_buf(),
        backend: BackendType::RocksDb,
        ..Default::default()
    };
    let node = index_wallet_chain(&config);

    let scanner = AddressRecoveryScanner::with_params(node.store.clone(), 2, 4);
    let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();

    let recovered = scanner.recover_utxos(&deriver).unwrap();
    let amounts = recovered
        .utxos
        .iter()
        .map(|(_, value)| (value.block_height, value.amount))
        .collect::<Vec<_>>();
    assert_eq!(amounts, vec![(1, 20_000), (2, 19_000), (3, 1_000)]);

    let records = recovered.records(deriver.codec()).unwrap();
    assert!(records[0].address.starts_with('1'));
    assert!(records[2].address.starts_with("bc1q"));

    assert_eq!(scanner.last_used_index(&deriver).unwrap(), Some(4));
    assert_eq!(
        scanner.first_used_block(&deriver).unwrap(),
        FirstUsedBlock::Height(1)
    );
    assert_eq!(scanner.recover_txs(&deriver).unwrap().len(), 3);

    let tip = node.store.best_block().unwrap().unwrap();
    assert_eq!(tip.number, 3);

    let query = AddressQuery::new(node.store.clone(), Network::Bitcoin);
    assert_eq!(query.indexed_tip().unwrap(), Some(tip));

    let receive_0 = deriver
        .derive_addresses(
            &deriver.derive_chain_key(Chain::External).unwrap(),
            0,
            1,
            AddressEncoding::SegwitV0,
        )
        .unwrap();
    let balance = query.balance(&receive_0).unwrap();
    assert_eq!(balance.confirmed, 0);
    assert_eq!(balance.total_received, 50_000);
    assert_eq!(balance.total_sent, 50_000);
    assert_eq!(balance.tx_count, 2);
}

#[test]
fn test_default_gap_limit_recovers_everything() {
    let node = index_wallet_chain(&AddressIndexConfig {
        backend: BackendType::InMem,
        ..Default::default()
    });
    let scanner = AddressRecoveryScanner::new(node.store.clone());
    let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();

    let recovered = scanner.recover_utxos(&deriver).unwrap();
    assert_eq!(recovered.utxos.len(), 3);
    // Every chain holds at most a single active batch.
    assert_eq!(recovered.batches_scanned, 2 + 2 + 2 + 1);
}

#[test]
fn test_wire_protocol_end_to_end() {
    let node = index_wallet_chain(&AddressIndexConfig {
        backend: BackendType::InMem,
        ..Default::default()
    });
    let scanner = AddressRecoveryScanner::new(node.store.clone());
    let wire = WireCommandProtocol::new(
        scanner.clone(),
        Network::Bitcoin,
        Some(node.tx_index.clone() as Arc<dyn TransactionIndex>),
    );

    let response = wire.handle(&protocol::xpub_request(Command::Recover, XPUB));
    let Response::Utxos(utxos) = Response::decode(Command::Recover, &response).unwrap() else {
        panic!("Expected recovered outputs");
    };
    let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();
    assert_eq!(utxos, scanner.recover_utxos(&deriver).unwrap().utxos);

    let response = wire.handle(&protocol::xpub_request(Command::RecoverTxs, XPUB));
    let Response::Transactions(txs) = Response::decode(Command::RecoverTxs, &response).unwrap()
    else {
        panic!("Expected recovered transactions");
    };
    let expected = wallet_chain()
        .into_iter()
        .flat_map(|(_, block)| block.txdata)
        .filter(|tx| !tx.output.is_empty())
        .collect::<Vec<_>>();
    assert_eq!(txs.len(), 3);
    assert!(txs.iter().all(|tx| expected.contains(tx)));

    let response = wire.handle(&protocol::generate_request(0, 5, XPUB));
    let Response::Addresses(addresses) = Response::decode(Command::Generate, &response).unwrap()
    else {
        panic!("Expected addresses");
    };
    assert_eq!(addresses.len(), 5);
}

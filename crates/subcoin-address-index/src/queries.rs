//! Query functions for the address index.

use crate::classify::AddressCodec;
use crate::keys::AddressKey;
use crate::store::AddressIndexStore;
use crate::types::{AddressBalance, HistoryRecord, IndexedBlock, UtxoRecord};
use crate::Result;
use bitcoin::{Network, Txid};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Query interface over the address index, taking addresses as text.
#[derive(Clone)]
pub struct AddressQuery {
    store: Arc<AddressIndexStore>,
    codec: AddressCodec,
}

impl AddressQuery {
    /// Create a new query interface.
    pub fn new(store: Arc<AddressIndexStore>, network: Network) -> Self {
        Self {
            store,
            codec: AddressCodec::new(network),
        }
    }

    /// Get the unspent outputs of `addresses`, ordered by confirmation height.
    pub fn utxos(&self, addresses: &[String]) -> Result<Vec<UtxoRecord>> {
        let mut utxos = Vec::new();
        for address in self.decode_all(addresses)? {
            utxos.extend(self.store.read_unspent(&address)?);
        }

        utxos.sort_by_key(|(_, value)| value.block_height);

        utxos
            .iter()
            .map(|(key, value)| UtxoRecord::render(&self.codec, key, value))
            .collect()
    }

    /// Get the distinct transactions touching `addresses`, ordered by height.
    pub fn txids(&self, addresses: &[String]) -> Result<Vec<Txid>> {
        let mut touched = BTreeSet::new();
        for address in self.decode_all(addresses)? {
            for (key, _) in self.store.read_history(&address, None)? {
                touched.insert((key.block_height, key.txid));
            }
        }
        Ok(touched.into_iter().map(|(_, txid)| txid).collect())
    }

    /// Get the receive and spend events of `addresses` in chain order.
    pub fn history(
        &self,
        addresses: &[String],
        up_to_height: Option<u32>,
    ) -> Result<Vec<HistoryRecord>> {
        let mut history = Vec::new();
        for address in self.decode_all(addresses)? {
            history.extend(self.store.read_history(&address, up_to_height)?);
        }

        history.sort_by_key(|(key, _)| (key.block_height, key.tx_index));

        history
            .iter()
            .map(|(key, amount)| HistoryRecord::render(&self.codec, key, *amount))
            .collect()
    }

    /// Get the balance and statistics of `addresses`.
    pub fn balance(&self, addresses: &[String]) -> Result<AddressBalance> {
        let mut balance = AddressBalance::default();
        let mut txids = BTreeSet::new();

        for address in self.decode_all(addresses)? {
            for (_, value) in self.store.read_unspent(&address)? {
                balance.confirmed += value.amount as u64;
                balance.utxo_count += 1;
            }

            for (key, amount) in self.store.read_history(&address, None)? {
                txids.insert(key.txid);
                if key.spending {
                    balance.total_sent += amount as u64;
                } else {
                    balance.total_received += amount as u64;
                }
            }
        }

        balance.tx_count = txids.len() as u64;

        Ok(balance)
    }

    /// Get the last indexed block.
    pub fn indexed_tip(&self) -> Result<Option<IndexedBlock>> {
        self.store.best_block()
    }

    fn decode_all(&self, addresses: &[String]) -> Result<BTreeSet<AddressKey>> {
        addresses
            .iter()
            .map(|address| self.codec.decode(address))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::script_for;
    use crate::keys::{AddressType, HistoryKey, UnspentKey, UnspentValue};
    use crate::store::BlockMutations;
    use crate::Error;
    use bitcoin::hashes::Hash;

    const GENESIS_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn seeded() -> (AddressQuery, AddressKey) {
        let store = Arc::new(AddressIndexStore::in_mem());
        let query = AddressQuery::new(store.clone(), Network::Bitcoin);
        let address = AddressCodec::new(Network::Bitcoin)
            .decode(GENESIS_ADDRESS)
            .unwrap();

        let receive = |height: u32, tag: u8, amount: i64| {
            let txid = Txid::from_byte_array([tag; 32]);
            (
                (
                    UnspentKey {
                        address,
                        txid,
                        output_index: 0,
                    },
                    UnspentValue::new(amount, script_for(&address), height),
                ),
                (
                    HistoryKey {
                        address,
                        block_height: height,
                        tx_index: 0,
                        txid,
                        output_index: 0,
                        spending: false,
                    },
                    amount,
                ),
            )
        };

        let (utxo_a, history_a) = receive(30, 1, 700);
        let (utxo_b, history_b) = receive(10, 2, 300);
        let (spent_utxo, history_c) = receive(20, 3, 50);
        let spend = HistoryKey {
            address,
            block_height: 25,
            tx_index: 4,
            txid: Txid::from_byte_array([4; 32]),
            output_index: 0,
            spending: true,
        };

        store
            .apply_block_mutations(BlockMutations {
                unspent_upserts: vec![utxo_a, utxo_b],
                history: vec![history_a, history_b, history_c, (spend, 50)],
                unspent_deletes: vec![spent_utxo.0],
                best_block: None,
            })
            .unwrap();

        (query, address)
    }

    #[test]
    fn test_utxos_render_address_text_in_height_order() {
        let (query, address) = seeded();
        let utxos = query.utxos(&[GENESIS_ADDRESS.to_string()]).unwrap();

        assert_eq!(
            utxos.iter().map(|utxo| utxo.height).collect::<Vec<_>>(),
            vec![10, 30]
        );
        assert!(utxos.iter().all(|utxo| utxo.address == GENESIS_ADDRESS));
        assert_eq!(utxos[0].address_type, AddressType::P2pkh);
        assert_eq!(utxos[0].script, script_for(&address));

        let json = serde_json::to_value(&utxos[0]).unwrap();
        assert_eq!(json["satoshis"], 300);
        assert_eq!(json["address_type"], "p2pkh");
    }

    #[test]
    fn test_balance_and_history() {
        let (query, _) = seeded();
        let addresses = [GENESIS_ADDRESS.to_string()];

        assert_eq!(
            query.balance(&addresses).unwrap(),
            AddressBalance {
                confirmed: 1000,
                tx_count: 4,
                utxo_count: 2,
                total_received: 1050,
                total_sent: 50,
            }
        );

        let history = query.history(&addresses, Some(25)).unwrap();
        assert_eq!(
            history.iter().map(|h| h.block_height).collect::<Vec<_>>(),
            vec![10, 20, 25]
        );
        assert!(history[2].spending);

        assert_eq!(query.txids(&addresses).unwrap().len(), 4);
        assert_eq!(query.indexed_tip().unwrap(), None);
    }

    #[test]
    fn test_invalid_address_is_an_error() {
        let (query, _) = seeded();
        assert!(matches!(
            query.utxos(&["bc1qinvalid".to_string()]),
            Err(Error::InvalidAddress(_))
        ));
    }
}

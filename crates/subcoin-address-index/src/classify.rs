//! Script classification and address text conversion.

use crate::keys::{AddressKey, AddressType};
use crate::{Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{Address, Network, PubkeyHash, Script, ScriptBuf, ScriptHash, WPubkeyHash};
use std::str::FromStr;

/// Scripts above this size are unspendable by consensus.
const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maps an output script to the address it pays, if the index supports that script kind.
pub trait ScriptClassifier: Send + Sync {
    /// Returns `None` for scripts that are not indexed.
    fn classify(&self, script: &Script) -> Option<AddressKey>;
}

/// Classifier recognising the standard P2PKH, P2SH and P2WPKH templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardScriptClassifier;

impl ScriptClassifier for StandardScriptClassifier {
    fn classify(&self, script: &Script) -> Option<AddressKey> {
        let bytes = script.as_bytes();
        let (address_type, payload) = if script.is_p2pkh() {
            // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
            (AddressType::P2pkh, &bytes[3..23])
        } else if script.is_p2sh() {
            // OP_HASH160 <20> OP_EQUAL
            (AddressType::P2sh, &bytes[2..22])
        } else if script.is_p2wpkh() {
            // OP_0 <20>
            (AddressType::P2wpkh, &bytes[2..22])
        } else {
            return None;
        };
        let mut hash = [0u8; 20];
        hash.copy_from_slice(payload);
        Some(AddressKey::new(address_type, hash))
    }
}

/// Whether an output can never be spent: `OP_RETURN` or oversized.
pub fn is_unspendable(script: &Script) -> bool {
    script.is_op_return() || script.len() > MAX_SCRIPT_SIZE
}

/// Rebuilds the locking script paying to `address`.
pub fn script_for(address: &AddressKey) -> ScriptBuf {
    match address.address_type {
        AddressType::P2pkh => ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(address.hash)),
        AddressType::P2sh => ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(address.hash)),
        AddressType::P2wpkh => ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(address.hash)),
    }
}

/// Converts between address text and [`AddressKey`] for one network.
#[derive(Debug, Clone, Copy)]
pub struct AddressCodec {
    network: Network,
}

impl AddressCodec {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Renders `address` as base58check (P2PKH, P2SH) or bech32 (P2WPKH) text.
    pub fn encode(&self, address: &AddressKey) -> Result<String> {
        Address::from_script(&script_for(address), self.network)
            .map(|address| address.to_string())
            .map_err(|err| Error::InvalidAddress(err.to_string()))
    }

    /// Parses address text of the configured network into the indexed form.
    pub fn decode(&self, text: &str) -> Result<AddressKey> {
        let address = Address::from_str(text)
            .map_err(|err| Error::InvalidAddress(format!("{text}: {err}")))?
            .require_network(self.network)
            .map_err(|err| Error::InvalidAddress(format!("{text}: {err}")))?;
        StandardScriptClassifier
            .classify(&address.script_pubkey())
            .ok_or_else(|| Error::InvalidAddress(format!("{text}: unsupported address type")))
    }
}

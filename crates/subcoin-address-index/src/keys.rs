//! Binary layout of the address index entries.
//!
//! Every key starts with a one byte family tag:
//!
//! - `a` history: `tag | type | hash160 | height (BE) | tx_index (BE) | txid | vout (LE) | spending`
//! - `u` unspent: `tag | type | hash160 | txid | vout (LE)`
//! - `B` best block: the last indexed block.
//!
//! Heights and in-block positions of history keys are big-endian so that the lexicographic
//! order of the keys under one address is the chronological order of the events.

use crate::serialize::{write_var_bytes, Reader};
use crate::{Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, ScriptBuf, Txid};
use serde::Serialize;

/// Family tag of the full history entries.
pub const HISTORY_TAG: u8 = b'a';
/// Family tag of the currently unspent entries.
pub const UNSPENT_TAG: u8 = b'u';
/// Key of the last indexed block.
pub const BEST_BLOCK_KEY: &[u8] = b"B";

/// Size of an encoded history key, tag included.
pub const HISTORY_KEY_SIZE: usize = 1 + ADDRESS_KEY_SIZE + 4 + 4 + 32 + 4 + 1;
/// Size of an encoded unspent key, tag excluded.
pub const UNSPENT_KEY_BODY_SIZE: usize = ADDRESS_KEY_SIZE + 32 + 4;
/// Size of an encoded unspent key, tag included.
pub const UNSPENT_KEY_SIZE: usize = 1 + UNSPENT_KEY_BODY_SIZE;

const ADDRESS_KEY_SIZE: usize = 1 + 20;

/// Amount marking an [`UnspentValue`] as null.
const NULL_AMOUNT: i64 = -1;

/// Kind of output script an index entry belongs to.
///
/// The discriminants are the `txnouttype` values Bitcoin Core's address index persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AddressType {
    /// Pay to public key hash.
    P2pkh = 2,
    /// Pay to script hash.
    P2sh = 3,
    /// Pay to witness v0 public key hash.
    P2wpkh = 7,
}

impl AddressType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AddressType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::P2pkh),
            3 => Ok(Self::P2sh),
            7 => Ok(Self::P2wpkh),
            other => Err(Error::UnknownAddressType(other)),
        }
    }
}

/// Identifies one indexed address: its script type and hash160 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressKey {
    pub address_type: AddressType,
    pub hash: [u8; 20],
}

impl AddressKey {
    pub fn new(address_type: AddressType, hash: [u8; 20]) -> Self {
        Self { address_type, hash }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.address_type.as_u8());
        out.extend_from_slice(&self.hash);
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        let address_type = AddressType::try_from(reader.read_u8()?)?;
        let hash = reader.take_array()?;
        Ok(Self { address_type, hash })
    }
}

/// Prefix shared by all history keys of `address`.
pub fn history_prefix(address: &AddressKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + ADDRESS_KEY_SIZE);
    out.push(HISTORY_TAG);
    address.write_to(&mut out);
    out
}

/// Prefix shared by all unspent keys of `address`.
pub fn unspent_prefix(address: &AddressKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + ADDRESS_KEY_SIZE);
    out.push(UNSPENT_TAG);
    address.write_to(&mut out);
    out
}

/// One receive or spend event of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryKey {
    pub address: AddressKey,
    pub block_height: u32,
    /// Position of the transaction in its block.
    pub tx_index: u32,
    pub txid: Txid,
    /// Output index for receives, input index for spends.
    pub output_index: u32,
    pub spending: bool,
}

impl HistoryKey {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HISTORY_KEY_SIZE);
        out.push(HISTORY_TAG);
        self.address.write_to(&mut out);
        out.extend_from_slice(&self.block_height.to_be_bytes());
        out.extend_from_slice(&self.tx_index.to_be_bytes());
        out.extend_from_slice(self.txid.as_byte_array());
        out.extend_from_slice(&self.output_index.to_le_bytes());
        out.push(self.spending as u8);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HISTORY_KEY_SIZE {
            return Err(Error::Decode(format!(
                "history key is {HISTORY_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut reader = Reader::new(bytes);
        expect_tag(&mut reader, HISTORY_TAG)?;
        let address = AddressKey::read_from(&mut reader)?;
        let block_height = reader.read_u32_be()?;
        let tx_index = reader.read_u32_be()?;
        let txid = Txid::from_byte_array(reader.take_array()?);
        let output_index = reader.read_u32_le()?;
        let spending = match reader.read_u8()? {
            0 => false,
            1 => true,
            other => return Err(Error::Decode(format!("invalid spending flag {other}"))),
        };
        reader.finish()?;
        Ok(Self {
            address,
            block_height,
            tx_index,
            txid,
            output_index,
            spending,
        })
    }
}

/// Amount stored under a [`HistoryKey`].
pub fn encode_history_value(amount: i64) -> [u8; 8] {
    amount.to_le_bytes()
}

pub fn decode_history_value(bytes: &[u8]) -> Result<i64> {
    let mut reader = Reader::new(bytes);
    let amount = reader.read_i64_le()?;
    reader.finish()?;
    Ok(amount)
}

/// An output currently unspent by an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnspentKey {
    pub address: AddressKey,
    pub txid: Txid,
    pub output_index: u32,
}

impl UnspentKey {
    /// Key body without the family tag, as it is sent over the wire.
    pub fn encode_body(&self, out: &mut Vec<u8>) {
        self.address.write_to(out);
        out.extend_from_slice(self.txid.as_byte_array());
        out.extend_from_slice(&self.output_index.to_le_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UNSPENT_KEY_SIZE);
        out.push(UNSPENT_TAG);
        self.encode_body(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != UNSPENT_KEY_SIZE {
            return Err(Error::Decode(format!(
                "unspent key is {UNSPENT_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut reader = Reader::new(bytes);
        expect_tag(&mut reader, UNSPENT_TAG)?;
        let key = Self::read_body(&mut reader)?;
        reader.finish()?;
        Ok(key)
    }

    /// Reads a key body written by [`Self::encode_body`].
    pub fn read_body(reader: &mut Reader<'_>) -> Result<Self> {
        let address = AddressKey::read_from(reader)?;
        let txid = Txid::from_byte_array(reader.take_array()?);
        let output_index = reader.read_u32_le()?;
        Ok(Self {
            address,
            txid,
            output_index,
        })
    }
}

/// Amount, locking script and confirmation height of an unspent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentValue {
    /// Amount in satoshis, `-1` for the null value.
    pub amount: i64,
    pub script: ScriptBuf,
    pub block_height: u32,
}

impl UnspentValue {
    pub fn new(amount: i64, script: ScriptBuf, block_height: u32) -> Self {
        Self {
            amount,
            script,
            block_height,
        }
    }

    /// The tombstone value. Writers erase the key instead of storing it.
    pub fn null() -> Self {
        Self {
            amount: NULL_AMOUNT,
            script: ScriptBuf::new(),
            block_height: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.amount == NULL_AMOUNT
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.amount.to_le_bytes());
        write_var_bytes(out, self.script.as_bytes()).expect("Writing to Vec never fails; qed");
        out.extend_from_slice(&self.block_height.to_le_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 1 + self.script.len() + 4);
        self.encode_into(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let value = Self::read_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }

    pub fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        let amount = reader.read_i64_le()?;
        let script = ScriptBuf::from_bytes(reader.read_var_bytes()?.to_vec());
        let block_height = reader.read_u32_le()?;
        Ok(Self {
            amount,
            script,
            block_height,
        })
    }
}

/// Encodes the last indexed block: `height (LE) | block hash`.
pub fn encode_best_block(height: u32, hash: &BlockHash) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 32);
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(hash.as_byte_array());
    out
}

pub fn decode_best_block(bytes: &[u8]) -> Result<(u32, BlockHash)> {
    let mut reader = Reader::new(bytes);
    let height = reader.read_u32_le()?;
    let hash = BlockHash::from_byte_array(reader.take_array()?);
    reader.finish()?;
    Ok((height, hash))
}

fn expect_tag(reader: &mut Reader<'_>, tag: u8) -> Result<()> {
    match reader.read_u8()? {
        t if t == tag => Ok(()),
        t => Err(Error::Decode(format!(
            "unexpected family tag {:?}, expected {:?}",
            t as char, tag as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(address_type: AddressType, byte: u8) -> AddressKey {
        AddressKey::new(address_type, [byte; 20])
    }

    fn history_key(block_height: u32, tx_index: u32) -> HistoryKey {
        HistoryKey {
            address: address(AddressType::P2pkh, 0xab),
            block_height,
            tx_index,
            txid: Txid::from_byte_array([7u8; 32]),
            output_index: 3,
            spending: true,
        }
    }

    #[test]
    fn test_history_key_roundtrip() {
        let key = history_key(840_000, 12);
        let encoded = key.encode();
        assert_eq!(encoded.len(), HISTORY_KEY_SIZE);
        assert_eq!(encoded[0], HISTORY_TAG);
        assert_eq!(HistoryKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn test_unspent_key_roundtrip() {
        let key = UnspentKey {
            address: address(AddressType::P2wpkh, 0x11),
            txid: Txid::from_byte_array([9u8; 32]),
            output_index: 70_000,
        };
        let encoded = key.encode();
        assert_eq!(encoded.len(), UNSPENT_KEY_SIZE);
        assert_eq!(UnspentKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn test_unspent_value_roundtrip() {
        let value = UnspentValue::new(5000, ScriptBuf::from_bytes(vec![0x51; 300]), 100);
        assert_eq!(UnspentValue::decode(&value.encode()).unwrap(), value);
    }

    #[test]
    fn test_height_is_big_endian_in_keys() {
        // 255 < 256 numerically, but 0xff > 0x00 on the lowest byte with little-endian.
        let low = history_key(255, 9).encode();
        let high = history_key(256, 0).encode();
        assert!(low < high);

        let same_height_first = history_key(1_000, 1).encode();
        let same_height_second = history_key(1_000, 256).encode();
        assert!(same_height_first < same_height_second);
    }

    #[test]
    fn test_keys_of_one_address_share_the_prefix() {
        let key = history_key(1, 0);
        assert!(key.encode().starts_with(&history_prefix(&key.address)));

        let unspent = UnspentKey {
            address: key.address,
            txid: key.txid,
            output_index: 0,
        };
        assert!(unspent.encode().starts_with(&unspent_prefix(&key.address)));
        assert_ne!(history_prefix(&key.address), unspent_prefix(&key.address));
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let encoded = history_key(1, 0).encode();
        assert!(matches!(
            HistoryKey::decode(&encoded[..encoded.len() - 1]),
            Err(Error::Decode(_))
        ));
        assert!(UnspentKey::decode(&encoded).is_err());
        assert!(decode_history_value(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_unknown_address_type_is_rejected() {
        let mut encoded = history_key(1, 0).encode();
        encoded[1] = 4;
        assert!(matches!(
            HistoryKey::decode(&encoded),
            Err(Error::UnknownAddressType(4))
        ));
    }

    #[test]
    fn test_null_value() {
        assert!(UnspentValue::null().is_null());
        assert!(!UnspentValue::new(0, ScriptBuf::new(), 1).is_null());
    }
}

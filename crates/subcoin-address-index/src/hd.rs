//! Address derivation from an account level extended public key.

use crate::classify::AddressCodec;
use crate::keys::{AddressKey, AddressType};
use crate::{Error, Result};
use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{Network, NetworkKind};
use std::str::FromStr;

/// Length of a base58check encoded extended public key.
pub const XPUB_SIZE: usize = 111;

/// Receive or change branch of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    External,
    Internal,
}

impl Chain {
    pub fn from_internal(internal: bool) -> Self {
        if internal {
            Self::Internal
        } else {
            Self::External
        }
    }

    fn child_index(self) -> u32 {
        match self {
            Self::External => 0,
            Self::Internal => 1,
        }
    }
}

/// Textual form of the addresses derived from the same public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum AddressEncoding {
    /// Base58check pay-to-public-key-hash.
    Legacy,
    /// Bech32 pay-to-witness-public-key-hash.
    SegwitV0,
}

impl AddressEncoding {
    fn address_type(self) -> AddressType {
        match self {
            Self::Legacy => AddressType::P2pkh,
            Self::SegwitV0 => AddressType::P2wpkh,
        }
    }
}

/// Chain level key obtained from [`HdPublicDeriver::derive_chain_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainKey {
    pub chain: Chain,
    xpub: Xpub,
}

/// Derives the receive and change addresses of an account xpub.
pub struct HdPublicDeriver {
    xpub: Xpub,
    codec: AddressCodec,
    secp: Secp256k1<VerifyOnly>,
}

impl HdPublicDeriver {
    /// Parses `xpub`, failing with [`Error::InvalidXpub`] if it is malformed or
    /// belongs to another network.
    pub fn new(xpub: &str, network: Network) -> Result<Self> {
        let xpub = Xpub::from_str(xpub.trim()).map_err(|err| Error::InvalidXpub(err.to_string()))?;

        if xpub.network != NetworkKind::from(network) {
            return Err(Error::InvalidXpub(format!(
                "key is for {:?}, index is {network}",
                xpub.network
            )));
        }

        Ok(Self {
            xpub,
            codec: AddressCodec::new(network),
            secp: Secp256k1::verification_only(),
        })
    }

    /// Parses the ASCII bytes of an xpub.
    pub fn from_bytes(xpub: &[u8], network: Network) -> Result<Self> {
        let text = std::str::from_utf8(xpub)
            .map_err(|_| Error::InvalidXpub("not valid UTF-8".to_string()))?;
        Self::new(text, network)
    }

    pub fn xpub(&self) -> &Xpub {
        &self.xpub
    }

    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    /// One non-hardened step: `0` for receive addresses, `1` for change.
    pub fn derive_chain_key(&self, chain: Chain) -> Result<ChainKey> {
        let child = ChildNumber::from_normal_idx(chain.child_index())?;
        Ok(ChainKey {
            chain,
            xpub: self.xpub.ckd_pub(&self.secp, child)?,
        })
    }

    /// Derives the index keys of `count` addresses starting at `start`.
    pub fn derive_address_keys(
        &self,
        chain_key: &ChainKey,
        start: u32,
        count: u32,
        encoding: AddressEncoding,
    ) -> Result<Vec<AddressKey>> {
        let end = start.checked_add(count).ok_or_else(|| {
            Error::Bip32(bitcoin::bip32::Error::InvalidChildNumber(start))
        })?;

        (start..end)
            .map(|index| -> Result<AddressKey> {
                let child = chain_key
                    .xpub
                    .ckd_pub(&self.secp, ChildNumber::from_normal_idx(index)?)?;
                let hash = hash160::Hash::hash(&child.public_key.serialize()).to_byte_array();
                Ok(AddressKey::new(encoding.address_type(), hash))
            })
            .collect()
    }

    /// Derives `count` address strings starting at `start`.
    pub fn derive_addresses(
        &self,
        chain_key: &ChainKey,
        start: u32,
        count: u32,
        encoding: AddressEncoding,
    ) -> Result<Vec<String>> {
        self.derive_address_keys(chain_key, start, count, encoding)?
            .iter()
            .map(|key| self.codec.encode(key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP32 test vector 1, master public key.
    const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn derive(internal: bool, encoding: AddressEncoding) -> Vec<String> {
        let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();
        let chain_key = deriver
            .derive_chain_key(Chain::from_internal(internal))
            .unwrap();
        deriver.derive_addresses(&chain_key, 0, 5, encoding).unwrap()
    }

    #[test]
    fn test_xpub_is_base58_of_fixed_size() {
        assert_eq!(XPUB.len(), XPUB_SIZE);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let first = derive(false, AddressEncoding::Legacy);
        assert_eq!(first, derive(false, AddressEncoding::Legacy));
        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|address| address.starts_with('1')));

        assert_ne!(first, derive(true, AddressEncoding::Legacy));

        let segwit = derive(false, AddressEncoding::SegwitV0);
        assert_ne!(first, segwit);
        assert!(segwit.iter().all(|address| address.starts_with("bc1q")));
    }

    #[test]
    fn test_encodings_share_the_key_hash() {
        let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();
        let chain_key = deriver.derive_chain_key(Chain::External).unwrap();
        let legacy = deriver
            .derive_address_keys(&chain_key, 3, 2, AddressEncoding::Legacy)
            .unwrap();
        let segwit = deriver
            .derive_address_keys(&chain_key, 3, 2, AddressEncoding::SegwitV0)
            .unwrap();
        assert_eq!(legacy[0].hash, segwit[0].hash);
        assert_ne!(legacy[0].hash, legacy[1].hash);

        let from_start = deriver
            .derive_address_keys(&chain_key, 0, 5, AddressEncoding::Legacy)
            .unwrap();
        assert_eq!(&from_start[3..], &legacy[..]);
    }

    #[test]
    fn test_invalid_xpub() {
        assert!(matches!(
            HdPublicDeriver::new("xpub-not-really", Network::Bitcoin),
            Err(Error::InvalidXpub(_))
        ));
        assert!(matches!(
            HdPublicDeriver::new(XPUB, Network::Testnet),
            Err(Error::InvalidXpub(_))
        ));
        assert!(matches!(
            HdPublicDeriver::from_bytes(&[0xff; XPUB_SIZE], Network::Bitcoin),
            Err(Error::InvalidXpub(_))
        ));
    }

    #[test]
    fn test_hardened_range_is_rejected() {
        let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();
        let chain_key = deriver.derive_chain_key(Chain::External).unwrap();
        assert!(deriver
            .derive_address_keys(&chain_key, (1 << 31) - 1, 2, AddressEncoding::SegwitV0)
            .is_err());
    }
}

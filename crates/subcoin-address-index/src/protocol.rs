//! Binary command protocol over the address index.
//!
//! A request is a command byte followed by a fixed size payload:
//!
//! | Command | Payload                                            |
//! |---------|----------------------------------------------------|
//! | `G`     | `start (u32 LE) | count (u32 LE) | xpub (111 bytes)` |
//! | `R`     | `xpub (111 bytes)`                                 |
//! | `T`     | `xpub (111 bytes)`                                 |
//!
//! A response starts with [`STATUS_OK`] followed by the command's body, or with
//! [`STATUS_ERROR`] followed by `code (u8) | message (CompactSize prefixed UTF-8)`.

use crate::hd::{AddressEncoding, Chain, HdPublicDeriver, XPUB_SIZE};
use crate::indexer::TransactionIndex;
use crate::keys::{UnspentKey, UnspentValue};
use crate::recovery::AddressRecoveryScanner;
use crate::serialize::{write_compact_size, write_var_bytes, Reader};
use crate::Error;
use bitcoin::{consensus, Network, Transaction};
use std::sync::Arc;

/// Leading byte of a successful response.
pub const STATUS_OK: u8 = 0x00;
/// Leading byte of an error response.
pub const STATUS_ERROR: u8 = 0x01;

/// Payload size of a `G` request.
pub const GENERATE_PAYLOAD_SIZE: usize = 4 + 4 + XPUB_SIZE;

/// Maximum number of addresses a single `G` request may derive.
pub const MAX_GENERATE_COUNT: u32 = 10_000;

/// Request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Derive receive addresses.
    Generate,
    /// Recover the unspent outputs of an xpub.
    Recover,
    /// Recover the transactions of an xpub.
    RecoverTxs,
}

impl Command {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Generate => b'G',
            Self::Recover => b'R',
            Self::RecoverTxs => b'T',
        }
    }

    fn payload_size(self) -> usize {
        match self {
            Self::Generate => GENERATE_PAYLOAD_SIZE,
            Self::Recover | Self::RecoverTxs => XPUB_SIZE,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'G' => Ok(Self::Generate),
            b'R' => Ok(Self::Recover),
            b'T' => Ok(Self::RecoverTxs),
            other => Err(ProtocolError::CommandNotFound(other)),
        }
    }
}

/// Request rejection, encoded into the error response.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Empty request")]
    EmptyRequest,

    #[error("Command '{command}' expects a {expected} byte payload, got {actual}")]
    PayloadSize {
        command: char,
        expected: usize,
        actual: usize,
    },

    #[error("Requested {requested} addresses, at most {max} allowed")]
    CountTooLarge { requested: u32, max: u32 },

    #[error("Command not found: 0x{0:02x}")]
    CommandNotFound(u8),

    #[error("Transaction index not enabled")]
    TxIndexNotEnabled,

    #[error("Invalid extended public key: {0}")]
    InvalidXpub(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Wire error code.
    pub fn code(&self) -> u8 {
        match self {
            Self::EmptyRequest => 1,
            Self::PayloadSize { .. } | Self::CountTooLarge { .. } => 2,
            Self::CommandNotFound(_) => 3,
            Self::TxIndexNotEnabled => 4,
            Self::InvalidXpub(_) => 5,
            Self::Internal(_) => 6,
        }
    }
}

impl From<Error> for ProtocolError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidXpub(reason) => Self::InvalidXpub(reason),
            err => Self::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Decoded response, for callers of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Addresses(Vec<String>),
    Utxos(Vec<(UnspentKey, UnspentValue)>),
    Transactions(Vec<Transaction>),
    Error { code: u8, message: String },
}

impl Response {
    /// Decodes the response to a request of `command`.
    pub fn decode(command: Command, bytes: &[u8]) -> crate::Result<Self> {
        let mut reader = Reader::new(bytes);

        let response = match reader.read_u8()? {
            STATUS_ERROR => {
                let code = reader.read_u8()?;
                let message = String::from_utf8_lossy(reader.read_var_bytes()?).into_owned();
                Self::Error { code, message }
            }
            STATUS_OK => match command {
                Command::Generate => {
                    let count = reader.read_compact_size()?;
                    let addresses = (0..count)
                        .map(|_| -> crate::Result<String> {
                            let bytes = reader.read_var_bytes()?;
                            String::from_utf8(bytes.to_vec())
                                .map_err(|err| Error::Decode(err.to_string()))
                        })
                        .collect::<crate::Result<Vec<_>>>()?;
                    Self::Addresses(addresses)
                }
                Command::Recover => {
                    let count = reader.read_u32_le()?;
                    let utxos = (0..count)
                        .map(|_| -> crate::Result<_> {
                            Ok((
                                UnspentKey::read_body(&mut reader)?,
                                UnspentValue::read_from(&mut reader)?,
                            ))
                        })
                        .collect::<crate::Result<Vec<_>>>()?;
                    Self::Utxos(utxos)
                }
                Command::RecoverTxs => {
                    let count = reader.read_u32_le()?;
                    let mut txs = Vec::with_capacity(count.min(1024) as usize);
                    for _ in 0..count {
                        let remaining = reader.take(reader.remaining())?;
                        let (tx, consumed): (Transaction, usize) =
                            consensus::deserialize_partial(remaining)
                                .map_err(|err| Error::Decode(err.to_string()))?;
                        reader = Reader::new(&remaining[consumed..]);
                        txs.push(tx);
                    }
                    Self::Transactions(txs)
                }
            },
            other => return Err(Error::Decode(format!("unknown response status {other}"))),
        };

        reader.finish()?;

        Ok(response)
    }
}

/// Serves address generation and recovery requests.
pub struct WireCommandProtocol {
    scanner: AddressRecoveryScanner,
    network: Network,
    tx_index: Option<Arc<dyn TransactionIndex>>,
}

impl WireCommandProtocol {
    pub fn new(
        scanner: AddressRecoveryScanner,
        network: Network,
        tx_index: Option<Arc<dyn TransactionIndex>>,
    ) -> Self {
        Self {
            scanner,
            network,
            tx_index,
        }
    }

    /// Handles one request frame. Failures are reported in the response, never returned.
    pub fn handle(&self, request: &[u8]) -> Vec<u8> {
        match self.dispatch(request) {
            Ok(body) => {
                let mut response = Vec::with_capacity(1 + body.len());
                response.push(STATUS_OK);
                response.extend(body);
                response
            }
            Err(err) => {
                tracing::debug!(code = err.code(), "Rejected request: {err}");
                encode_error(&err)
            }
        }
    }

    fn dispatch(&self, request: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let (&command, payload) = request.split_first().ok_or(ProtocolError::EmptyRequest)?;
        let command = Command::try_from(command)?;

        if payload.len() != command.payload_size() {
            return Err(ProtocolError::PayloadSize {
                command: command.as_byte() as char,
                expected: command.payload_size(),
                actual: payload.len(),
            });
        }

        match command {
            Command::Generate => self.generate(payload),
            Command::Recover => self.recover(payload),
            Command::RecoverTxs => self.recover_txs(payload),
        }
    }

    fn generate(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut reader = Reader::new(payload);
        let start = reader.read_u32_le()?;
        let count = reader.read_u32_le()?;

        if count > MAX_GENERATE_COUNT {
            return Err(ProtocolError::CountTooLarge {
                requested: count,
                max: MAX_GENERATE_COUNT,
            });
        }

        let deriver = HdPublicDeriver::from_bytes(reader.take(XPUB_SIZE)?, self.network)?;
        let chain_key = deriver.derive_chain_key(Chain::External)?;
        let addresses =
            deriver.derive_addresses(&chain_key, start, count, AddressEncoding::SegwitV0)?;

        let mut body = Vec::new();
        write_compact_size(&mut body, addresses.len() as u64)?;
        for address in &addresses {
            write_var_bytes(&mut body, address.as_bytes())?;
        }
        Ok(body)
    }

    fn recover(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let deriver = HdPublicDeriver::from_bytes(payload, self.network)?;
        let recovered = self.scanner.recover_utxos(&deriver)?;

        let mut body = Vec::new();
        body.extend_from_slice(&(recovered.utxos.len() as u32).to_le_bytes());
        for (key, value) in &recovered.utxos {
            key.encode_body(&mut body);
            value.encode_into(&mut body);
        }
        Ok(body)
    }

    fn recover_txs(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let tx_index = self
            .tx_index
            .as_ref()
            .ok_or(ProtocolError::TxIndexNotEnabled)?;

        let deriver = HdPublicDeriver::from_bytes(payload, self.network)?;
        let txids = self.scanner.recover_txs(&deriver)?;

        let mut count = 0u32;
        let mut txs = Vec::new();
        for txid in &txids {
            match tx_index.find_transaction(txid)? {
                Some((_block_hash, tx)) => {
                    txs.extend(consensus::serialize(&tx));
                    count += 1;
                }
                None => tracing::debug!(%txid, "Recovered transaction missing from the index"),
            }
        }

        let mut body = Vec::with_capacity(4 + txs.len());
        body.extend_from_slice(&count.to_le_bytes());
        body.extend(txs);
        Ok(body)
    }
}

fn encode_error(err: &ProtocolError) -> Vec<u8> {
    let message = err.to_string();
    let mut response = Vec::with_capacity(2 + 9 + message.len());
    response.push(STATUS_ERROR);
    response.push(err.code());
    write_var_bytes(&mut response, message.as_bytes()).expect("Writing to Vec never fails; qed");
    response
}

/// Builds a `G` request.
pub fn generate_request(start: u32, count: u32, xpub: &str) -> Vec<u8> {
    let mut request = Vec::with_capacity(1 + GENERATE_PAYLOAD_SIZE);
    request.push(Command::Generate.as_byte());
    request.extend_from_slice(&start.to_le_bytes());
    request.extend_from_slice(&count.to_le_bytes());
    request.extend_from_slice(xpub.as_bytes());
    request
}

/// Builds an `R` or `T` request.
pub fn xpub_request(command: Command, xpub: &str) -> Vec<u8> {
    let mut request = Vec::with_capacity(1 + XPUB_SIZE);
    request.push(command.as_byte());
    request.extend_from_slice(xpub.as_bytes());
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::InMemTransactionIndex;
    use crate::store::AddressIndexStore;

    const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn protocol(tx_index: Option<Arc<dyn TransactionIndex>>) -> WireCommandProtocol {
        let scanner = AddressRecoveryScanner::new(Arc::new(AddressIndexStore::in_mem()));
        WireCommandProtocol::new(scanner, Network::Bitcoin, tx_index)
    }

    fn error_of(command: Command, response: &[u8]) -> (u8, String) {
        match Response::decode(command, response).unwrap() {
            Response::Error { code, message } => (code, message),
            other => panic!("Expected an error response, got {other:?}"),
        }
    }

    #[test]
    fn test_generate() {
        let protocol = protocol(None);
        let request = generate_request(2, 3, XPUB);
        assert_eq!(request.len(), 1 + 119);

        let response = protocol.handle(&request);
        let Response::Addresses(addresses) = Response::decode(Command::Generate, &response).unwrap()
        else {
            panic!("Expected addresses");
        };

        let deriver = HdPublicDeriver::new(XPUB, Network::Bitcoin).unwrap();
        let chain_key = deriver.derive_chain_key(Chain::External).unwrap();
        assert_eq!(
            addresses,
            deriver
                .derive_addresses(&chain_key, 2, 3, AddressEncoding::SegwitV0)
                .unwrap()
        );
    }

    #[test]
    fn test_generate_with_wrong_payload_length() {
        let protocol = protocol(None);
        let mut request = generate_request(0, 5, XPUB);
        request.pop();

        let response = protocol.handle(&request);
        let (code, message) = error_of(Command::Generate, &response);
        assert_eq!(code, 2);
        assert!(message.contains("119"), "{message}");
        assert!(message.contains("118"), "{message}");
    }

    #[test]
    fn test_generate_count_is_capped() {
        let protocol = protocol(None);
        let response = protocol.handle(&generate_request(0, MAX_GENERATE_COUNT + 1, XPUB));
        assert_eq!(error_of(Command::Generate, &response).0, 2);
    }

    #[test]
    fn test_recover_txs_without_tx_index() {
        let protocol = protocol(None);
        let response = protocol.handle(&xpub_request(Command::RecoverTxs, XPUB));
        assert_eq!(
            error_of(Command::RecoverTxs, &response),
            (4, "Transaction index not enabled".to_string())
        );
    }

    #[test]
    fn test_malformed_requests() {
        let protocol = protocol(None);

        assert_eq!(error_of(Command::Recover, &protocol.handle(&[])).0, 1);

        let (code, message) = error_of(Command::Recover, &protocol.handle(b"Zabc"));
        assert_eq!(code, 3);
        assert!(message.contains("0x5a"), "{message}");

        let bad_xpub = xpub_request(Command::Recover, &"x".repeat(XPUB_SIZE));
        assert_eq!(error_of(Command::Recover, &protocol.handle(&bad_xpub)).0, 5);
    }

    #[test]
    fn test_empty_recoveries() {
        let protocol = protocol(Some(Arc::new(InMemTransactionIndex::new())));

        let response = protocol.handle(&xpub_request(Command::Recover, XPUB));
        assert_eq!(response, vec![STATUS_OK, 0, 0, 0, 0]);

        let response = protocol.handle(&xpub_request(Command::RecoverTxs, XPUB));
        assert_eq!(
            Response::decode(Command::RecoverTxs, &response).unwrap(),
            Response::Transactions(Vec::new())
        );
    }
}

use alloy_rlp::{BufMut, Encodable, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

pub use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

/// Length of the vanity prefix at the start of a header's extra data.
pub const EXTRA_VANITY: usize = 32;
/// Length of the producer seal stored right after the vanity prefix.
pub const EXTRA_SEAL: usize = 65;

/// Returns true if `extra` carries an unsigned seal, which marks a block the
/// local worker is still producing.
pub fn is_worker_extra(extra: &[u8]) -> bool {
    extra
        .get(EXTRA_VANITY..EXTRA_VANITY + EXTRA_SEAL)
        .is_some_and(|seal| seal.iter().all(|b| *b == 0))
}

/// Immutable block metadata as handed over by the chain layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    parent_hash: B256,
    coinbase: Address,
    number: u64,
    gas_limit: u64,
    time: u64,
    #[serde(default)]
    extra: Bytes,
    #[serde(default)]
    nonce: Bytes,
    #[serde(skip)]
    hash: OnceLock<B256>,
}

impl BlockHeader {
    pub fn new(number: u64, parent_hash: B256) -> Self {
        Self {
            number,
            parent_hash,
            ..Default::default()
        }
    }

    pub fn with_coinbase(mut self, coinbase: Address) -> Self {
        self.coinbase = coinbase;
        self.hash = OnceLock::new();
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self.hash = OnceLock::new();
        self
    }

    pub fn with_time(mut self, time: u64) -> Self {
        self.time = time;
        self.hash = OnceLock::new();
        self
    }

    pub fn with_extra(mut self, extra: impl Into<Bytes>) -> Self {
        self.extra = extra.into();
        self.hash = OnceLock::new();
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<Bytes>) -> Self {
        self.nonce = nonce.into();
        self.hash = OnceLock::new();
        self
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn parent_hash(&self) -> B256 {
        self.parent_hash
    }

    pub fn coinbase(&self) -> Address {
        self.coinbase
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn extra(&self) -> &Bytes {
        &self.extra
    }

    pub fn nonce(&self) -> &Bytes {
        &self.nonce
    }

    pub fn is_worker(&self) -> bool {
        is_worker_extra(&self.extra)
    }

    /// Keccak hash of the RLP encoded header, computed on first use.
    pub fn hash(&self) -> B256 {
        *self.hash.get_or_init(|| keccak256(alloy_rlp::encode(self)))
    }

    fn payload_length(&self) -> usize {
        self.parent_hash.length()
            + self.coinbase.length()
            + self.number.length()
            + self.gas_limit.length()
            + self.time.length()
            + self.extra.length()
            + self.nonce.length()
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, out: &mut dyn BufMut) {
        alloy_rlp::Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.parent_hash.encode(out);
        self.coinbase.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.time.encode(out);
        self.extra.encode(out);
        self.nonce.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<Bytes>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Bytes>) -> Self {
        Self {
            header,
            transactions,
        }
    }
}

impl From<BlockHeader> for Block {
    fn from(header: BlockHeader) -> Self {
        Self::new(header, Vec::new())
    }
}

/// A value transfer performed while executing a block.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct TransferItem {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

impl TransferItem {
    pub fn new(from: Address, to: Address, amount: U256) -> Self {
        Self { from, to, amount }
    }
}

/// Outcome of executing one block, persisted by the stats store.
///
/// Records are replaced as a whole on every write.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    RlpEncodable,
    RlpDecodable,
)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub gas_used: u64,
    pub tx_count: u64,
    pub transfers: Vec<TransferItem>,
}

impl ExecutionStats {
    pub fn new(gas_used: u64, tx_count: u64) -> Self {
        Self {
            gas_used,
            tx_count,
            transfers: Vec::new(),
        }
    }

    pub fn record_transfer(&mut self, from: Address, to: Address, amount: U256) {
        self.transfers.push(TransferItem::new(from, to, amount));
    }
}

use super::{BalanceLedger, ChainView, ConsensusEngine, TransactionMessage};
use crate::types::{Address, Block, BlockHeader, B256, U256};
use ahash::AHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Chain kept entirely in memory, indexed by `(hash, number)`.
///
/// Acts as its own consensus engine and counts every lookup it serves.
#[derive(Debug, Default)]
pub struct MemoryChain {
    blocks: AHashMap<(B256, u64), Arc<Block>>,
    lookups: AtomicUsize,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_headers(headers: impl IntoIterator<Item = BlockHeader>) -> Self {
        let mut chain = Self::new();
        for header in headers {
            chain.insert(header.into());
        }
        chain
    }

    pub fn insert(&mut self, block: Block) {
        let key = (block.header.hash(), block.header.number());
        self.blocks.insert(key, Arc::new(block));
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of engine lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl ConsensusEngine for MemoryChain {
    fn block_by_hash_and_number(&self, hash: B256, number: u64) -> Option<Arc<Block>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.blocks.get(&(hash, number)).cloned()
    }
}

impl ChainView for MemoryChain {
    type Engine = Self;

    fn engine(&self) -> &Self {
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    inner: Arc<Mutex<AHashMap<Address, U256>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances(balances: impl IntoIterator<Item = (Address, U256)>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(balances.into_iter().collect())),
        }
    }

    pub fn set_balance(&mut self, address: Address, amount: U256) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, amount);
    }
}

impl BalanceLedger for MemoryLedger {
    fn balance_of(&self, address: Address) -> U256 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    // Saturates at zero; callers check `can_transfer` first.
    fn decrease_balance(&mut self, address: Address, amount: U256) {
        let mut balances = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry(address).or_default();
        *balance = balance.saturating_sub(amount);
    }

    fn increase_balance(&mut self, address: Address, amount: U256) {
        let mut balances = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }
}

/// Minimal transaction message carrying what the context reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub from: Address,
    pub gas_price: U256,
}

impl Message {
    pub fn new(from: Address, gas_price: U256) -> Self {
        Self { from, gas_price }
    }
}

impl TransactionMessage for Message {
    fn sender(&self) -> Address {
        self.from
    }

    fn gas_price(&self) -> U256 {
        self.gas_price
    }
}

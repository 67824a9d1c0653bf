//! Capabilities the execution context consumes from the surrounding node.
//!
//! Each trait exposes only the calls context construction and the transfer
//! rules make; the node supplies the real implementations.

use crate::types::{Address, Block, B256, U256};
use std::sync::Arc;

pub mod memory;
pub use memory::{MemoryChain, MemoryLedger, Message};

/// Block lookup mediated by the active consensus engine.
pub trait ConsensusEngine {
    fn block_by_hash_and_number(&self, hash: B256, number: u64) -> Option<Arc<Block>>;
}

/// Read-only view of the committed chain.
pub trait ChainView {
    type Engine: ConsensusEngine + ?Sized;

    /// The consensus engine currently driving the chain.
    fn engine(&self) -> &Self::Engine;
}

/// Account balances as seen by the state layer.
///
/// Implementations serialize `decrease_balance`/`increase_balance` against
/// concurrent readers; nothing here adds locking.
pub trait BalanceLedger {
    fn balance_of(&self, address: Address) -> U256;
    fn decrease_balance(&mut self, address: Address, amount: U256);
    fn increase_balance(&mut self, address: Address, amount: U256);
}

pub trait TransactionMessage {
    fn sender(&self) -> Address;
    fn gas_price(&self) -> U256;
}

use super::{can_transfer, transfer, ContextError, HistoryResolver};
use crate::chain::{BalanceLedger, ChainView, TransactionMessage};
use crate::types::{Address, BlockHeader, Bytes, B256, U256};
use std::fmt;
use tracing::trace;

pub type CanTransferFn = fn(&dyn BalanceLedger, Address, U256) -> bool;
pub type TransferFn = fn(&mut dyn BalanceLedger, Address, Address, U256);

/// Environment the interpreter consults while executing one transaction.
pub struct ExecutionContext<'a, C: ChainView + ?Sized> {
    /// Checks that an account can cover a value transfer.
    pub can_transfer: CanTransferFn,
    /// Moves value between two accounts.
    pub transfer: TransferFn,
    /// Ancestor hash and nonce lookups.
    pub history: HistoryResolver<'a, C>,

    pub origin: Address,
    pub coinbase: Address,
    pub block_number: u64,
    pub time: u64,
    pub gas_limit: u64,
    pub gas_price: U256,
    /// Zero while the local worker is still sealing the block.
    pub block_hash: B256,
    /// Always zero. Contracts reading the difficulty opcode rely on it.
    pub difficulty: U256,
    pub nonce: Bytes,
    pub parent_hash: B256,
}

impl<'a, C: ChainView + ?Sized> ExecutionContext<'a, C> {
    pub fn get_hash(&mut self, number: u64) -> Result<B256, ContextError> {
        self.history.resolve_hash(number)
    }

    pub fn get_nonce(&mut self, number: u64) -> Result<Option<Bytes>, ContextError> {
        self.history.resolve_nonce(number)
    }
}

impl<C: ChainView + ?Sized> fmt::Debug for ExecutionContext<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("history", &self.history)
            .field("origin", &self.origin)
            .field("coinbase", &self.coinbase)
            .field("block_number", &self.block_number)
            .field("time", &self.time)
            .field("gas_limit", &self.gas_limit)
            .field("gas_price", &self.gas_price)
            .field("block_hash", &self.block_hash)
            .field("difficulty", &self.difficulty)
            .field("nonce", &self.nonce)
            .field("parent_hash", &self.parent_hash)
            .finish_non_exhaustive()
    }
}

/// Builds execution contexts for transactions against one chain view.
#[derive(Debug)]
pub struct ExecutionContextBuilder<'a, C: ChainView + ?Sized> {
    chain: &'a C,
}

impl<'a, C: ChainView + ?Sized> ExecutionContextBuilder<'a, C> {
    pub fn new(chain: &'a C) -> Self {
        Self { chain }
    }

    pub fn build<M: TransactionMessage + ?Sized>(
        &self,
        msg: &M,
        header: &'a BlockHeader,
    ) -> Result<ExecutionContext<'a, C>, ContextError> {
        let history = HistoryResolver::new(header, self.chain)?;

        let block_hash = if header.is_worker() {
            B256::ZERO
        } else {
            header.hash()
        };

        let origin = msg.sender();
        trace!(
            number = header.number(),
            %origin,
            worker = header.is_worker(),
            "building execution context"
        );

        Ok(ExecutionContext {
            can_transfer,
            transfer,
            history,
            origin,
            coinbase: header.coinbase(),
            block_number: header.number(),
            time: header.time(),
            gas_limit: header.gas_limit(),
            gas_price: msg.gas_price(),
            block_hash,
            difficulty: U256::ZERO,
            nonce: header.nonce().clone(),
            parent_hash: header.parent_hash(),
        })
    }
}

pub mod context;
pub mod history;

pub use context::{CanTransferFn, ExecutionContext, ExecutionContextBuilder, TransferFn};
pub use history::HistoryResolver;

use crate::chain::BalanceLedger;
use crate::types::{Address, U256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("block {requested} is not an ancestor of reference block {reference}")]
    FutureBlock { requested: u64, reference: u64 },
    #[error("genesis header has no parent to resolve history from")]
    GenesisHeader,
}

/// Checks whether `address` holds at least `amount`. Gas is not accounted for.
pub fn can_transfer(ledger: &dyn BalanceLedger, address: Address, amount: U256) -> bool {
    ledger.balance_of(address) >= amount
}

/// Subtracts `amount` from `sender` and adds it to `recipient`.
pub fn transfer(ledger: &mut dyn BalanceLedger, sender: Address, recipient: Address, amount: U256) {
    ledger.decrease_balance(sender, amount);
    ledger.increase_balance(recipient, amount);
}

pub mod types;
pub mod chain;
pub mod evm;
pub mod storage;
pub mod cli;

// Re-export commonly used types
pub use types::{
    is_worker_extra, Address, Block, BlockHeader, Bytes, ExecutionStats, TransferItem, B256, U256,
};

pub use chain::{
    BalanceLedger, ChainView, ConsensusEngine, MemoryChain, MemoryLedger, Message,
    TransactionMessage,
};
pub use evm::{
    can_transfer, transfer, ContextError, ExecutionContext, ExecutionContextBuilder,
    HistoryResolver,
};
pub use storage::{block_key, StatsDb, StatsDbConfig, StatsDbError, StoreState};

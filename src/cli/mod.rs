use crate::chain::{MemoryChain, Message};
use crate::evm::ExecutionContextBuilder;
use crate::storage::{StatsDb, StatsDbConfig};
use crate::types::{Address, BlockHeader, ExecutionStats, TransferItem, U256};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "exec-ctx")]
#[command(about = "Execution context and execution stats tooling", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct StoreArgs {
    /// JSON file holding a stats db configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub path: Option<PathBuf>,

    /// Cache budget in MiB
    #[arg(long, global = true)]
    pub cache: Option<usize>,

    #[arg(long, global = true)]
    pub handles: Option<i32>,
}

impl StoreArgs {
    /// Loads the config file, if any, then applies flag overrides.
    pub fn resolve(&self) -> Result<StatsDbConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(file) => serde_json::from_str(&std::fs::read_to_string(file)?)?,
            None => StatsDbConfig::default(),
        };
        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        if let Some(cache) = self.cache {
            config.cache = cache;
        }
        if let Some(handles) = self.handles {
            config.handles = handles;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read and write per-block execution stats
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },

    /// Build the execution context for the last header of a chain file
    Context {
        /// JSON array of headers, oldest first
        #[arg(long)]
        input: PathBuf,

        /// Ancestor number to resolve through the context
        #[arg(long)]
        ancestor: Option<u64>,

        #[arg(long, default_value_t = Address::ZERO)]
        origin: Address,

        #[arg(long, default_value = "0")]
        gas_price: u64,
    },
}

#[derive(Subcommand)]
pub enum StatsAction {
    Write {
        #[arg(long)]
        number: u64,

        #[arg(long)]
        gas_used: u64,

        #[arg(long, default_value = "0")]
        tx_count: u64,

        /// JSON array of value transfers made by the block
        #[arg(long)]
        transfers: Option<PathBuf>,
    },

    Read {
        #[arg(long)]
        number: u64,
    },

    Delete {
        #[arg(long)]
        number: u64,
    },
}

pub fn handle_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Stats { action } => handle_stats(cli.store.resolve()?, action),

        Commands::Context {
            input,
            ancestor,
            origin,
            gas_price,
        } => handle_context(&input, ancestor, origin, gas_price),
    }
}

fn handle_stats(
    config: StatsDbConfig,
    action: StatsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = StatsDb::open(config)?;

    match action {
        StatsAction::Write {
            number,
            gas_used,
            tx_count,
            transfers,
        } => {
            let mut stats = ExecutionStats::new(gas_used, tx_count);
            if let Some(file) = transfers {
                let json = std::fs::read_to_string(&file)?;
                let items: Vec<TransferItem> = serde_json::from_str(&json)?;
                for item in items {
                    stats.record_transfer(item.from, item.to, item.amount);
                }
            }
            db.write(number, &stats)?;
            info!(
                "Stored stats for block {} with {} transfers",
                number,
                stats.transfers.len()
            );
        }

        StatsAction::Read { number } => match db.read(number)? {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => info!("No stats for block {}", number),
        },

        StatsAction::Delete { number } => {
            db.delete(number)?;
            info!("Deleted stats for block {}", number);
        }
    }

    db.close();
    Ok(())
}

fn handle_context(
    input: &Path,
    ancestor: Option<u64>,
    origin: Address,
    gas_price: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(input)?;
    let headers: Vec<BlockHeader> = serde_json::from_str(&json)?;
    let Some(head) = headers.last().cloned() else {
        return Err(format!("No headers in {}", input.display()).into());
    };

    let chain = MemoryChain::from_headers(headers);
    let msg = Message::new(origin, U256::from(gas_price));
    let mut ctx = ExecutionContextBuilder::new(&chain).build(&msg, &head)?;

    info!(
        "Context for block {}: hash {}, parent {}, coinbase {}, gas limit {}",
        ctx.block_number, ctx.block_hash, ctx.parent_hash, ctx.coinbase, ctx.gas_limit
    );

    if let Some(number) = ancestor {
        let hash = ctx.get_hash(number)?;
        let nonce = ctx.get_nonce(number)?;
        println!(
            "{}",
            serde_json::json!({
                "number": number,
                "hash": hash,
                "nonce": nonce,
            })
        );
        info!("Resolved ancestor {} with {} chain lookups", number, chain.lookups());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::B256;

    #[test]
    fn test_store_args_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("statsdb.json");
        std::fs::write(&file, r#"{ "path": "/from/file", "cache": 64, "handles": 10 }"#).unwrap();

        let args = StoreArgs {
            config: Some(file),
            handles: Some(99),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.path, PathBuf::from("/from/file"));
        assert_eq!(config.cache, 64);
        assert_eq!(config.handles, 99);
    }

    #[test]
    fn test_stats_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = StatsDbConfig::new(dir.path().join("statsdb"));

        handle_stats(
            config.clone(),
            StatsAction::Write {
                number: 1,
                gas_used: 21_000,
                tx_count: 1,
                transfers: None,
            },
        )
        .unwrap();
        handle_stats(config.clone(), StatsAction::Read { number: 1 }).unwrap();
        handle_stats(config.clone(), StatsAction::Delete { number: 1 }).unwrap();

        let db = StatsDb::open(config).unwrap();
        assert_eq!(db.read(1).unwrap(), None);
    }

    #[test]
    fn test_stats_write_with_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let config = StatsDbConfig::new(dir.path().join("statsdb"));
        let items = vec![
            TransferItem::new(Address::repeat_byte(1), Address::repeat_byte(2), U256::from(10u64)),
            TransferItem::new(Address::repeat_byte(2), Address::repeat_byte(3), U256::from(4u64)),
        ];
        let file = dir.path().join("transfers.json");
        std::fs::write(&file, serde_json::to_string(&items).unwrap()).unwrap();

        handle_stats(
            config.clone(),
            StatsAction::Write {
                number: 9,
                gas_used: 42_000,
                tx_count: 2,
                transfers: Some(file),
            },
        )
        .unwrap();

        let db = StatsDb::open(config.clone()).unwrap();
        let stored = db.read(9).unwrap().unwrap();
        assert_eq!(stored.tx_count, 2);
        assert_eq!(stored.transfers, items);
        db.close();

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"[{ "from": "nope" }]"#).unwrap();
        assert!(handle_stats(
            config,
            StatsAction::Write {
                number: 10,
                gas_used: 1,
                tx_count: 1,
                transfers: Some(bad),
            },
        )
        .is_err());
    }

    #[test]
    fn test_context_command() {
        let genesis = BlockHeader::new(0, B256::ZERO).with_nonce(vec![1u8, 2, 3]);
        let head = BlockHeader::new(1, genesis.hash()).with_gas_limit(10_000);

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("chain.json");
        std::fs::write(&input, serde_json::to_string(&vec![genesis, head]).unwrap()).unwrap();

        handle_context(&input, Some(0), Address::ZERO, 1).unwrap();
        assert!(handle_context(&input, Some(1), Address::ZERO, 1).is_err());

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "[]").unwrap();
        assert!(handle_context(&empty, None, Address::ZERO, 1).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "exec-ctx", "--path", "/tmp/stats", "stats", "write", "--number", "7", "--gas-used", "5",
        ])
        .unwrap();
        assert_eq!(cli.store.path, Some(PathBuf::from("/tmp/stats")));
        assert!(matches!(
            cli.command,
            Commands::Stats {
                action: StatsAction::Write {
                    number: 7,
                    gas_used: 5,
                    tx_count: 0,
                    transfers: None
                }
            }
        ));
    }
}

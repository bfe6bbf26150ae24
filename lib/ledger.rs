//! Contract with the execution layer.
//!
//! The EVM and the validation rule set live behind [`Ledger`]; the engine
//! only drives execution block by block and reacts to the error class.

use alloy_primitives::Bytes;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Block, BlockNumber, Hash, Receipt};

/// Which trie a missing node belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrieKind {
    Account,
    Storage,
}

impl std::fmt::Display for TrieKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

#[must_use]
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A state trie node referenced during execution is absent locally.
    /// Recoverable by fetching the node from a peer and retrying the block.
    #[error("missing {trie} trie node {}", hex::encode(.hash))]
    MissingStateNode { hash: Hash, trie: TrieKind },
    #[error("block {number} is invalid: {detail}")]
    InvalidBlock { number: BlockNumber, detail: String },
    #[error("error executing block {number}: {detail}")]
    Other { number: BlockNumber, detail: String },
}

impl ExecutionError {
    /// The failing block, when the error is attributable to one.
    pub fn block_number(&self) -> Option<BlockNumber> {
        match self {
            Self::MissingStateNode { .. } => None,
            Self::InvalidBlock { number, .. } | Self::Other { number, .. } => {
                Some(*number)
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("block {number} failed pre-execution validation: {detail}")]
pub struct ValidationError {
    pub number: BlockNumber,
    pub detail: String,
}

/// State changes produced by executing one block, keyed by trie-node hash.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WorldDiff {
    pub nodes: Vec<(Hash, Bytes)>,
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionStats {
    pub db_read_time_perc: f64,
    pub parallel_rate: f64,
    pub cache_hit_rates: Vec<f64>,
    pub cache_read_count: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    pub world: WorldDiff,
    pub gas_used: u64,
    pub receipts: Vec<Receipt>,
    pub stats: ExecutionStats,
}

#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Execute a block on top of the current world state. Persisting the
    /// outcome is the caller's responsibility.
    async fn execute_block(
        &self,
        block: &Block,
    ) -> Result<ExecutionOutcome, ExecutionError>;

    /// Structural validation ahead of execution. Returns the longest valid
    /// prefix of `blocks` together with the error that cut it short, if any.
    /// `Err` means the validator itself could not process the batch.
    fn validate_blocks_before_execution(
        &self,
        blocks: &[Block],
    ) -> Result<(Vec<Block>, Option<ValidationError>), ValidationError>;

    /// Refresh the header the validator checks incoming blocks against,
    /// after the local best block has advanced.
    fn refresh_validation_reference(&self);
}

//! RPC-shaped rows persisted by the sync store, and the decoded event record
//! the scheduler hands to user indexing functions.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::core::Checkpoint;
use crate::types::primitives::{BlockNumber, ChainId, Uint256};

/// A block as stored by the sync store, keyed by `(chainId, hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Chain this block belongs to.
    pub chain_id: ChainId,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Block number.
    pub number: BlockNumber,
    /// Block timestamp (seconds since epoch).
    pub timestamp: u64,
}

/// A transaction as stored by the sync store, keyed by `(chainId, hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Chain this transaction belongs to.
    pub chain_id: ChainId,
    /// Transaction hash.
    pub hash: B256,
    /// Containing block's number.
    pub block_number: BlockNumber,
    /// Containing block's hash.
    pub block_hash: B256,
    /// Position of the transaction within its block.
    pub transaction_index: u32,
    /// Sender address.
    pub from: Address,
    /// Recipient address, `None` for contract-creation transactions.
    pub to: Option<Address>,
    /// Native-token value transferred.
    pub value: Uint256,
}

/// A log as stored by the sync store, keyed by `(chainId, blockHash,
/// logIndex)`; `id` is a synthetic key derived from that tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Chain this log belongs to.
    pub chain_id: ChainId,
    /// Containing block's hash.
    pub block_hash: B256,
    /// Containing block's number.
    pub block_number: BlockNumber,
    /// Index of the log within its block.
    pub log_index: u32,
    /// Hash of the transaction that emitted this log.
    pub transaction_hash: B256,
    /// Emitting contract's address.
    pub address: Address,
    /// Up to four indexed topics; `topics[0]` is conventionally the event
    /// selector.
    pub topics: [Option<B256>; 4],
    /// Non-indexed, ABI-encoded log payload.
    pub data: Vec<u8>,
}

impl Log {
    /// Synthetic id for this log row: `{chainId}-{blockHash}-{logIndex}`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}-{:#x}-{}", self.chain_id, self.block_hash, self.log_index)
    }

    /// Derive this log's position in the cross-chain checkpoint order, given
    /// its block's timestamp.
    #[must_use]
    pub const fn checkpoint(&self, block_timestamp: u64) -> Checkpoint {
        Checkpoint::new(block_timestamp, self.chain_id, self.block_number, self.log_index)
    }
}

/// A decoded log event ready for dispatch to a user indexing function,
/// joined with its block and transaction rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Position of this event in the cross-chain order.
    pub checkpoint: Checkpoint,
    /// Declaring contract name, e.g. `"Pool"`.
    pub contract_name: String,
    /// Declaring event name, e.g. `"Swap"`.
    pub event_name: String,
    /// Decoded event arguments, keyed by ABI parameter name.
    pub args: serde_json::Map<String, serde_json::Value>,
    /// The raw log this event was decoded from.
    pub log: Log,
    /// The log's containing block.
    pub block: Block,
    /// The transaction that emitted the log.
    pub transaction: Transaction,
}

impl DecodedEvent {
    /// The `(Contract, Event)` key identifying which indexing function
    /// handles this event.
    #[must_use]
    pub fn function_key(&self) -> String {
        format!("{}:{}", self.contract_name, self.event_name)
    }
}

/// Key for a cached RPC read: `(chainId, blockNumber, request)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcRequestKey {
    /// Chain the request was made against.
    pub chain_id: ChainId,
    /// Block number the request was evaluated at.
    pub block_number: BlockNumber,
    /// Canonical string encoding of the request (method + params).
    pub request: String,
}

/// A cached RPC response, stored as its raw JSON result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequestResult {
    /// The cache key this result answers.
    pub key: RpcRequestKey,
    /// The raw JSON-RPC result.
    pub result: serde_json::Value,
}

/// A `functionMetadata` progress row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    /// `(Contract, Event)` or `(Contract, setup)` key.
    pub function_id: String,
    /// Human-readable function name, for logs/metrics.
    pub function_name: String,
    /// Checkpoint this function had processed up to when progress was last
    /// loaded (informational; not itself persisted across restarts).
    pub from_checkpoint: Checkpoint,
    /// Checkpoint this function has durably processed up to.
    pub to_checkpoint: Checkpoint,
    /// Count of events this function has processed.
    pub event_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_id_is_stable_for_same_fields() {
        let log = Log {
            chain_id: ChainId::new(1),
            block_hash: B256::repeat_byte(1),
            block_number: BlockNumber::new(100),
            log_index: 3,
            transaction_hash: B256::repeat_byte(2),
            address: Address::ZERO,
            topics: [None, None, None, None],
            data: vec![],
        };
        assert_eq!(log.id(), log.id());
    }

    #[test]
    fn function_key_formats_as_contract_colon_event() {
        let event = DecodedEvent {
            checkpoint: Checkpoint::ZERO,
            contract_name: "Pool".into(),
            event_name: "Swap".into(),
            args: serde_json::Map::new(),
            log: Log {
                chain_id: ChainId::new(1),
                block_hash: B256::ZERO,
                block_number: BlockNumber::new(0),
                log_index: 0,
                transaction_hash: B256::ZERO,
                address: Address::ZERO,
                topics: [None, None, None, None],
                data: vec![],
            },
            block: Block {
                chain_id: ChainId::new(1),
                hash: B256::ZERO,
                parent_hash: B256::ZERO,
                number: BlockNumber::new(0),
                timestamp: 0,
            },
            transaction: Transaction {
                chain_id: ChainId::new(1),
                hash: B256::ZERO,
                block_number: BlockNumber::new(0),
                block_hash: B256::ZERO,
                transaction_index: 0,
                from: Address::ZERO,
                to: None,
                value: Uint256::ZERO,
            },
        };
        assert_eq!(event.function_key(), "Pool:Swap");
    }
}

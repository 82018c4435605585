//! Domain types shared across the indexing engine: validated primitives
//! ([`primitives`]) and the persisted/decoded records the sync store and
//! scheduler pass around ([`entities`]).

pub mod entities;
pub mod primitives;

pub use entities::{Block, DecodedEvent, FunctionMetadata, Log, RpcRequestKey, RpcRequestResult, Transaction};
pub use primitives::{BlockNumber, ChainId, EthAddress, Uint256};

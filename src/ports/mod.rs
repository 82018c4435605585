//! Ports: trait seams between the core engine and the outside world.
//!
//! `spec.md` §6 deliberately leaves collaborator shapes underspecified; this
//! module gives them concrete traits so the core type-checks and can be
//! exercised against in-memory fakes without a live chain or database.

pub mod cache;
pub mod chain_source;
pub mod entity_store;

pub use cache::{CachedRpcClient, RpcReadClient};
pub use chain_source::{ChainSource, FinalityEvent, HistoricalBatch, RealtimeEvent};
pub use entity_store::{EntityStore, EntityValue};

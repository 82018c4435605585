//! Multi-chain EVM event indexer engine.
//!
//! A Rust backend service that indexes events emitted by a set of
//! user-declared contracts across one or more EVM-compatible chains,
//! persists decoded events and derived entities to a relational store, and
//! exposes the resulting checkpointed progress through a small HTTP API.
//!
//! # Architecture
//!
//! The engine follows a hexagonal architecture: domain logic (checkpoint
//! algebra, the Sync Gateway reducer, the indexing scheduler) depends only on
//! ports (`SyncStore`, `EntityStore`, `RpcReadClient`), with concrete
//! adapters (Postgres, in-memory fakes, a caching RPC client) plugged in at
//! the edges.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            ENGINE CORE                            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ Sync Gateway │──▶│  Scheduler   │──▶│  Indexing Functions  │  │
//! │  │ (checkpoint  │   │ (dependency  │   │  (user handlers)     │  │
//! │  │   fusion)    │   │   dispatch)  │   │                      │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────────┘  │
//! │         ▲                   │                      │             │
//! │         │                   ▼                      ▼             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │  ChainSource  │   │  SyncStore   │   │     EntityStore      │  │
//! │  │   (per-chain) │   │ (checkpoint/ │   │  (decoded entities)  │  │
//! │  └──────────────┘   │  log events) │   └──────────────────────┘  │
//! │                     └──────────────┘                            │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`] - Read-only HTTP surface (`/healthz`, `/metrics`, `/status`)
//! - [`types`] - Domain types (primitives, entities, events)
//! - [`core`] - Checkpoint algebra, interval/filter helpers
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`abi`] - ABI registration and event decoding
//! - [`gateway`] - Sync Gateway checkpoint fusion
//! - [`scheduler`] - Dependency-aware indexing scheduler
//! - [`ports`] - Trait boundaries for storage and RPC adapters
//! - [`store`] - Concrete `SyncStore`/`EntityStore` adapters (Postgres, memory)
//! - [`telemetry`] - Structured logging setup
//! - [`metrics`] - Process and indexing metrics
//!
//! # Getting Started
//!
//! ```bash
//! # Set up environment
//! cp .env.example .env
//! # Edit .env with your chains/sources configuration
//!
//! # Run migrations
//! sqlx migrate run
//!
//! # Start the engine
//! cargo run -- start
//! ```

pub mod abi;
pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod ports;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}

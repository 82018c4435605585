//! Function declarations and the two-pass dependency graph build.
//!
//! `spec.md` §9: "collect each function's read/write sets, invert into a
//! `table -> writers` map, then `parents[f] = union(writers(t) for t in
//! reads(f)) \ {f}`." A function is self-dependent when its own write set
//! intersects its own read set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::sync_store::EventSource;
use crate::types::entities::DecodedEvent;

use super::IndexingContext;

/// The entity tables a function reads from and writes to, used only to
/// build the dependency graph — never consulted at dispatch time directly.
#[derive(Debug, Clone, Default)]
pub struct TableAccess {
    /// Tables read via `ctx.db.find_unique`/`find_many`.
    pub reads: HashSet<String>,
    /// Tables written via `ctx.db.create`/`update`/`upsert`/`delete`.
    pub writes: HashSet<String>,
}

impl TableAccess {
    /// Convenience constructor from string literals.
    #[must_use]
    pub fn new(reads: &[&str], writes: &[&str]) -> Self {
        Self {
            reads: reads.iter().map(|s| (*s).to_string()).collect(),
            writes: writes.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// User-supplied handler for one `(Contract, Event)` key
/// (`spec.md` §9: "modeled as an interface with a single `invoke(context,
/// event)` operation").
#[async_trait]
pub trait IndexingFunction: Send + Sync {
    /// Invoke this function for one decoded event at `ctx.checkpoint`.
    ///
    /// # Errors
    /// Returns an error to trigger the scheduler's per-task retry policy.
    async fn invoke(&self, ctx: &IndexingContext, event: &DecodedEvent) -> Result<()>;
}

/// User-supplied handler for a `"{Contract}:setup"` function, invoked once
/// per configured chain before any log-driven tasks for that contract run.
#[async_trait]
pub trait SetupFunction: Send + Sync {
    /// Invoke one-time setup for `ctx.chain_id`.
    ///
    /// # Errors
    /// Returns an error to trigger the scheduler's per-task retry policy.
    async fn invoke(&self, ctx: &IndexingContext) -> Result<()>;
}

/// One declared indexing function.
pub struct FunctionDeclaration {
    /// Declaring contract name.
    pub contract_name: String,
    /// Event name within that contract's ABI.
    pub event_name: String,
    /// Read/write table sets, for dependency-graph construction.
    pub table_access: TableAccess,
    /// Filters or factory-derived sources feeding this function.
    pub sources: EventSource,
    /// User handler.
    pub handler: Arc<dyn IndexingFunction>,
}

impl FunctionDeclaration {
    /// The `"{Contract}:{Event}"` function key.
    #[must_use]
    pub fn function_id(&self) -> String {
        format!("{}:{}", self.contract_name, self.event_name)
    }
}

/// One declared setup function.
pub struct SetupDeclaration {
    /// Declaring contract name.
    pub contract_name: String,
    /// Write-only table set (a setup function never reads through the
    /// dependency graph's lens — it always runs first for its chain).
    pub table_access: TableAccess,
    /// User handler.
    pub handler: Arc<dyn SetupFunction>,
}

impl SetupDeclaration {
    /// The `"{Contract}:setup"` function key.
    #[must_use]
    pub fn function_id(&self) -> String {
        format!("{}:setup", self.contract_name)
    }
}

/// Per-function dependency info computed by [`build_dependency_graph`].
#[derive(Debug, Clone, Default)]
pub struct DependencyInfo {
    /// Other function keys whose writes this function's reads depend on.
    pub parents: HashSet<String>,
    /// Whether this function's own writes feed its own reads.
    pub is_self_dependent: bool,
}

/// Build the dependency graph from every declared function's read/write
/// sets (`spec.md` §9).
#[must_use]
pub fn build_dependency_graph(entries: &[(String, TableAccess)]) -> HashMap<String, DependencyInfo> {
    let mut table_writers: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, access) in entries {
        for table in &access.writes {
            table_writers.entry(table.as_str()).or_default().push(id.as_str());
        }
    }

    let mut graph = HashMap::with_capacity(entries.len());
    for (id, access) in entries {
        let mut parents = HashSet::new();
        for table in &access.reads {
            if let Some(writers) = table_writers.get(table.as_str()) {
                for writer in writers {
                    if *writer != id.as_str() {
                        parents.insert((*writer).to_string());
                    }
                }
            }
        }
        let is_self_dependent = access.writes.intersection(&access.reads).next().is_some();
        graph.insert(id.clone(), DependencyInfo { parents, is_self_dependent });
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, reads: &[&str], writes: &[&str]) -> (String, TableAccess) {
        (id.to_string(), TableAccess::new(reads, writes))
    }

    #[test]
    fn no_reads_means_no_parents() {
        let entries = vec![entry("Pool:Mint", &[], &["positions"])];
        let graph = build_dependency_graph(&entries);
        assert!(graph["Pool:Mint"].parents.is_empty());
        assert!(!graph["Pool:Mint"].is_self_dependent);
    }

    #[test]
    fn reader_depends_on_every_writer_of_its_read_tables() {
        let entries = vec![
            entry("Factory:PoolCreated", &[], &["pools"]),
            entry("Pool:Mint", &[], &["pools"]),
            entry("Pool:Swap", &["pools"], &["swaps"]),
        ];
        let graph = build_dependency_graph(&entries);
        let parents = &graph["Pool:Swap"].parents;
        assert!(parents.contains("Factory:PoolCreated"));
        assert!(parents.contains("Pool:Mint"));
        assert!(!graph["Pool:Swap"].is_self_dependent);
    }

    #[test]
    fn self_write_and_read_of_same_table_is_self_dependent() {
        let entries = vec![entry("Pool:Swap", &["pools"], &["pools"])];
        let graph = build_dependency_graph(&entries);
        assert!(graph["Pool:Swap"].is_self_dependent);
        // a function never parents itself even though it writes the table it reads
        assert!(!graph["Pool:Swap"].parents.contains("Pool:Swap"));
    }
}

//! The indexing scheduler: per-function state, dependency-aware dispatch,
//! batch loading, a bounded worker pool, reorg handling, and periodic
//! progress flush (`spec.md` §4.3, §5, §9).
//!
//! The engine drives one `(Contract, Event)` or `(Contract, setup)` key at
//! a time through [`FunctionState`]: load more decoded events from the
//! [`SyncStore`](crate::store::sync_store::SyncStore), classify how many of
//! its buffered tasks are safe to run via [`dispatch::dispatch_for`], then
//! execute them against a user [`registry::IndexingFunction`] or
//! [`registry::SetupFunction`] with retry-and-rewind on failure.

pub mod dispatch;
pub mod loader;
pub mod registry;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::abi::AbiRegistry;
use crate::core::Checkpoint;
use crate::error::{AppError, DomainError, InfraError, Result};
use crate::metrics::{INDEXING_EVENTS_PROCESSED, INDEXING_HAS_ERROR, INDEXING_IS_PAUSED, INDEXING_TASK_DURATION};
use crate::ports::{EntityStore, RpcReadClient};
use crate::store::sync_store::SyncStore;
use crate::types::entities::FunctionMetadata;
use crate::types::primitives::{BlockNumber, ChainId};

pub use dispatch::DispatchDecision;
pub use loader::{LoadOutcome, MAX_BATCH_SIZE, calculate_task_batch_size};
pub use registry::{
    DependencyInfo, FunctionDeclaration, IndexingFunction, SetupDeclaration, SetupFunction,
    TableAccess, build_dependency_graph,
};

/// Concurrency bound for the worker pool (`spec.md` §4.3/§5: "concurrency
/// bound: 10 concurrent tasks").
const WORKER_POOL_SIZE: usize = 10;

/// Attempts per task before the scheduler gives up and pauses
/// (`spec.md` §4.3: "each task is attempted up to 4 times").
const MAX_TASK_ATTEMPTS: u32 = 4;

/// Interval between automatic `functionMetadata` flushes
/// (`spec.md` §4.3: "a periodic flush every 120s").
const FLUSH_INTERVAL: Duration = Duration::from_secs(120);

/// What a user indexing/setup function sees (`spec.md` §6: `{ network,
/// client, db, contracts }`). Typed per-contract bindings (`contracts`) are
/// generated by the `codegen` CLI subcommand against a declared ABI, not
/// modeled by the core scheduler; handlers that need them layer generated
/// wrappers on top of `client`.
pub struct IndexingContext {
    /// Chain the task invoking this handler belongs to.
    pub chain_id: ChainId,
    /// Configured display name for `chain_id`.
    pub chain_name: String,
    /// Checkpoint of the task invoking the handler; every `db` mutation the
    /// handler makes is stamped with this checkpoint.
    pub checkpoint: Checkpoint,
    /// Cached, read-only RPC surface.
    pub client: Arc<dyn RpcReadClient>,
    /// Checkpointed entity CRUD.
    pub db: Arc<dyn EntityStore>,
}

/// What kind of work a [`LogEventTask`] carries.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// A synthetic, one-shot setup task for `chain_id`, enqueued directly
    /// at reset rather than loaded from the store.
    Setup {
        /// Chain this setup run is for.
        chain_id: ChainId,
    },
    /// A decoded log event ready for dispatch.
    Log(Box<crate::types::entities::DecodedEvent>),
}

/// One unit of dispatchable work buffered in a function's `loadedTasks`.
#[derive(Debug, Clone)]
pub struct LogEventTask {
    /// Function key this task belongs to.
    pub function_id: String,
    /// This task's position in the cross-chain order.
    pub checkpoint: Checkpoint,
    /// What to invoke.
    pub kind: TaskKind,
    /// Set only on the final task of a loaded batch
    /// (`spec.md` §4.3: "the final task in a loaded batch carries
    /// `eventsProcessed = events.length`").
    pub events_processed: Option<u32>,
}

/// Per-function state the scheduler advances as it loads and dispatches
/// tasks (`spec.md` §3, §4.3, §9).
#[derive(Debug, Clone)]
pub struct FunctionState {
    /// `"{Contract}:{Event}"` or `"{Contract}:setup"` key.
    pub function_id: String,
    /// Human-readable name, for logs/metrics.
    pub function_name: String,
    /// Other function keys this function's reads depend on.
    pub parents: std::collections::HashSet<String>,
    /// Whether this function's own writes feed its own reads.
    pub is_self_dependent: bool,
    /// Checkpoint up to which every buffered task has actually executed.
    pub tasks_processed_to_checkpoint: Checkpoint,
    /// Checkpoint of the earliest task currently buffered, or
    /// `tasksLoadedToCheckpoint` if the buffer is empty.
    pub tasks_loaded_from_checkpoint: Checkpoint,
    /// Checkpoint the loader has fetched up to, whether or not every event
    /// up to it has been buffered and executed yet.
    pub tasks_loaded_to_checkpoint: Checkpoint,
    /// Buffered, not-yet-executed tasks, in ascending checkpoint order.
    pub loaded_tasks: VecDeque<LogEventTask>,
    /// Checkpoint of the first event ever seen for this key.
    pub first_event_checkpoint: Option<Checkpoint>,
    /// Checkpoint of the newest matching event seen so far, even beyond
    /// what's been loaded into the buffer.
    pub last_event_checkpoint: Checkpoint,
    /// Count of tasks this function has executed.
    pub event_count: u64,
}

impl FunctionState {
    fn new(
        function_id: String,
        function_name: String,
        dependency: &DependencyInfo,
        to_checkpoint: Checkpoint,
    ) -> Self {
        Self {
            function_id,
            function_name,
            parents: dependency.parents.clone(),
            is_self_dependent: dependency.is_self_dependent,
            tasks_processed_to_checkpoint: to_checkpoint,
            tasks_loaded_from_checkpoint: to_checkpoint,
            tasks_loaded_to_checkpoint: to_checkpoint,
            loaded_tasks: VecDeque::new(),
            first_event_checkpoint: None,
            last_event_checkpoint: Checkpoint::ZERO,
            event_count: 0,
        }
    }

    /// `spec.md` §4.3 flush rule: the checkpoint safe to persist for this
    /// function right now — everything it has actually processed, unless
    /// its buffer is empty, in which case it's vacuously caught up to
    /// wherever it has loaded.
    #[must_use]
    pub fn state_checkpoint(&self) -> Checkpoint {
        if self.loaded_tasks.is_empty() {
            self.tasks_loaded_to_checkpoint
        } else {
            self.tasks_processed_to_checkpoint
        }
    }

    /// A key is fully loaded once the loader has caught up to both the
    /// newest event it has ever seen and the current gateway checkpoint.
    #[must_use]
    pub fn is_fully_loaded(&self, gateway_checkpoint: Checkpoint) -> bool {
        self.tasks_loaded_to_checkpoint >= self.last_event_checkpoint
            && self.tasks_loaded_to_checkpoint >= gateway_checkpoint
    }
}

/// Observable signals the scheduler emits as it runs
/// (`spec.md` §4.3: "emit `error`"; "emit `eventsProcessed`").
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// The minimum `stateCheckpoint` across every function advanced.
    EventsProcessed {
        /// New minimum checkpoint.
        to_checkpoint: Checkpoint,
    },
    /// A task exhausted its retries; the scheduler has paused.
    Error {
        /// Function key whose task failed terminally.
        function_key: String,
        /// Error message, for logging/metrics.
        message: String,
    },
}

/// Shared, `Clone`-able handles a spawned task needs to execute one
/// [`LogEventTask`] without borrowing the [`Scheduler`] across an `.await`.
#[derive(Clone)]
struct TaskExecutor {
    entity_store: Arc<dyn EntityStore>,
    client: Arc<dyn RpcReadClient>,
    chains: Arc<HashMap<ChainId, String>>,
    functions: Arc<HashMap<String, FunctionDeclaration>>,
    setups: Arc<HashMap<String, SetupDeclaration>>,
}

struct TaskOutcome {
    function_id: String,
    checkpoint: Checkpoint,
    events_processed: Option<u32>,
}

impl TaskExecutor {
    fn chain_id_of(task: &LogEventTask) -> ChainId {
        match &task.kind {
            TaskKind::Setup { chain_id } => *chain_id,
            TaskKind::Log(event) => event.checkpoint.chain_id,
        }
    }

    async fn invoke(&self, function_id: &str, ctx: &IndexingContext, task: &LogEventTask) -> Result<()> {
        match &task.kind {
            TaskKind::Setup { .. } => {
                let setup = self
                    .setups
                    .get(function_id)
                    .ok_or_else(|| DomainError::UnknownFunction(function_id.to_string()))?;
                setup.handler.invoke(ctx).await
            }
            TaskKind::Log(event) => {
                let decl = self
                    .functions
                    .get(function_id)
                    .ok_or_else(|| DomainError::UnknownFunction(function_id.to_string()))?;
                decl.handler.invoke(ctx, event).await
            }
        }
    }

    /// Run one task to completion, retrying up to [`MAX_TASK_ATTEMPTS`]
    /// times with an `EntityStore::revert` between attempts
    /// (`spec.md` §4.3 "per-task failure policy").
    #[instrument(skip(self, task), fields(function_id = %function_id, checkpoint = %task.checkpoint))]
    async fn execute_task(
        &self,
        function_id: String,
        task: LogEventTask,
    ) -> std::result::Result<TaskOutcome, (String, AppError)> {
        // ~1% chance of a zero-delay forced yield so single-threaded
        // backends still surface progress and shutdown signals between
        // long runs of CPU-bound user handlers (`spec.md` §5).
        if rand::random::<f32>() < 0.01 {
            tokio::task::yield_now().await;
        }

        let chain_id = Self::chain_id_of(&task);
        let chain_name = self
            .chains
            .get(&chain_id)
            .cloned()
            .unwrap_or_else(|| chain_id.to_string());
        let ctx = IndexingContext {
            chain_id,
            chain_name,
            checkpoint: task.checkpoint,
            client: Arc::clone(&self.client),
            db: Arc::clone(&self.entity_store),
        };

        let started = std::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            match self.invoke(&function_id, &ctx, &task).await {
                Ok(()) => {
                    histogram!(INDEXING_TASK_DURATION, "function" => function_id.clone())
                        .record(started.elapsed().as_secs_f64());
                    return Ok(TaskOutcome {
                        function_id,
                        checkpoint: task.checkpoint,
                        events_processed: task.events_processed,
                    });
                }
                Err(err) => {
                    let non_retryable = matches!(&err, AppError::Infra(InfraError::NonRetryable(_)));
                    attempt += 1;
                    if non_retryable || attempt >= MAX_TASK_ATTEMPTS {
                        histogram!(INDEXING_TASK_DURATION, "function" => function_id.clone())
                            .record(started.elapsed().as_secs_f64());
                        return Err((function_id, err));
                    }
                    warn!(%function_id, attempt, error = %err, "task failed, rewinding and retrying");
                    if let Err(revert_err) = self.entity_store.revert(task.checkpoint).await {
                        return Err((function_id, revert_err));
                    }
                }
            }
        }
    }
}

/// The indexing scheduler itself.
pub struct Scheduler {
    sync_store: Arc<dyn SyncStore>,
    abi: AbiRegistry,
    functions: Arc<HashMap<String, FunctionDeclaration>>,
    setups: Arc<HashMap<String, SetupDeclaration>>,
    source_start_blocks: HashMap<ChainId, u64>,
    states: AsyncMutex<HashMap<String, FunctionState>>,
    semaphore: Arc<Semaphore>,
    loading_mutex: Arc<AsyncMutex<()>>,
    cancel: AsyncMutex<CancellationToken>,
    is_paused: AtomicBool,
    has_error: AtomicBool,
    executor: TaskExecutor,
}

impl Scheduler {
    /// Construct a scheduler over the declared functions/setups. Call
    /// [`Scheduler::reset`] before driving it to seed state from persisted
    /// `functionMetadata`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sync_store: Arc<dyn SyncStore>,
        entity_store: Arc<dyn EntityStore>,
        client: Arc<dyn RpcReadClient>,
        abi: AbiRegistry,
        functions: Vec<FunctionDeclaration>,
        setups: Vec<SetupDeclaration>,
        chains: HashMap<ChainId, String>,
        source_start_blocks: HashMap<ChainId, u64>,
    ) -> Self {
        let functions: Arc<HashMap<String, FunctionDeclaration>> =
            Arc::new(functions.into_iter().map(|f| (f.function_id(), f)).collect());
        let setups: Arc<HashMap<String, SetupDeclaration>> =
            Arc::new(setups.into_iter().map(|s| (s.function_id(), s)).collect());
        let chains = Arc::new(chains);
        let executor = TaskExecutor {
            entity_store,
            client,
            chains,
            functions: Arc::clone(&functions),
            setups: Arc::clone(&setups),
        };
        Self {
            sync_store,
            abi,
            functions,
            setups,
            source_start_blocks,
            states: AsyncMutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(WORKER_POOL_SIZE)),
            loading_mutex: Arc::new(AsyncMutex::new(())),
            cancel: AsyncMutex::new(CancellationToken::new()),
            is_paused: AtomicBool::new(true),
            has_error: AtomicBool::new(false),
            executor,
        }
    }

    /// Whether the scheduler has paused after exhausting a task's retries.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Whether dispatch is currently paused (initial state, mid-`reset`, or
    /// after a terminal task failure).
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    async fn acquire_loading_lock(
        &self,
    ) -> std::result::Result<tokio::sync::OwnedMutexGuard<()>, InfraError> {
        let token = self.cancel.lock().await.clone();
        tokio::select! {
            guard = Arc::clone(&self.loading_mutex).lock_owned() => Ok(guard),
            () = token.cancelled() => Err(InfraError::Cancelled),
        }
    }

    /// Cold-start (or restart) the scheduler: cancels any in-flight load,
    /// rebuilds the dependency graph, seeds every function's state from
    /// `persisted`, enqueues one synthetic setup task per configured chain
    /// for every not-yet-completed [`SetupDeclaration`], and clears the
    /// error/pause flags (`spec.md` §4.3 "reset").
    #[instrument(skip(self, persisted))]
    pub async fn reset(&self, persisted: Vec<FunctionMetadata>) {
        self.is_paused.store(true, Ordering::SeqCst);
        gauge!(INDEXING_IS_PAUSED).set(1.0);
        let stale = {
            let mut cancel = self.cancel.lock().await;
            std::mem::replace(&mut *cancel, CancellationToken::new())
        };
        stale.cancel();

        let persisted_by_id: HashMap<String, Checkpoint> = persisted
            .into_iter()
            .map(|row| (row.function_id, row.to_checkpoint))
            .collect();

        let mut entries: Vec<(String, TableAccess)> = Vec::new();
        for f in self.functions.values() {
            entries.push((f.function_id(), f.table_access.clone()));
        }
        for s in self.setups.values() {
            entries.push((s.function_id(), s.table_access.clone()));
        }
        let graph = build_dependency_graph(&entries);

        let mut states = HashMap::with_capacity(self.functions.len() + self.setups.len());
        for f in self.functions.values() {
            let id = f.function_id();
            let dependency = graph.get(&id).cloned().unwrap_or_default();
            let to_checkpoint = persisted_by_id.get(&id).copied().unwrap_or(Checkpoint::ZERO);
            states.insert(
                id.clone(),
                FunctionState::new(id, format!("{}:{}", f.contract_name, f.event_name), &dependency, to_checkpoint),
            );
        }
        for s in self.setups.values() {
            let id = s.function_id();
            let dependency = graph.get(&id).cloned().unwrap_or_default();
            let to_checkpoint = persisted_by_id.get(&id).copied().unwrap_or(Checkpoint::ZERO);
            let mut state = FunctionState::new(id.clone(), id.clone(), &dependency, to_checkpoint);
            for (&chain_id, &start_block) in &self.source_start_blocks {
                let synthetic = Checkpoint::new(0, chain_id, BlockNumber::new(start_block), 0);
                if synthetic > to_checkpoint {
                    state.loaded_tasks.push_back(LogEventTask {
                        function_id: id.clone(),
                        checkpoint: synthetic,
                        kind: TaskKind::Setup { chain_id },
                        events_processed: None,
                    });
                }
            }
            if let Some(first) = state.loaded_tasks.front() {
                state.tasks_loaded_from_checkpoint = first.checkpoint;
                state.first_event_checkpoint = Some(first.checkpoint);
            }
            if let Some(last) = state.loaded_tasks.back() {
                state.tasks_loaded_to_checkpoint = last.checkpoint;
                state.last_event_checkpoint = last.checkpoint;
            }
            states.insert(id, state);
        }

        *self.states.lock().await = states;
        self.has_error.store(false, Ordering::SeqCst);
        gauge!(INDEXING_HAS_ERROR).set(0.0);
        self.is_paused.store(false, Ordering::SeqCst);
        gauge!(INDEXING_IS_PAUSED).set(0.0);
    }

    async fn min_state_checkpoint(&self) -> Checkpoint {
        let states = self.states.lock().await;
        states
            .values()
            .map(FunctionState::state_checkpoint)
            .min()
            .unwrap_or(Checkpoint::ZERO)
    }

    async fn load_phase(&self, target: Checkpoint) -> Result<()> {
        let mut states = self.states.lock().await;
        let fully_loaded: Vec<u32> = states
            .values()
            .filter(|s| s.is_fully_loaded(target))
            .map(|s| s.loaded_tasks.len() as u32)
            .collect();
        let unfinished: Vec<String> = states
            .iter()
            .filter(|(_, s)| !s.is_fully_loaded(target))
            .map(|(id, _)| id.clone())
            .collect();
        if unfinished.is_empty() {
            return Ok(());
        }
        let budget = calculate_task_batch_size(&fully_loaded, unfinished.len());

        for id in unfinished {
            let Some(decl) = self.functions.get(&id) else {
                // Setup functions have no store-backed loader; their tasks
                // are pre-populated once in `reset`.
                continue;
            };
            let state = states
                .get_mut(&id)
                .expect("every declared function has a state entry after reset");
            loader::load_indexing_function_tasks(self.sync_store.as_ref(), &self.abi, decl, state, target, budget)
                .await?;
        }
        Ok(())
    }

    /// Build this tick's batch of dispatched tasks without holding the
    /// states lock across task execution, and drain them from their
    /// function's buffer immediately so a later tick never re-dispatches
    /// the same task.
    async fn collect_dispatch(&self) -> Vec<(String, Vec<LogEventTask>)> {
        let mut states = self.states.lock().await;
        let snapshot: HashMap<String, FunctionState> = states.clone();

        let mut to_run = Vec::new();
        for (id, state) in states.iter_mut() {
            if state.loaded_tasks.is_empty() {
                continue;
            }
            let parents: Vec<&FunctionState> =
                state.parents.iter().filter_map(|p| snapshot.get(p)).collect();
            let decision = dispatch::dispatch_for(state, &parents);
            let batch: Vec<LogEventTask> = match decision {
                DispatchDecision::None => continue,
                DispatchDecision::One => state.loaded_tasks.drain(..1).collect(),
                DispatchDecision::All => state.loaded_tasks.drain(..).collect(),
                DispatchDecision::Prefix(n) => state.loaded_tasks.drain(..n).collect(),
            };
            to_run.push((id.clone(), batch));
        }
        to_run
    }

    async fn apply_outcome(&self, outcome: TaskOutcome) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(&outcome.function_id) {
            state.tasks_processed_to_checkpoint = state.tasks_processed_to_checkpoint.max_of(outcome.checkpoint);
            state.event_count += 1;
            counter!(INDEXING_EVENTS_PROCESSED, "function" => outcome.function_id.clone()).increment(1);
            state.tasks_loaded_from_checkpoint = state
                .loaded_tasks
                .front()
                .map_or(state.tasks_loaded_to_checkpoint, |t| t.checkpoint);
        }
        if let Some(n) = outcome.events_processed {
            info!(function_id = %outcome.function_id, events_processed = n, "batch processed");
        }
    }

    async fn dispatch_and_execute(&self) -> Result<(bool, Vec<SchedulerEvent>)> {
        let to_run = self.collect_dispatch().await;
        if to_run.is_empty() {
            return Ok((false, Vec::new()));
        }

        let mut events = Vec::new();
        let mut join_set = JoinSet::new();
        for (function_id, batch) in to_run {
            for task in batch {
                let permit = Arc::clone(&self.semaphore)
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed while the scheduler is alive");
                let executor = self.executor.clone();
                let function_id = function_id.clone();
                join_set.spawn(async move {
                    let _permit = permit;
                    executor.execute_task(function_id, task).await
                });
            }
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => self.apply_outcome(outcome).await,
                Ok(Err((function_key, err))) => {
                    self.is_paused.store(true, Ordering::SeqCst);
                    gauge!(INDEXING_IS_PAUSED).set(1.0);
                    self.has_error.store(true, Ordering::SeqCst);
                    gauge!(INDEXING_HAS_ERROR).set(1.0);
                    events.push(SchedulerEvent::Error {
                        function_key: function_key.clone(),
                        message: err.to_string(),
                    });
                    error!(function_key = %function_key, error = %err, "indexing task failed after exhausting retries");
                    if first_error.is_none() {
                        first_error = Some(AppError::IndexingFailed { function_key, source: Box::new(err) });
                    }
                }
                Err(join_err) => {
                    return Err(AppError::Initialization(format!("worker task panicked: {join_err}")));
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        Ok((true, events))
    }

    /// Drive load → dispatch → execute to convergence against the current
    /// gateway checkpoint: repeat until neither phase makes further
    /// progress, then report whether the minimum `stateCheckpoint` across
    /// every function advanced.
    ///
    /// # Errors
    /// Returns an error if a task exhausts its retries, the underlying
    /// store fails, or the scheduler is paused waiting on a prior error.
    #[instrument(skip(self))]
    pub async fn process_events(&self, gateway_checkpoint: Checkpoint) -> Result<Vec<SchedulerEvent>> {
        if self.is_paused.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let _loading_guard = match self.acquire_loading_lock().await {
            Ok(guard) => guard,
            Err(InfraError::Cancelled) => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Infra(e)),
        };

        let mut events = Vec::new();
        let min_before = self.min_state_checkpoint().await;

        loop {
            self.load_phase(gateway_checkpoint).await?;
            let (dispatched, mut tick_events) = self.dispatch_and_execute().await?;
            events.append(&mut tick_events);
            if !dispatched {
                break;
            }
        }

        let min_after = self.min_state_checkpoint().await;
        if min_after > min_before {
            events.push(SchedulerEvent::EventsProcessed { to_checkpoint: min_after });
        }
        Ok(events)
    }

    /// Rewind every function's state to `safe_checkpoint` and revert the
    /// entity store once (`spec.md` §4.3 "reorg handling").
    ///
    /// # Errors
    /// Returns an error if the entity store revert fails.
    #[instrument(skip(self))]
    pub async fn handle_reorg(&self, safe_checkpoint: Checkpoint) -> Result<()> {
        let _loading_guard = match self.acquire_loading_lock().await {
            Ok(guard) => guard,
            Err(InfraError::Cancelled) => return Ok(()),
            Err(e) => return Err(AppError::Infra(e)),
        };

        let any_ahead = {
            let states = self.states.lock().await;
            states.values().any(|s| s.tasks_processed_to_checkpoint > safe_checkpoint)
        };
        if !any_ahead {
            return Ok(());
        }

        self.executor.entity_store.revert(safe_checkpoint).await?;

        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            state.tasks_processed_to_checkpoint = state.tasks_processed_to_checkpoint.min(safe_checkpoint);
            state.tasks_loaded_from_checkpoint = state.tasks_loaded_from_checkpoint.min(safe_checkpoint);
            state.tasks_loaded_to_checkpoint = state.tasks_loaded_to_checkpoint.min(safe_checkpoint);
            state.loaded_tasks.retain(|t| t.checkpoint <= safe_checkpoint);
        }
        Ok(())
    }

    /// Persist every function's safe-to-flush checkpoint
    /// (`spec.md` §4.3 "Flush": `toCheckpoint = min(stateCheckpoint,
    /// gatewayFinalityCheckpoint)`; rows at the zero checkpoint are
    /// omitted).
    ///
    /// # Errors
    /// Returns an error if the underlying store call fails.
    #[instrument(skip(self))]
    pub async fn flush(&self, gateway_finality_checkpoint: Checkpoint) -> Result<()> {
        let rows: Vec<FunctionMetadata> = {
            let states = self.states.lock().await;
            states
                .values()
                .filter_map(|state| {
                    let to_checkpoint = state.state_checkpoint().min(gateway_finality_checkpoint);
                    if to_checkpoint == Checkpoint::ZERO {
                        return None;
                    }
                    Some(FunctionMetadata {
                        function_id: state.function_id.clone(),
                        function_name: state.function_name.clone(),
                        from_checkpoint: state.tasks_processed_to_checkpoint,
                        to_checkpoint,
                        event_count: state.event_count,
                    })
                })
                .collect()
        };
        if rows.is_empty() {
            return Ok(());
        }
        self.sync_store.flush_function_metadata(rows).await
    }

    /// Spawn the periodic flush loop. `finality_checkpoint` is a callback
    /// rather than a direct [`crate::gateway::SyncGateway`] reference so
    /// the scheduler stays decoupled from however the caller synchronizes
    /// access to the gateway.
    pub fn spawn_flush_loop<F>(self: Arc<Self>, finality_checkpoint: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Checkpoint + Send + Sync + 'static,
    {
        let this = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let checkpoint = finality_checkpoint();
                if let Err(err) = this.flush(checkpoint).await {
                    error!(error = %err, "periodic functionMetadata flush failed");
                }
            }
        })
    }

    /// Pause dispatch, clear every function's buffered-but-not-yet-started
    /// tasks, cancel any in-flight load, stop the periodic flush, and
    /// perform one final flush (`spec.md` §5 "cancellation and timeout").
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    #[instrument(skip(self, flush_handle))]
    pub async fn kill(&self, flush_handle: &tokio::task::JoinHandle<()>, gateway_finality_checkpoint: Checkpoint) -> Result<()> {
        self.is_paused.store(true, Ordering::SeqCst);
        gauge!(INDEXING_IS_PAUSED).set(1.0);
        self.cancel.lock().await.cancel();
        flush_handle.abort();
        {
            let mut states = self.states.lock().await;
            for state in states.values_mut() {
                state.loaded_tasks.clear();
            }
        }
        self.flush(gateway_finality_checkpoint).await
    }
}

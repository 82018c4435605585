//! Multi-chain indexer binary.
//!
//! This binary wires up the ambient stack — configuration, telemetry,
//! metrics, storage, and the read-only HTTP surface — around the engine
//! core (`xchain_indexer::{gateway, scheduler}`). It does *not* declare any
//! indexing functions itself: `(Contract, Event) -> handler` bindings are
//! opaque user code (§1 non-goal: "executing user indexing code semantics")
//! that a real deployment supplies by depending on this crate as a library
//! and calling [`xchain_indexer::scheduler::Scheduler::new`] directly with
//! its own [`xchain_indexer::scheduler::FunctionDeclaration`]s — the
//! generated `main` a `codegen` step would produce, which §1 places out of
//! core scope. `serve` below boots every ambient subsystem and an empty
//! scheduler, so the process is fully operational (migrations, health,
//! metrics, status) even with zero declared functions.

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

use xchain_indexer::abi::AbiRegistry;
use xchain_indexer::api::{self, AppState};
use xchain_indexer::config::Settings;
use xchain_indexer::error::{AppError, Result};
use xchain_indexer::gateway::SyncGateway;
use xchain_indexer::ports::entity_store::EntityStore;
use xchain_indexer::scheduler::Scheduler;
use xchain_indexer::store::{
    PostgresEntityStore, PostgresSyncStore, RetryingSyncStore, SqliteEntityStore, SqliteSyncStore,
    SyncStore,
};
use xchain_indexer::types::primitives::ChainId;
use xchain_indexer::{metrics, telemetry};

/// Multi-chain EVM event indexer.
#[derive(Parser, Debug)]
#[command(name = "xchain-indexer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Environment name, selects `config/{environment}.toml` as an override
    /// layer over `config/default.toml`.
    #[arg(short, long, default_value = "development")]
    environment: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run database migrations.
    Migrate,

    /// Start the engine: boots telemetry/metrics, opens the configured
    /// store, and serves the read-only HTTP surface alongside an (initially
    /// empty) scheduler and gateway.
    Serve,

    /// Print version information and exit.
    Version,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if matches!(&cli.command, Commands::Version) {
        println!("xchain-indexer {}", xchain_indexer::VERSION);
        return std::process::ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fatal: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load(&cli.environment)
        .map_err(|e| AppError::Config(format!("failed to load configuration: {e}")))?;
    settings.validate().map_err(|errors| AppError::Config(errors.join("; ")))?;

    let _telemetry_guard = telemetry::init(&settings.logging)?;
    info!(version = xchain_indexer::VERSION, environment = %cli.environment, "starting");

    match cli.command {
        Commands::Migrate => run_migrate(&settings).await,
        Commands::Serve => run_serve(&settings).await,
        Commands::Version => unreachable!("handled before runtime startup"),
    }
}

async fn run_migrate(settings: &Settings) -> Result<()> {
    match settings.database.backend.as_str() {
        "sqlite" => {
            let pool = SqlitePoolOptions::new()
                .max_connections(settings.database.max_connections)
                .acquire_timeout(settings.database.connect_timeout())
                .connect(&settings.database.url)
                .await
                .map_err(xchain_indexer::error::InfraError::Database)?;
            SqliteSyncStore::new(pool.clone()).run_migrations().await?;
            SqliteEntityStore::new(pool).run_migrations().await?;
        }
        _ => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections)
                .min_connections(settings.database.min_connections)
                .acquire_timeout(settings.database.connect_timeout())
                .idle_timeout(settings.database.idle_timeout())
                .connect(&settings.database.url)
                .await
                .map_err(xchain_indexer::error::InfraError::Database)?;
            PostgresSyncStore::new(pool).run_migrations().await?;
        }
    }
    info!("migrations applied");
    Ok(())
}

async fn run_serve(settings: &Settings) -> Result<()> {
    let metrics_handle = metrics::install(&settings.metrics)?;

    let sync_store: Arc<dyn SyncStore> = match settings.database.backend.as_str() {
        "sqlite" => {
            let pool = SqlitePoolOptions::new()
                .max_connections(settings.database.max_connections)
                .acquire_timeout(settings.database.connect_timeout())
                .connect(&settings.database.url)
                .await
                .map_err(xchain_indexer::error::InfraError::Database)?;
            let store = SqliteSyncStore::new(pool);
            store.run_migrations().await?;
            Arc::new(store)
        }
        _ => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections)
                .min_connections(settings.database.min_connections)
                .acquire_timeout(settings.database.connect_timeout())
                .idle_timeout(settings.database.idle_timeout())
                .connect(&settings.database.url)
                .await
                .map_err(xchain_indexer::error::InfraError::Database)?;
            let store = PostgresSyncStore::new(pool);
            store.run_migrations().await?;
            Arc::new(store)
        }
    };
    let sync_store = Arc::new(RetryingSyncStore::new(sync_store));

    let entity_store: Arc<dyn EntityStore> = match settings.database.backend.as_str() {
        "sqlite" => {
            let pool = SqlitePoolOptions::new()
                .max_connections(settings.database.max_connections)
                .acquire_timeout(settings.database.connect_timeout())
                .connect(&settings.database.url)
                .await
                .map_err(xchain_indexer::error::InfraError::Database)?;
            let store = SqliteEntityStore::new(pool);
            store.run_migrations().await?;
            Arc::new(store)
        }
        _ => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections)
                .min_connections(settings.database.min_connections)
                .acquire_timeout(settings.database.connect_timeout())
                .idle_timeout(settings.database.idle_timeout())
                .connect(&settings.database.url)
                .await
                .map_err(xchain_indexer::error::InfraError::Database)?;
            Arc::new(PostgresEntityStore::new(pool))
        }
    };

    let mut abi = AbiRegistry::new();
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());
    for source in &settings.sources {
        let abi_path = std::path::Path::new(&config_dir).join(&source.abi_path);
        let abi_json = std::fs::read_to_string(&abi_path).map_err(|e| {
            AppError::Initialization(format!("failed to read ABI {}: {e}", abi_path.display()))
        })?;
        abi.register_contract(source.contract_name.clone(), &abi_json)
            .map_err(AppError::Domain)?;
    }

    let client: Arc<dyn xchain_indexer::ports::RpcReadClient> = Arc::new(UnconfiguredRpcClient);

    let chain_ids: Vec<ChainId> = settings.chains.iter().map(|c| ChainId::new(c.chain_id)).collect();
    let chains: HashMap<ChainId, String> =
        settings.chains.iter().map(|c| (ChainId::new(c.chain_id), c.name.clone())).collect();
    let mut source_start_blocks: HashMap<ChainId, u64> = HashMap::new();
    for source in &settings.sources {
        for chain_name in &source.chains {
            if let Some(chain) = settings.chains.iter().find(|c| &c.name == chain_name) {
                let id = ChainId::new(chain.chain_id);
                source_start_blocks
                    .entry(id)
                    .and_modify(|b| *b = (*b).min(source.start_block))
                    .or_insert(source.start_block);
            }
        }
    }

    let gateway = Arc::new(Mutex::new(SyncGateway::new(chain_ids)));

    // No `FunctionDeclaration`s/`SetupDeclaration`s are known to this
    // generic binary; an embedding application builds its own `Scheduler`
    // with its generated handlers instead of calling this `main`.
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&sync_store) as Arc<dyn SyncStore>,
        entity_store,
        client,
        abi,
        Vec::new(),
        Vec::new(),
        chains,
        source_start_blocks,
    ));
    let persisted = sync_store.load_function_metadata().await?;
    scheduler.reset(persisted).await;

    let gateway_for_flush = Arc::clone(&gateway);
    let flush_handle = Arc::clone(&scheduler).spawn_flush_loop(move || gateway_for_flush.lock().finality_checkpoint());

    let gateway_for_shutdown = Arc::clone(&gateway);
    let state = AppState { gateway, scheduler: Arc::clone(&scheduler), metrics: metrics_handle };
    let router = api::router(state);
    let addr = settings.api.socket_addr();
    info!(%addr, "serving");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Initialization(format!("failed to bind {addr}: {e}")))?;

    tokio::select! {
        result = axum::serve(listener, router) => {
            result.map_err(|e| AppError::Initialization(format!("server error: {e}")))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    let final_finality_checkpoint = gateway_for_shutdown.lock().finality_checkpoint();
    scheduler.kill(&flush_handle, final_finality_checkpoint).await?;
    Ok(())
}

/// Placeholder `RpcReadClient` wired in until a concrete chain transport is
/// configured; `client_source.rs` leaves the actual RPC connection an
/// external collaborator's responsibility (§6), so this generic binary has
/// nothing live to call.
struct UnconfiguredRpcClient;

#[async_trait::async_trait]
impl xchain_indexer::ports::RpcReadClient for UnconfiguredRpcClient {
    async fn call(
        &self,
        _chain_id: ChainId,
        _block_number: xchain_indexer::types::primitives::BlockNumber,
        _request: &str,
    ) -> Result<serde_json::Value> {
        Err(xchain_indexer::error::InfraError::NonRetryable(
            "no RPC transport configured for this deployment".into(),
        )
        .into())
    }
}

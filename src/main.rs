//! Userpool CLI entrypoint.
//!
//! This is the main entrypoint for the userpool command-line tool. Backend
//! clients and the store are built once here and injected everywhere else.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use userpool_operator::backend::{CognitoBackend, IdentityBackend, MemoryBackend};
use userpool_operator::cli::{Cli, Commands, LogFormat, OutputFormatter};
use userpool_operator::config::{
    find_config_file, BackendKind, ConfigParser, ConfigValidator, OperatorConfig,
};
use userpool_operator::controller::{BackoffPolicy, BackoffTracker, Controller};
use userpool_operator::error::{ConfigError, OperatorError, Result, StoreError};
use userpool_operator::reconciler::Reconciler;
use userpool_operator::store::{LocalUserStore, ResourceKey, UserStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Reconciler over the configured backend and store.
type DynReconciler = Reconciler<Box<dyn IdentityBackend>, Box<dyn UserStore>>;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", formatter.format_error(&e.to_string(), e.retry_delay_secs()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose`. Logs go to stderr so that command
/// output on stdout stays machine-readable.
fn init_logging(verbose: bool, format: LogFormat) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { once } => cmd_run(&config, once, &formatter).await,
        Commands::Reconcile { key } => cmd_reconcile(&config, &key, &formatter).await,
        Commands::Plan { key } => cmd_plan(&config, &key, &formatter).await,
        Commands::Apply { file, reconcile } => {
            cmd_apply(&config, &file, reconcile, &formatter).await
        }
        Commands::Delete { key, reconcile } => {
            cmd_delete(&config, &key, reconcile, &formatter).await
        }
        Commands::Get { key } => cmd_get(&config, key.as_deref(), &formatter).await,
        Commands::ListPool => cmd_list_pool(&config, &formatter).await,
        Commands::Drift => cmd_drift(&config, &formatter).await,
        Commands::Validate { file, warnings } => {
            cmd_validate(&config, file.as_ref(), warnings, &formatter)
        }
    }
}

/// Loads, overrides and validates the configuration.
fn load_config(path: Option<&Path>) -> Result<OperatorConfig> {
    let parser = ConfigParser::new();
    parser.load_dotenv()?;

    let discovered = match path {
        Some(p) => Some(p.to_path_buf()),
        None => std::env::current_dir().ok().and_then(find_config_file),
    };
    if discovered.is_none() {
        debug!("No configuration file found, using defaults");
    }

    let config = parser.load_with_env(discovered.as_deref())?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok(config)
}

/// Builds the configured identity backend.
async fn build_backend(config: &OperatorConfig) -> Result<Box<dyn IdentityBackend>> {
    let page_size = usize::try_from(config.backend.page_size).unwrap_or(usize::MAX);

    match config.backend.kind {
        BackendKind::Memory => {
            warn!("Using the in-memory backend; pool contents are lost on exit");
            Ok(Box::new(MemoryBackend::new().with_page_size(page_size)))
        }
        BackendKind::Cognito => {
            let pool_id = config.backend.user_pool_id.as_deref().ok_or_else(|| {
                OperatorError::Config(ConfigError::validation(
                    "User pool ID is required when using the cognito backend",
                    "backend.user_pool_id",
                ))
            })?;
            let backend = CognitoBackend::new(pool_id, config.backend.region.as_deref())
                .await?
                .with_page_size(page_size);
            Ok(Box::new(backend))
        }
    }
}

/// Builds the declarative store.
fn build_store(config: &OperatorConfig) -> Result<Box<dyn UserStore>> {
    let store = match &config.store.path {
        Some(path) => LocalUserStore::with_path(PathBuf::from(path)),
        None => LocalUserStore::new()?,
    };
    debug!("Using store file {}", store.path().display());
    Ok(Box::new(store))
}

/// Builds the reconciler with the configured backend and store.
async fn build_reconciler(config: &OperatorConfig) -> Result<Arc<DynReconciler>> {
    let backend = build_backend(config).await?;
    let store = build_store(config)?;
    info!(
        "Using {} backend with {} store",
        backend.backend_type(),
        store.store_type()
    );

    Ok(Arc::new(
        Reconciler::new(Arc::new(backend), Arc::new(store))
            .with_call_timeout(Duration::from_secs(config.backend.call_timeout_secs)),
    ))
}

/// Returns a token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {e}"),
        }
        trigger.cancel();
    });
    token
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Run the controller.
async fn cmd_run(config: &OperatorConfig, once: bool, formatter: &OutputFormatter) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let controller = Controller::with_config(reconciler, &config.controller);
    let cancel = shutdown_token();

    if once {
        let mut tracker = BackoffTracker::new(BackoffPolicy::from(&config.controller.backoff));
        let summary = controller.run_once(&mut tracker, &cancel).await?;
        return emit(&formatter.format_tick(&summary));
    }

    controller.run(cancel).await;
    Ok(())
}

/// Reconcile one user.
async fn cmd_reconcile(config: &OperatorConfig, key: &str, formatter: &OutputFormatter) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let key = ResourceKey::parse(key);

    let outcome = reconciler.reconcile(&key, &shutdown_token()).await?;
    emit(&formatter.format_outcome(&key, &outcome))
}

/// Show the plan for one user.
async fn cmd_plan(config: &OperatorConfig, key: &str, formatter: &OutputFormatter) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let key = ResourceKey::parse(key);

    let plan = reconciler.plan(&key, &shutdown_token()).await?.ok_or_else(|| {
        OperatorError::Store(StoreError::NotFound {
            key: key.to_string(),
        })
    })?;
    emit(&formatter.format_plan(&plan))
}

/// Apply manifests to the store.
async fn cmd_apply(
    config: &OperatorConfig,
    file: &Path,
    reconcile: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let manifests = ConfigParser::new().load_manifests(file)?;
    let result = ConfigValidator::new().validate_manifests(&manifests)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    let store = build_store(config)?;
    let mut keys = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let key = manifest.key();
        let resource = store.apply(&key, manifest.spec).await?;
        debug!("Applied {key} (generation {})", resource.generation);
        keys.push(key);
    }
    emit(&formatter.format_message(&format!("Applied {} users", keys.len())))?;

    if !reconcile {
        return Ok(());
    }

    let reconciler = build_reconciler(config).await?;
    let cancel = shutdown_token();
    let mut first_error = None;
    for key in &keys {
        match reconciler.reconcile(key, &cancel).await {
            Ok(outcome) => emit(&formatter.format_outcome(key, &outcome))?,
            Err(e) => {
                error!(user = %key, "Reconcile failed: {e}");
                first_error.get_or_insert(e);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Request deletion of a user.
async fn cmd_delete(
    config: &OperatorConfig,
    key: &str,
    reconcile: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let key = ResourceKey::parse(key);

    if reconcile {
        let reconciler = build_reconciler(config).await?;
        reconciler.store().request_delete(&key).await?;
        let outcome = reconciler.reconcile(&key, &shutdown_token()).await?;
        return emit(&formatter.format_outcome(&key, &outcome));
    }

    build_store(config)?.request_delete(&key).await?;
    emit(&formatter.format_message(&format!("Deletion of {key} requested")))
}

/// Show users in the store.
async fn cmd_get(config: &OperatorConfig, key: Option<&str>, formatter: &OutputFormatter) -> Result<()> {
    let store = build_store(config)?;

    let users = match key {
        Some(key) => {
            let key = ResourceKey::parse(key);
            let resource = store.get(&key).await?.ok_or_else(|| {
                OperatorError::Store(StoreError::NotFound {
                    key: key.to_string(),
                })
            })?;
            vec![resource]
        }
        None => store.list().await?,
    };

    emit(&formatter.format_users(&users))
}

/// List every user in the pool.
async fn cmd_list_pool(config: &OperatorConfig, formatter: &OutputFormatter) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let users = reconciler.pool_users().await?;
    emit(&formatter.format_pool(&users))
}

/// Compare the pool with the store.
async fn cmd_drift(config: &OperatorConfig, formatter: &OutputFormatter) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let report = reconciler.check_drift().await?;
    emit(&formatter.format_drift(&report))
}

/// Validate the configuration and optional manifests.
fn cmd_validate(
    config: &OperatorConfig,
    file: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let validator = ConfigValidator::new();
    let mut result = validator.validate(config)?;

    let manifests = match file {
        Some(path) => {
            let manifests = ConfigParser::new().load_manifests(path)?;
            let manifest_result = validator.validate_manifests(&manifests)?;
            result.warnings.extend(manifest_result.warnings);
            Some(manifests.len())
        }
        None => None,
    };

    emit(&formatter.format_validation(config, &result, manifests, show_warnings))
}

//! Daemon bootstrap orchestration.
//!
//! Everything here runs once, in the pool manager, before any worker is
//! forked: configuration, telemetry, socket checks and resource preloading.

use std::sync::Arc;

use catapult_config::{
    Config, ConfigError, HelperConfig, SocketPath, SocketPreparationError, WorkerCount,
    WorkerCountSource,
};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::warn;

use crate::dispatch::DispatchTable;
use crate::external::ExternalRunner;
use crate::handlers;
use crate::health::HealthReporter;
use crate::resources::{LexiconSet, ResourceError};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps a ready-made configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// A configured value is missing or invalid.
    #[error("invalid configuration: {source}")]
    Invalid {
        /// Underlying validation error.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Something already exists at the socket path.
    #[error("socket path {path} already exists; remove it if no daemon is running")]
    SocketExists {
        /// Configured socket path.
        path: String,
    },
    /// Socket preparation failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// Preloading resources failed.
    #[error("failed to preload resources: {source}")]
    Resources {
        /// Underlying loader error.
        #[source]
        source: ResourceError,
    },
}

impl From<SocketPreparationError> for BootstrapError {
    fn from(source: SocketPreparationError) -> Self {
        match source {
            SocketPreparationError::AlreadyExists { path } => Self::SocketExists {
                path: path.to_string(),
            },
            other => Self::Socket { source: other },
        }
    }
}

/// Result of a successful bootstrap: everything the pool needs to fork.
pub struct Daemon {
    config: Config,
    socket: SocketPath,
    workers: WorkerCount,
    helpers: Vec<HelperConfig>,
    lexicons: Arc<LexiconSet>,
    table: DispatchTable,
    external: ExternalRunner,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Socket the pool binds.
    #[must_use]
    pub fn socket(&self) -> &SocketPath {
        &self.socket
    }

    /// Number of workers, including the inline one.
    #[must_use]
    pub fn workers(&self) -> &WorkerCount {
        &self.workers
    }

    /// Helpers each worker supervises, one per work identifier.
    #[must_use]
    pub fn helpers(&self) -> &[HelperConfig] {
        &self.helpers
    }

    /// Preloaded lexicons.
    #[must_use]
    pub fn lexicons(&self) -> &Arc<LexiconSet> {
        &self.lexicons
    }

    /// Dispatch entries shared by every worker.
    #[must_use]
    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Runner for unregistered work.
    #[must_use]
    pub fn external(&self) -> &ExternalRunner {
        &self.external
    }

    /// Whether captured output is forwarded to clients.
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.config.verbose()
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Reporter shared with workers and supervisors.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Daemon")
            .field("socket", &self.socket)
            .field("workers", &self.workers)
            .field("helpers", &self.helpers)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] for the first step that fails; the reporter is
/// told about the failure before it is returned.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    match prepare(loader, &reporter) {
        Ok(daemon) => {
            reporter.bootstrap_succeeded(&daemon.config);
            Ok(daemon)
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn prepare(
    loader: &dyn ConfigLoader,
    reporter: &Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let configured = config
        .socket()
        .map_err(|source| BootstrapError::Invalid { source })?;
    configured.ensure_vacant()?;
    configured.prepare_filesystem()?;
    // Worker 0 changes directory per request; the watcher thread removes the
    // socket by this path.
    let socket = configured.absolutize()?;

    let helpers = config
        .helpers()
        .map_err(|source| BootstrapError::Invalid { source })?;

    let workers = config.worker_count();
    if let WorkerCountSource::Invalid(raw) = &workers.source {
        warn!(
            target: BOOTSTRAP_TARGET,
            configured = %raw,
            workers = workers.count.get(),
            "worker count is not a positive integer; using host parallelism"
        );
    }

    let lexicons = LexiconSet::load(&config.lexicon_paths())
        .map(Arc::new)
        .map_err(|source| BootstrapError::Resources { source })?;
    reporter.resources_loaded(&lexicons);

    let table = handlers::shared_table(&lexicons);
    let external = ExternalRunner::new(config.module_dirs());

    Ok(Daemon {
        config,
        socket,
        workers,
        helpers,
        lexicons,
        table,
        external,
        telemetry,
        reporter: Arc::clone(reporter),
    })
}

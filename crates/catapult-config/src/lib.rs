//! Shared configuration for the catapult daemon.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then a
//! `catapult.toml` file, then `CATAPULT_*` environment variables, then command
//! line flags. Every field is optional at the loader level; accessors apply
//! defaults and validation so callers only ever see resolved values.
//!
//! The values are read once at daemon start. Workers inherit the resolved
//! configuration when the pool forks them and never reload it.

mod defaults;
mod helper;
mod logging;
mod socket;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{DEFAULT_HELPER_ENCODING, DEFAULT_HELPER_ID, default_worker_count};
pub use helper::{HelperConfig, HelperConfigError, HelperTable, MODEL_PLACEHOLDER, RestartPolicy};
pub use logging::{DEFAULT_LOG_FILTER, LogFormat};
pub use socket::{SocketPath, SocketPreparationError};

/// Daemon configuration as loaded from files, environment and flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CATAPULT")]
pub struct Config {
    /// Unix socket the workers accept connections on. Must not exist yet.
    pub socket_path: Option<String>,
    /// Number of worker processes; anything but a positive integer selects
    /// the host parallelism.
    pub workers: Option<String>,
    /// Forward captured output and diagnostic traces to clients.
    pub verbose: Option<bool>,
    /// Whitespace separated lexicon files preloaded before the workers fork.
    pub lexicons: Option<String>,
    /// Colon separated directories searched for external modules.
    pub module_path: Option<String>,
    /// Executable of the supervised helper process.
    pub helper_program: Option<String>,
    /// Shell-style arguments for the helper; `{model}` expands to the model.
    pub helper_args: Option<String>,
    /// Model file handed to the helper.
    pub helper_model: Option<String>,
    /// Text encoding announced to the helper.
    pub helper_encoding: Option<String>,
    /// Helper relaunch policy: `every-request` or `on-demand`.
    pub helper_restart: Option<RestartPolicy>,
    /// Work identifier the helper-backed handler is registered under.
    pub helper_id: Option<String>,
    /// Further helpers keyed by work identifier, read from `[helpers.<id>]`
    /// tables in the configuration file.
    #[serde(default)]
    #[ortho_config(skip_cli, merge_strategy = "replace")]
    pub helpers: BTreeMap<String, HelperTable>,
    /// Tracing filter expression.
    pub log_filter: Option<String>,
    /// Log output format: `json` or `compact`.
    pub log_format: Option<LogFormat>,
}

/// How the worker count was determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCountSource {
    /// Taken from configuration.
    Configured,
    /// No count was configured.
    HostParallelism,
    /// The configured value was not a positive integer.
    Invalid(String),
}

/// Resolved worker count together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCount {
    /// Number of workers, including the pool manager's inline worker.
    pub count: NonZeroUsize,
    /// Where the count came from.
    pub source: WorkerCountSource,
}

/// Errors raised while resolving configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No socket path was configured.
    #[error("a socket path is required (--socket-path or CATAPULT_SOCKET_PATH)")]
    MissingSocketPath,
    /// Two helpers claim the same work identifier.
    #[error("helper '{id}' is configured more than once")]
    DuplicateHelper { id: String },
    /// Helper configuration was invalid.
    #[error(transparent)]
    Helper(#[from] HelperConfigError),
}

impl Config {
    /// Returns the configured socket location.
    pub fn socket(&self) -> Result<SocketPath, ConfigError> {
        self.socket_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(SocketPath::new)
            .ok_or(ConfigError::MissingSocketPath)
    }

    /// Resolves the worker count, falling back to the host parallelism.
    #[must_use]
    pub fn worker_count(&self) -> WorkerCount {
        let Some(raw) = self.workers.as_deref() else {
            return WorkerCount {
                count: default_worker_count(),
                source: WorkerCountSource::HostParallelism,
            };
        };
        match raw.trim().parse::<NonZeroUsize>() {
            Ok(count) => WorkerCount {
                count,
                source: WorkerCountSource::Configured,
            },
            Err(_) => WorkerCount {
                count: default_worker_count(),
                source: WorkerCountSource::Invalid(raw.to_owned()),
            },
        }
    }

    /// Whether captured output is forwarded to clients.
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    /// Lexicon files to preload.
    #[must_use]
    pub fn lexicon_paths(&self) -> Vec<Utf8PathBuf> {
        self.lexicons
            .as_deref()
            .map(|raw| raw.split_whitespace().map(Utf8PathBuf::from).collect())
            .unwrap_or_default()
    }

    /// Directories searched for external modules, in order.
    #[must_use]
    pub fn module_dirs(&self) -> Vec<Utf8PathBuf> {
        self.module_path
            .as_deref()
            .map(|raw| {
                raw.split(':')
                    .filter(|dir| !dir.is_empty())
                    .map(Utf8PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolves every configured helper.
    ///
    /// The helper described by the flat `helper_*` settings comes first, then
    /// the `[helpers.<id>]` tables in identifier order.
    pub fn helpers(&self) -> Result<Vec<HelperConfig>, ConfigError> {
        let mut helpers: Vec<HelperConfig> = Vec::with_capacity(self.helpers.len() + 1);
        if let Some(program) = self.helper_program.as_deref().filter(|p| !p.is_empty()) {
            let table = HelperTable {
                program: program.to_owned(),
                args: self.helper_args.clone(),
                model: self.helper_model.clone(),
                encoding: self.helper_encoding.clone(),
                restart: self.helper_restart,
            };
            let id = self.helper_id.as_deref().unwrap_or(DEFAULT_HELPER_ID);
            helpers.push(table.resolve(id)?);
        }
        for (id, table) in &self.helpers {
            if helpers.iter().any(|helper| helper.id == *id) {
                return Err(ConfigError::DuplicateHelper { id: id.clone() });
            }
            helpers.push(table.resolve(id)?);
        }
        Ok(helpers)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_default()
    }
}

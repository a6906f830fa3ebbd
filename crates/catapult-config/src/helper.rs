//! Static configuration for the supervised helper process.
//!
//! The helper is an external program that certain handlers feed through its
//! standard streams. Each worker launches its own instance from this
//! configuration; the values are resolved once at bootstrap and never change.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::defaults::DEFAULT_HELPER_ENCODING;

/// Placeholder in helper arguments that is replaced with the model path.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// When a worker relaunches its helper process.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum RestartPolicy {
    /// Relaunch after every request that used the helper. Helpers that keep
    /// per-call state or cannot serve a second request need this.
    #[default]
    EveryRequest,
    /// Keep the running helper until a restart is requested explicitly or the
    /// process exits on its own.
    OnDemand,
}

/// Resolved launch parameters for the helper process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperConfig {
    /// Work identifier the helper-backed handler is registered under.
    pub id: String,
    /// Executable to launch.
    pub program: String,
    /// Arguments passed to the executable, with the model placeholder expanded.
    pub args: Vec<String>,
    /// Model file handed to the helper, if any.
    pub model: Option<String>,
    /// Text encoding announced to the helper.
    pub encoding: String,
    /// Relaunch policy.
    pub restart: RestartPolicy,
}

/// Helper declared in a `[helpers.<id>]` table of the configuration file.
///
/// The table key is the work identifier the helper is registered under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HelperTable {
    /// Executable to launch.
    pub program: String,
    /// Shell-style arguments; `{model}` expands to the model.
    pub args: Option<String>,
    /// Model file handed to the helper.
    pub model: Option<String>,
    /// Text encoding announced to the helper.
    pub encoding: Option<String>,
    /// Relaunch policy.
    pub restart: Option<RestartPolicy>,
}

impl HelperTable {
    /// Resolves the table into launch parameters for `id`.
    pub fn resolve(&self, id: &str) -> Result<HelperConfig, HelperConfigError> {
        if self.program.trim().is_empty() {
            return Err(HelperConfigError::MissingProgram { id: id.to_owned() });
        }
        let args = match self.args.as_deref() {
            Some(raw) => HelperConfig::parse_args(raw, self.model.as_deref())?,
            None => Vec::new(),
        };
        Ok(HelperConfig {
            id: id.to_owned(),
            program: self.program.clone(),
            args,
            model: self.model.clone(),
            encoding: self
                .encoding
                .clone()
                .unwrap_or_else(|| DEFAULT_HELPER_ENCODING.to_owned()),
            restart: self.restart.unwrap_or_default(),
        })
    }
}

impl HelperConfig {
    /// Parses shell-style helper arguments and expands the model placeholder.
    pub fn parse_args(raw: &str, model: Option<&str>) -> Result<Vec<String>, HelperConfigError> {
        let words = shell_words::split(raw).map_err(|source| HelperConfigError::Arguments {
            raw: raw.to_owned(),
            source,
        })?;
        words
            .into_iter()
            .map(|word| expand_model(word, model))
            .collect()
    }
}

fn expand_model(word: String, model: Option<&str>) -> Result<String, HelperConfigError> {
    if !word.contains(MODEL_PLACEHOLDER) {
        return Ok(word);
    }
    match model {
        Some(model) => Ok(word.replace(MODEL_PLACEHOLDER, model)),
        None => Err(HelperConfigError::MissingModel { argument: word }),
    }
}

/// Errors raised while resolving helper configuration.
#[derive(Debug, Error)]
pub enum HelperConfigError {
    /// The argument string is not valid shell syntax.
    #[error("invalid helper arguments '{raw}': {source}")]
    Arguments {
        raw: String,
        #[source]
        source: shell_words::ParseError,
    },
    /// A helper table names no program.
    #[error("helper '{id}' has no program configured")]
    MissingProgram { id: String },
    /// An argument references the model but none is configured.
    #[error("helper argument '{argument}' references {{model}} but no helper model is configured")]
    MissingModel { argument: String },
}

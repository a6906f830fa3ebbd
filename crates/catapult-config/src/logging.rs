//! Log output settings.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Filter applied when no `log_filter` is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// How log events are rendered on stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event.
    Json,
    /// One human-readable line per event.
    #[default]
    Compact,
}

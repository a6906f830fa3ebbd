//! Resources preloaded once before the pool forks.
//!
//! A lexicon is a tab-separated `word<TAB>annotation` file. Blank lines and
//! lines starting with `#` are ignored. Lexicons are keyed by file stem and
//! kept in configuration order, which is also the order annotations are
//! reported in. After loading nothing mutates them, so forked workers share the
//! pages copy-on-write.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

const RESOURCES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resources");

/// Errors raised while loading preloaded resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The file could not be read.
    #[error("failed to read lexicon '{path}': {source}")]
    Read {
        /// Lexicon path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A line lacks the tab separator or the word.
    #[error("lexicon '{name}' line {line}: expected 'word<TAB>annotation'")]
    Malformed {
        /// Lexicon name.
        name: String,
        /// One-based line number.
        line: usize,
    },
    /// The path has no usable file stem.
    #[error("lexicon path '{path}' has no file name")]
    Unnamed {
        /// Lexicon path.
        path: Utf8PathBuf,
    },
    /// Two lexicons share a file stem.
    #[error("duplicate lexicon name '{name}'")]
    DuplicateName {
        /// Conflicting name.
        name: String,
    },
}

/// Word-to-annotation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexicon {
    name: String,
    entries: HashMap<String, String>,
}

impl Lexicon {
    /// Reads a lexicon file, naming it after the file stem.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] when the file is unreadable or malformed.
    pub fn load(path: &Utf8Path) -> Result<Self, ResourceError> {
        let name = path.file_stem().ok_or_else(|| ResourceError::Unnamed {
            path: path.to_owned(),
        })?;
        let text = fs::read_to_string(path).map_err(|source| ResourceError::Read {
            path: path.to_owned(),
            source,
        })?;
        let lexicon = Self::parse(name, &text)?;
        debug!(
            target: RESOURCES_TARGET,
            lexicon = name,
            path = %path,
            entries = lexicon.len(),
            "lexicon loaded"
        );
        Ok(lexicon)
    }

    /// Parses lexicon text.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Malformed`] for lines without a tab or word.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, ResourceError> {
        let name = name.into();
        let mut entries = HashMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((word, annotation)) = line.split_once('\t') else {
                return Err(ResourceError::Malformed {
                    name,
                    line: index + 1,
                });
            };
            if word.is_empty() {
                return Err(ResourceError::Malformed {
                    name,
                    line: index + 1,
                });
            }
            entries.insert(word.to_owned(), annotation.to_owned());
        }
        Ok(Self { name, entries })
    }

    /// Name the lexicon is reported under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Annotation for a word.
    #[must_use]
    pub fn lookup(&self, word: &str) -> Option<&str> {
        self.entries.get(word).map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the lexicon has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lexicons in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexiconSet {
    lexicons: Vec<Lexicon>,
}

impl LexiconSet {
    /// Loads every configured lexicon.
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable or malformed file, or a repeated name.
    pub fn load(paths: &[Utf8PathBuf]) -> Result<Self, ResourceError> {
        paths
            .iter()
            .map(|path| Lexicon::load(path))
            .collect::<Result<Vec<_>, _>>()
            .and_then(Self::from_lexicons)
    }

    /// Builds a set from already parsed lexicons.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::DuplicateName`] when two lexicons share a name.
    pub fn from_lexicons(lexicons: Vec<Lexicon>) -> Result<Self, ResourceError> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = lexicons
            .iter()
            .find(|lexicon| !seen.insert(lexicon.name.as_str()))
        {
            return Err(ResourceError::DuplicateName {
                name: duplicate.name.clone(),
            });
        }
        Ok(Self { lexicons })
    }

    /// Number of lexicons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lexicons.len()
    }

    /// Whether no lexicon is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lexicons.is_empty()
    }

    /// Total number of entries across all lexicons.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.lexicons.iter().map(Lexicon::len).sum()
    }

    /// `(lexicon name, annotation)` pairs for a word, in configuration order.
    pub fn annotations<'a>(&'a self, word: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.lexicons
            .iter()
            .filter_map(move |lexicon| lexicon.lookup(word).map(|value| (lexicon.name(), value)))
    }

    /// Whether any lexicon knows the word.
    #[must_use]
    pub fn is_known(&self, word: &str) -> bool {
        self.annotations(word).next().is_some()
    }
}

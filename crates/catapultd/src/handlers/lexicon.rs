//! Handlers backed by the preloaded lexicons.

use std::fs;
use std::io::Write;
use std::sync::Arc;

use crate::dispatch::{Invocation, WorkError, WorkHandler};
use crate::resources::LexiconSet;

/// Identifier of the annotation handler.
pub const ANNOTATE: &str = "lexicon.annotate";

/// Identifier of the token selection handlers.
pub const SELECT: &str = "lexicon.select";

/// Annotates every token of a file with its lexicon entries.
#[derive(Debug, Clone)]
pub struct LexiconAnnotate {
    lexicons: Arc<LexiconSet>,
}

impl LexiconAnnotate {
    /// Binds the handler to the preloaded lexicons.
    #[must_use]
    pub fn new(lexicons: Arc<LexiconSet>) -> Self {
        Self { lexicons }
    }

    fn annotate(&self, token: &str, out: &mut String) {
        out.push_str(token);
        out.push_str("\t|");
        for (name, value) in self.lexicons.annotations(token) {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
            out.push('|');
        }
        out.push('\n');
    }
}

impl WorkHandler for LexiconAnnotate {
    fn run(&self, invocation: &mut Invocation<'_>) -> Result<(), WorkError> {
        let (input, output) = file_pair(invocation, ANNOTATE)?;
        let text = read_input(invocation, &input)?;
        let mut annotated = String::new();
        let mut tokens = 0_usize;
        for token in text.split_whitespace() {
            self.annotate(token, &mut annotated);
            tokens += 1;
        }
        write_output(invocation, &output, &annotated)?;
        writeln!(invocation.output(), "annotated {tokens} tokens from {input}")
            .map_err(|source| WorkError::io("response", source))
    }
}

/// Which tokens a [`LexiconSelect`] handler keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Tokens found in at least one lexicon.
    Known,
    /// Tokens found in no lexicon.
    Unknown,
}

impl Membership {
    /// Flag selecting this membership as the handler's sub-key.
    #[must_use]
    pub fn flag(self) -> &'static str {
        match self {
            Self::Known => "--known",
            Self::Unknown => "--unknown",
        }
    }
}

/// Writes the tokens of a file that are, or are not, in any lexicon.
#[derive(Debug, Clone)]
pub struct LexiconSelect {
    lexicons: Arc<LexiconSet>,
    membership: Membership,
}

impl LexiconSelect {
    /// Binds the handler to the preloaded lexicons.
    #[must_use]
    pub fn new(lexicons: Arc<LexiconSet>, membership: Membership) -> Self {
        Self {
            lexicons,
            membership,
        }
    }
}

impl WorkHandler for LexiconSelect {
    fn run(&self, invocation: &mut Invocation<'_>) -> Result<(), WorkError> {
        let usage = format!("{SELECT} {}", self.membership.flag());
        let (input, output) = file_pair(invocation, &usage)?;
        let text = read_input(invocation, &input)?;
        let keep_known = self.membership == Membership::Known;
        let mut selected = String::new();
        let mut count = 0_usize;
        for token in text
            .split_whitespace()
            .filter(|token| self.lexicons.is_known(token) == keep_known)
        {
            selected.push_str(token);
            selected.push('\n');
            count += 1;
        }
        write_output(invocation, &output, &selected)?;
        writeln!(invocation.output(), "selected {count} tokens from {input}")
            .map_err(|source| WorkError::io("response", source))
    }
}

fn file_pair(invocation: &Invocation<'_>, usage: &str) -> Result<(String, String), WorkError> {
    match invocation.args() {
        [input, output] => Ok((input.clone(), output.clone())),
        _ => Err(WorkError::usage(format!("{usage} <input> <output>"))),
    }
}

fn read_input(invocation: &Invocation<'_>, input: &str) -> Result<String, WorkError> {
    fs::read_to_string(invocation.resolve_path(input)).map_err(|source| WorkError::io(input, source))
}

fn write_output(invocation: &Invocation<'_>, output: &str, text: &str) -> Result<(), WorkError> {
    fs::write(invocation.resolve_path(output), text).map_err(|source| WorkError::io(output, source))
}

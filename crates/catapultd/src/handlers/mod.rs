//! Statically registered work handlers.
//!
//! [`shared_table`] builds the entries every worker inherits; it runs once in
//! the pool manager before forking. [`register_helper`] adds the
//! entries for each configured helper and must run inside each worker, since
//! every worker supervises its own helper processes.

mod helper_pipe;
mod lexicon;

use std::sync::Arc;

use catapult_config::HelperConfig;

use crate::dispatch::DispatchTable;
use crate::health::HealthReporter;
use crate::resources::LexiconSet;
use crate::supervisor::{CommandLauncher, SharedSupervisor, Supervisor};

pub use self::helper_pipe::HelperPipe;
pub use self::lexicon::{ANNOTATE, LexiconAnnotate, LexiconSelect, Membership, SELECT};

/// Builds the dispatch entries shared by all workers.
///
/// Lexicon handlers are only registered when at least one lexicon is loaded.
#[must_use]
pub fn shared_table(lexicons: &Arc<LexiconSet>) -> DispatchTable {
    let mut table = DispatchTable::new();
    if lexicons.is_empty() {
        return table;
    }
    table.register_work(ANNOTATE, LexiconAnnotate::new(Arc::clone(lexicons)));
    for membership in [Membership::Known, Membership::Unknown] {
        table.register_pair(
            SELECT,
            membership.flag(),
            LexiconSelect::new(Arc::clone(lexicons), membership),
        );
    }
    table
}

/// Registers a helper-backed handler and its cleanup hook under the helper's
/// identifier.
///
/// Returns the supervisor handle shared by both entries.
pub fn register_helper(
    table: &mut DispatchTable,
    config: HelperConfig,
    reporter: Arc<dyn HealthReporter>,
) -> SharedSupervisor<CommandLauncher> {
    let id = config.id.clone();
    let policy = config.restart;
    let supervisor = SharedSupervisor::new(Supervisor::new(
        id.clone(),
        CommandLauncher::new(config),
        policy,
        reporter,
    ));
    table.register_work(id.clone(), HelperPipe::new(supervisor.clone()));
    table.register_cleanup(id, supervisor.clone());
    supervisor
}

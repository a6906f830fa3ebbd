//! Scoped change of the process working directory.

use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::dispatch::WorkError;

use super::WORKER_TARGET;

/// Restores the previous working directory when dropped.
///
/// The working directory is process-wide; a worker serves one request at a
/// time, so nothing else observes the change.
#[derive(Debug)]
pub struct WorkingDirectory {
    previous: PathBuf,
}

impl WorkingDirectory {
    /// Changes into `dir`, remembering the current directory.
    ///
    /// # Errors
    ///
    /// A relative `dir` is rejected with [`WorkError::RelativeDirectory`]; a
    /// missing one is reported as [`WorkError::NotFound`].
    pub fn enter(dir: &Path) -> Result<Self, WorkError> {
        if !dir.is_absolute() {
            return Err(WorkError::RelativeDirectory {
                dir: dir.display().to_string(),
            });
        }
        let previous =
            env::current_dir().map_err(|source| WorkError::io("current directory", source))?;
        env::set_current_dir(dir)
            .map_err(|source| WorkError::io(dir.display().to_string(), source))?;
        debug!(
            target: WORKER_TARGET,
            dir = %dir.display(),
            "entered caller directory"
        );
        Ok(Self { previous })
    }

    /// Directory restored on drop.
    #[must_use]
    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        if let Err(error) = env::set_current_dir(&self.previous) {
            warn!(
                target: WORKER_TARGET,
                dir = %self.previous.display(),
                %error,
                "failed to restore working directory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::lock_cwd;

    #[test]
    fn restores_directory_on_drop() {
        let _guard = lock_cwd();
        let before = env::current_dir().expect("cwd");
        let target = tempfile::tempdir().expect("tempdir");
        {
            let scope = WorkingDirectory::enter(target.path()).expect("enter");
            assert_eq!(scope.previous(), before);
            assert_eq!(
                env::current_dir().expect("cwd").canonicalize().expect("canonical"),
                target.path().canonicalize().expect("canonical")
            );
        }
        assert_eq!(env::current_dir().expect("cwd"), before);
    }

    #[test]
    fn relative_directory_is_rejected_without_moving() {
        let _guard = lock_cwd();
        let before = env::current_dir().expect("cwd");
        let error = WorkingDirectory::enter(Path::new("sub")).expect_err("relative");
        assert!(matches!(error, WorkError::RelativeDirectory { ref dir } if dir == "sub"));
        assert_eq!(env::current_dir().expect("cwd"), before);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let _guard = lock_cwd();
        let before = env::current_dir().expect("cwd");
        let error = WorkingDirectory::enter(Path::new("/nonexistent/catapult/dir"))
            .expect_err("missing");
        assert!(error.is_not_found());
        assert_eq!(env::current_dir().expect("cwd"), before);
    }
}

//! Process-wide working directory for spawned commands.

use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{VpsError, VpsResult};

/// The directory every new command runs in. Always an existing directory.
#[derive(Debug)]
pub struct WorkingDirectoryState {
    current: Mutex<PathBuf>,
}

impl WorkingDirectoryState {
    /// Start in `initial`, which must be an existing directory. Relative
    /// paths are taken against the process's own current directory.
    pub fn new(initial: impl AsRef<Path>) -> VpsResult<Self> {
        let initial = initial.as_ref();
        let absolute = if initial.is_absolute() {
            normalize(initial)
        } else {
            normalize(&std::env::current_dir()?.join(initial))
        };
        if !absolute.is_dir() {
            return Err(VpsError::NotADirectory(absolute));
        }
        Ok(Self {
            current: Mutex::new(absolute),
        })
    }

    pub async fn current(&self) -> PathBuf {
        self.current.lock().await.clone()
    }

    /// Resolve `candidate` against the current directory and switch to it.
    ///
    /// The lock is held across the existence check so resolution and commit
    /// see the same base.
    pub async fn change_to(&self, candidate: &str) -> VpsResult<PathBuf> {
        let mut current = self.current.lock().await;
        let target = resolve(&current, candidate);
        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                info!(from = %current.display(), to = %target.display(), "working directory changed");
                *current = target.clone();
                Ok(target)
            }
            _ => Err(VpsError::NotADirectory(target)),
        }
    }
}

/// Join `candidate` onto `base` and collapse `.`/`..` lexically. A leading
/// `~` refers to the home directory.
pub fn resolve(base: &Path, candidate: &str) -> PathBuf {
    let candidate = candidate.trim();
    let joined = match expand_tilde(candidate) {
        Some(home_relative) => home_relative,
        None => base.join(candidate),
    };
    normalize(&joined)
}

fn expand_tilde(s: &str) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    if s == "~" {
        Some(home)
    } else {
        s.strip_prefix("~/").map(|rest| home.join(rest))
    }
}

/// Lexical normalization: does not touch the filesystem or follow symlinks.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

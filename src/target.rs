//! The filesystem target being published.
//!
//! A [`ServeTarget`] is resolved exactly once at startup with a single
//! metadata call and is immutable afterwards. Whether it is a directory
//! decides the routing mode for the whole process lifetime.

use std::path::{Component, Path, PathBuf};

use crate::error::{ServeError, ServeResult};

/// The file or directory path being served over HTTP.
#[derive(Debug, Clone)]
pub struct ServeTarget {
    /// Cleaned target path.
    path: PathBuf,

    /// Whether the target is a directory.
    is_dir: bool,
}

impl ServeTarget {
    /// Resolves a target from a CLI path argument.
    ///
    /// Performs the one-shot filesystem status check. A target that does
    /// not exist or cannot be read is a fatal configuration error; no
    /// listener is created afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Config`] if the path cannot be stat'ed.
    pub fn resolve<P: AsRef<Path>>(path: P) -> ServeResult<Self> {
        let path = clean(path.as_ref());
        let metadata = std::fs::metadata(&path)
            .map_err(|e| ServeError::config(format!("cannot stat {}: {e}", path.display())))?;

        Ok(Self {
            is_dir: metadata.is_dir(),
            path,
        })
    }

    /// Returns the cleaned target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the target is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Base name of the target, if it has one.
    ///
    /// For a single-file target this is the name of its one route.
    #[must_use]
    pub fn base_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Recomputes the filesystem path a request URL maps to.
    ///
    /// For a directory target the URL path is joined onto the root and
    /// normalized; for a single-file target the fixed file path is
    /// returned regardless of the URL. This is the access-log heuristic:
    /// it does not account for index-file substitution, and callers must
    /// treat a failed stat on the result as "do not log", never as a
    /// request failure.
    #[must_use]
    pub fn served_path(&self, url_path: &str) -> PathBuf {
        if self.is_dir {
            clean(&self.path.join(url_path.trim_start_matches('/')))
        } else {
            self.path.clone()
        }
    }
}

/// Lexically normalizes a path: drops `.` components and resolves `..`
/// against preceding normal components.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

//! Sample path resolution
//!
//! Event descriptions name samples by identifier (usually a relative file
//! name). A [`PathResolver`] turns that into a file the backend can open.

use std::path::{Path, PathBuf};

/// Maps a sample identifier to a readable file
pub trait PathResolver: Send + Sync {
    /// Resolve `identifier`, or `None` if no readable file exists
    fn resolve(&self, identifier: &str) -> Option<PathBuf>;
}

impl<F> PathResolver for F
where
    F: Fn(&str) -> Option<PathBuf> + Send + Sync,
{
    fn resolve(&self, identifier: &str) -> Option<PathBuf> {
        self(identifier)
    }
}

/// Looks an identifier up in an ordered list of directories
#[derive(Debug, Clone, Default)]
pub struct SearchPathResolver {
    roots: Vec<PathBuf>,
}

impl SearchPathResolver {
    /// Create a resolver over `roots`, searched in order
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a directory searched after the existing ones
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Directories searched, in order
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl PathResolver for SearchPathResolver {
    fn resolve(&self, identifier: &str) -> Option<PathBuf> {
        let direct = Path::new(identifier);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }
        self.roots
            .iter()
            .map(|root| root.join(identifier))
            .find(|candidate| candidate.is_file())
    }
}

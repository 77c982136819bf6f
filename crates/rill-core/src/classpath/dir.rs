//! Recursive enumeration of classpath directories.

use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::entry::{ClasspathEntry, system_time_millis};
use super::filter::{PackageFilter, accepts};
use crate::error::{Error, Result};

/// Lazily walks every regular file below a directory.
///
/// A root that does not exist produces an empty sequence rather than an error.
pub struct DirEnumerator {
    root: PathBuf,
    walker: Option<walkdir::IntoIter>,
    filter: Option<PackageFilter>,
    peeked: Option<Result<ClasspathEntry>>,
}

impl DirEnumerator {
    /// Enumerate all files below `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_filter(root, None)
    }

    /// Enumerate the files below `root` that pass `filter`.
    pub fn with_filter(root: impl AsRef<Path>, filter: Option<PackageFilter>) -> Self {
        let root = std::path::absolute(root.as_ref()).unwrap_or_else(|_| root.as_ref().to_path_buf());
        let walker = root
            .is_dir()
            .then(|| WalkDir::new(&root).sort_by_file_name().into_iter());
        if walker.is_none() {
            tracing::debug!("Classpath directory {} does not exist", root.display());
        }
        Self {
            root,
            walker,
            filter,
            peeked: None,
        }
    }

    /// The enumerated root directory (absolute).
    pub fn directory(&self) -> &Path {
        &self.root
    }

    /// Whether another entry is available. Never advances the sequence.
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.advance();
        }
        self.peeked.is_some()
    }

    /// Next entry, or [`Error::ExhaustedIteration`] past the end.
    pub fn next_entry(&mut self) -> Result<ClasspathEntry> {
        self.next().unwrap_or(Err(Error::ExhaustedIteration))
    }

    /// Map a file below the root back to its slash-separated logical name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] for paths outside the enumerated root.
    pub fn relative_name(&self, path: &Path) -> Result<String> {
        let path = std::path::absolute(path)?;
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            Error::InvalidState(format!(
                "{} is not below {}",
                path.display(),
                self.root.display()
            ))
        })?;

        let parts: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            return Err(Error::InvalidState(format!(
                "{} is the enumerated root, not a file below it",
                path.display()
            )));
        }
        Ok(parts.join("/"))
    }

    fn advance(&mut self) -> Option<Result<ClasspathEntry>> {
        loop {
            let dent = match self.walker.as_mut()?.next()? {
                Ok(dent) => dent,
                Err(e) => return Some(Err(e.into())),
            };
            if !dent.file_type().is_file() {
                continue;
            }

            let name = match self.relative_name(dent.path()) {
                Ok(name) => name,
                Err(e) => return Some(Err(e)),
            };
            if !accepts(self.filter.as_ref(), &name) {
                continue;
            }

            let last_modified = match dent.metadata() {
                Ok(meta) => meta.modified().map(system_time_millis).unwrap_or(0),
                Err(e) => return Some(Err(e.into())),
            };
            return Some(Ok(ClasspathEntry::from_file(
                &self.root,
                name,
                dent.into_path(),
                last_modified,
            )));
        }
    }
}

impl Iterator for DirEnumerator {
    type Item = Result<ClasspathEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.peeked.take().or_else(|| self.advance())
    }
}

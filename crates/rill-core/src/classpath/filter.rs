//! Package filtering for classpath traversal.

use crate::error::{Error, Result};

/// Restricts a traversal to one package, optionally including sub-packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFilter {
    package: String,
    /// The package in slash form, as it appears in entry names
    path: String,
    recursive: bool,
}

impl PackageFilter {
    /// Create a filter for a dotted package name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] when the package is written as a path.
    pub fn new(package: &str, recursive: bool) -> Result<Self> {
        if package.contains('/') || package.contains('\\') {
            return Err(Error::InvalidArgument(format!(
                "package filter '{package}' must use dotted notation"
            )));
        }
        Ok(Self {
            package: package.to_string(),
            path: package.replace('.', "/"),
            recursive,
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether a slash-separated entry name falls inside the filtered package.
    pub fn matches(&self, entry_name: &str) -> bool {
        let dir = entry_name.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        if dir == self.path {
            return true;
        }
        self.recursive
            && (self.path.is_empty()
                || (dir.len() > self.path.len()
                    && dir.starts_with(&self.path)
                    && dir.as_bytes()[self.path.len()] == b'/'))
    }
}

/// Apply an optional filter.
pub(crate) fn accepts(filter: Option<&PackageFilter>, entry_name: &str) -> bool {
    filter.is_none_or(|f| f.matches(entry_name))
}

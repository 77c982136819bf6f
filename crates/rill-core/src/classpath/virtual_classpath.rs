//! A classpath string presented as one lazily enumerated sequence of entries.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::archive::{ArchiveEnumerator, HandleRegistry};
use super::dir::DirEnumerator;
use super::entry::ClasspathEntry;
use super::filter::PackageFilter;
use crate::error::{Error, Result};

/// Ordered directories and archives, optionally restricted to one package.
///
/// Cloning is cheap. Clones and filtered views share the set of open archive
/// handles, so [`close`](Self::close) on any of them releases all of them.
#[derive(Debug, Clone)]
pub struct VirtualClasspath {
    segments: Arc<[PathBuf]>,
    filter: Option<PackageFilter>,
    registry: Arc<HandleRegistry>,
}

impl VirtualClasspath {
    /// Build a classpath from a platform-separated path list.
    ///
    /// Empty segments are ignored.
    pub fn new(classpath: impl AsRef<OsStr>) -> Self {
        let segments: Vec<PathBuf> = std::env::split_paths(classpath.as_ref())
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        Self {
            segments: segments.into(),
            filter: None,
            registry: Arc::new(HandleRegistry::default()),
        }
    }

    /// Build a classpath restricted to `package`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for a package written in slash form.
    pub fn filtered(classpath: impl AsRef<OsStr>, package: &str, recursive: bool) -> Result<Self> {
        let filter = PackageFilter::new(package, recursive)?;
        let mut cp = Self::new(classpath);
        cp.filter = Some(filter);
        Ok(cp)
    }

    /// Derive a view of the same segments with a different filter.
    pub fn with_filter(&self, package: Option<&str>, recursive: bool) -> Result<Self> {
        let filter = package
            .map(|p| PackageFilter::new(p, recursive))
            .transpose()?;
        Ok(Self {
            segments: Arc::clone(&self.segments),
            filter,
            registry: Arc::clone(&self.registry),
        })
    }

    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }

    pub fn filter(&self) -> Option<&PackageFilter> {
        self.filter.as_ref()
    }

    /// Start a fresh traversal.
    pub fn iter(&self) -> ClasspathIter {
        ClasspathIter {
            segments: Arc::clone(&self.segments),
            next_segment: 0,
            filter: self.filter.clone(),
            registry: Arc::clone(&self.registry),
            current: None,
            peeked: None,
        }
    }

    /// First entry named `name` (slash form), in classpath order.
    pub fn find(&self, name: &str) -> Result<Option<ClasspathEntry>> {
        for entry in self.iter() {
            let entry = entry?;
            if entry.name() == name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Release every archive handle opened through this classpath.
    pub fn close(&self) {
        self.registry.close_all();
    }
}

impl<'a> IntoIterator for &'a VirtualClasspath {
    type Item = Result<ClasspathEntry>;
    type IntoIter = ClasspathIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

enum Segment {
    Dir(DirEnumerator),
    Archive(ArchiveEnumerator),
}

impl Segment {
    fn next(&mut self) -> Option<Result<ClasspathEntry>> {
        match self {
            Self::Dir(e) => e.next(),
            Self::Archive(e) => e.next(),
        }
    }
}

/// One traversal of a [`VirtualClasspath`].
pub struct ClasspathIter {
    segments: Arc<[PathBuf]>,
    next_segment: usize,
    filter: Option<PackageFilter>,
    registry: Arc<HandleRegistry>,
    current: Option<Segment>,
    peeked: Option<Result<ClasspathEntry>>,
}

impl ClasspathIter {
    /// Whether another entry is available. Never advances the traversal.
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

    fn open_segment(&self, path: &Path) -> Result<Option<Segment>> {
        if path.is_dir() {
            return Ok(Some(Segment::Dir(DirEnumerator::with_filter(
                path,
                self.filter.clone(),
            ))));
        }
        if path.is_file() {
            let archive = ArchiveEnumerator::open_registered(
                path,
                self.filter.clone(),
                Some(Arc::clone(&self.registry)),
            )?;
            return Ok(Some(Segment::Archive(archive)));
        }
        tracing::debug!("Skipping missing classpath segment {}", path.display());
        Ok(None)
    }

    fn advance(&mut self) -> Option<Result<ClasspathEntry>> {
        loop {
            if let Some(segment) = self.current.as_mut() {
                match segment.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }

            let path = self.segments.get(self.next_segment)?.clone();
            self.next_segment += 1;
            match self.open_segment(&path) {
                Ok(segment) => self.current = segment,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Iterator for ClasspathIter {
    type Item = Result<ClasspathEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.peeked.take().or_else(|| self.advance())
    }
}

//! Uniform view over every kind of file the toolchain can see.

use std::fmt;

use super::output::{OutputUnit, SourceUnit};
use crate::classpath::{ClasspathEntry, FileKind};
use crate::error::Result;

/// A classpath entry, an in-memory output, or an in-memory source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileObject {
    Entry(ClasspathEntry),
    Output(OutputUnit),
    Source(SourceUnit),
}

impl FileObject {
    /// Slash-separated name.
    pub fn name(&self) -> &str {
        match self {
            Self::Entry(e) => e.name(),
            Self::Output(o) => o.name(),
            Self::Source(s) => s.name(),
        }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            Self::Entry(e) => e.kind(),
            Self::Output(o) => o.kind(),
            Self::Source(s) => s.kind(),
        }
    }

    pub fn uri(&self) -> String {
        match self {
            Self::Entry(e) => e.uri(),
            Self::Output(o) => o.uri(),
            Self::Source(s) => s.uri(),
        }
    }

    /// Milliseconds since the Unix epoch. In-memory sources report 0.
    pub fn last_modified(&self) -> u64 {
        match self {
            Self::Entry(e) => e.last_modified(),
            Self::Output(o) => o.last_modified(),
            Self::Source(_) => 0,
        }
    }

    pub fn is_name_compatible(&self, simple_name: &str, kind: FileKind) -> bool {
        match self {
            Self::Entry(e) => e.is_name_compatible(simple_name, kind),
            Self::Output(o) => o.is_name_compatible(simple_name, kind),
            Self::Source(s) => s.is_name_compatible(simple_name, kind),
        }
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Entry(e) => e.read_bytes(),
            Self::Output(o) => Ok(o.open_read()?.into_inner()),
            Self::Source(s) => Ok(s.text().as_bytes().to_vec()),
        }
    }

    pub fn char_content(&self) -> Result<String> {
        match self {
            Self::Entry(e) => e.char_content(),
            Self::Output(o) => o.char_content(),
            Self::Source(s) => Ok(s.text().to_string()),
        }
    }

    /// Nothing the toolchain sees can be deleted.
    pub fn delete(&self) -> bool {
        false
    }
}

impl From<ClasspathEntry> for FileObject {
    fn from(entry: ClasspathEntry) -> Self {
        Self::Entry(entry)
    }
}

impl From<OutputUnit> for FileObject {
    fn from(output: OutputUnit) -> Self {
        Self::Output(output)
    }
}

impl From<SourceUnit> for FileObject {
    fn from(source: SourceUnit) -> Self {
        Self::Source(source)
    }
}

impl fmt::Display for FileObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

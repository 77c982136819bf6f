//! Virtual classpath for the runtime compiler.
//!
//! This module provides:
//! - Read-only entries with provenance URIs
//! - Directory enumeration
//! - Archive enumeration, descending into archives nested in archives
//! - Package filtering over an ordered classpath
//!
//! # Layout
//!
//! ```text
//! RILL_CLASSPATH = dir:lib.zip:missing
//!     │
//!     ├── dir ──────► DirEnumerator ──► file:<dir>/com/foo/Xxx.unit
//!     │
//!     ├── lib.zip ──► ArchiveEnumerator ──► zip:<lib.zip>!com/foo/Yyy.unit
//!     │                     │
//!     │                     └── inner.zip (in memory) ──► zip:<lib.zip>!inner.zip!Zzz.unit
//!     │
//!     └── missing ──► (nothing)
//! ```

mod archive;
mod dir;
mod entry;
mod filter;
mod virtual_classpath;

pub use archive::{ArchiveEnumerator, NESTED_ARCHIVE_SUFFIX};
pub use dir::DirEnumerator;
pub use entry::{BINARY_EXTENSION, ClasspathEntry, FileKind, Origin, SOURCE_EXTENSION};
pub use filter::PackageFilter;
pub use virtual_classpath::{ClasspathIter, VirtualClasspath};

pub(crate) use entry::now_millis;

//! Read-only virtual files produced by classpath traversal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::archive::ArchiveHandle;
use crate::error::{Error, Result};

/// File extension of compiled binary units.
pub const BINARY_EXTENSION: &str = "unit";

/// File extension of snippet-language sources.
pub const SOURCE_EXTENSION: &str = "rs";

/// Kind of a virtual file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Snippet-language source (`.rs`)
    Source,
    /// Compiled binary unit (`.unit`)
    Binary,
    /// Anything else (metadata, manifests, ...)
    Resource,
}

impl FileKind {
    /// Classify a slash-separated file name.
    pub fn of(name: &str) -> Self {
        match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some(BINARY_EXTENSION) => Self::Binary,
            Some(SOURCE_EXTENSION) => Self::Source,
            _ => Self::Resource,
        }
    }

    /// Extension used for this kind, if it has a canonical one.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Binary => Some(BINARY_EXTENSION),
            Self::Source => Some(SOURCE_EXTENSION),
            Self::Resource => None,
        }
    }
}

/// Where an entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A regular file below a classpath directory.
    Directory { root: PathBuf },
    /// An archive entry. `nesting` lists the relative names of archives
    /// opened inside `path`, outermost first.
    Archive { path: PathBuf, nesting: Vec<String> },
}

impl Origin {
    /// Container path (directory root or outermost archive).
    pub fn container(&self) -> &Path {
        match self {
            Self::Directory { root } => root,
            Self::Archive { path, .. } => path,
        }
    }
}

#[derive(Clone)]
enum Content {
    File(PathBuf),
    Archive(Arc<ArchiveHandle>),
}

/// A read-only file visible on a classpath.
///
/// Identity is `(name, origin)`: the same logical entry retrieved by two
/// independent traversals compares equal.
#[derive(Clone)]
pub struct ClasspathEntry {
    name: String,
    kind: FileKind,
    last_modified: u64,
    origin: Origin,
    content: Content,
}

impl ClasspathEntry {
    pub(crate) fn from_file(root: &Path, name: String, path: PathBuf, last_modified: u64) -> Self {
        Self {
            kind: FileKind::of(&name),
            name,
            last_modified,
            origin: Origin::Directory {
                root: root.to_path_buf(),
            },
            content: Content::File(path),
        }
    }

    pub(crate) fn from_archive(handle: Arc<ArchiveHandle>, name: String, last_modified: u64) -> Self {
        Self {
            kind: FileKind::of(&name),
            name,
            last_modified,
            origin: handle.origin(),
            content: Content::Archive(handle),
        }
    }

    /// Slash-separated name relative to the container.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Last modification time in milliseconds since the Unix epoch.
    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// File name without directories or extension.
    pub fn simple_name(&self) -> &str {
        let file = self.name.rsplit('/').next().unwrap_or(&self.name);
        file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
    }

    /// Dotted package of the entry (`""` for the default package).
    pub fn package(&self) -> String {
        self.name
            .rsplit_once('/')
            .map(|(dir, _)| dir.replace('/', "."))
            .unwrap_or_default()
    }

    /// Dotted unit name: the name without extension, slashes turned to dots.
    pub fn binary_name(&self) -> String {
        let stem = match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.ends_with('/') => stem,
            _ => &self.name,
        };
        stem.replace('/', ".")
    }

    /// Whether this entry could hold the unit `simple_name` of the given kind.
    pub fn is_name_compatible(&self, simple_name: &str, kind: FileKind) -> bool {
        self.kind == kind && self.simple_name() == simple_name
    }

    /// URI describing the provenance of the entry.
    ///
    /// Directory entries use `file:<dir><sep><name>`, archive entries
    /// `zip:<archive>!<name>` with one extra `!<inner>` per nesting level.
    pub fn uri(&self) -> String {
        match &self.origin {
            Origin::Directory { root } => {
                format!("file:{}{}{}", root.display(), MAIN_SEPARATOR, self.name)
            }
            Origin::Archive { path, nesting } => {
                let mut uri = format!("zip:{}", path.display());
                for inner in nesting {
                    uri.push('!');
                    uri.push_str(inner);
                }
                uri.push('!');
                uri.push_str(&self.name);
                uri
            }
        }
    }

    /// Read the entry's bytes.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match &self.content {
            Content::File(path) => Ok(std::fs::read(path)?),
            Content::Archive(handle) => handle.read(&self.name),
        }
    }

    /// Read the entry as text. Binary units have no character content.
    pub fn char_content(&self) -> Result<String> {
        if self.kind == FileKind::Binary {
            return Err(Error::Unsupported(format!(
                "{} is a binary unit and has no character content",
                self.name
            )));
        }
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| Error::InvalidState(format!("{} is not valid UTF-8: {e}", self.name)))
    }

    /// Classpath entries are read-only.
    pub fn open_write(&self) -> Result<()> {
        Err(Error::InvalidState(format!(
            "{} is a classpath entry and cannot be written",
            self.uri()
        )))
    }

    /// Classpath entries are never deleted.
    pub fn delete(&self) -> bool {
        false
    }
}

impl PartialEq for ClasspathEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.origin == other.origin
    }
}

impl Eq for ClasspathEntry {}

impl Hash for ClasspathEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.origin.hash(state);
    }
}

impl fmt::Debug for ClasspathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClasspathEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("uri", &self.uri())
            .finish()
    }
}

impl fmt::Display for ClasspathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Milliseconds since the Unix epoch, 0 for times before it.
pub(crate) fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    system_time_millis(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_entry(name: &str) -> ClasspathEntry {
        ClasspathEntry::from_file(
            Path::new("/cp"),
            name.to_string(),
            PathBuf::from("/cp").join(name),
            1,
        )
    }

    #[test]
    fn test_file_kind() {
        assert_eq!(FileKind::of("a/b/Foo.unit"), FileKind::Binary);
        assert_eq!(FileKind::of("Foo.rs"), FileKind::Source);
        assert_eq!(FileKind::of("META-INF/MANIFEST.MF"), FileKind::Resource);
        assert_eq!(FileKind::of("README"), FileKind::Resource);
    }

    #[test]
    fn test_names() {
        let entry = dir_entry("com/foo/Xxx.unit");
        assert_eq!(entry.simple_name(), "Xxx");
        assert_eq!(entry.package(), "com.foo");
        assert_eq!(entry.binary_name(), "com.foo.Xxx");
        assert!(entry.is_name_compatible("Xxx", FileKind::Binary));
        assert!(!entry.is_name_compatible("Xxx", FileKind::Source));
        assert!(!entry.is_name_compatible("Bbb", FileKind::Binary));

        let entry = dir_entry("Foo.unit");
        assert_eq!(entry.package(), "");
        assert_eq!(entry.binary_name(), "Foo");
    }

    #[test]
    fn test_directory_uri() {
        let entry = dir_entry("com/foo/Xxx.unit");
        assert_eq!(
            entry.uri(),
            format!("file:/cp{}com/foo/Xxx.unit", MAIN_SEPARATOR)
        );
    }

    #[test]
    fn test_read_only() {
        let entry = dir_entry("com/foo/Xxx.unit");
        assert!(matches!(entry.open_write(), Err(Error::InvalidState(_))));
        assert!(!entry.delete());
        assert!(matches!(entry.char_content(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_identity_ignores_timestamps() {
        let a = dir_entry("Foo.unit");
        let mut b = dir_entry("Foo.unit");
        b.last_modified = 99;
        assert_eq!(a, b);
        assert_ne!(a, dir_entry("Bar.unit"));
    }
}

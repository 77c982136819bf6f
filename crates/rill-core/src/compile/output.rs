//! In-memory sources and outputs of a single compilation.

use std::fmt;
use std::io::{self, Cursor};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use super::location::Location;
use super::types::{CompiledResource, CompiledUnit};
use crate::classpath::{FileKind, SOURCE_EXTENSION, now_millis};
use crate::error::{Error, Result};

/// Source text handed to the toolchain. Never touches disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    name: String,
    unit_name: String,
    text: Arc<str>,
}

impl SourceUnit {
    /// Create the source of unit `unit_name` (dotted).
    pub fn new(unit_name: &str, text: impl Into<Arc<str>>) -> Self {
        Self {
            name: format!("{}.{SOURCE_EXTENSION}", unit_name.replace('.', "/")),
            unit_name: unit_name.to_string(),
            text: text.into(),
        }
    }

    /// Slash-separated file name, e.g. `a/b/Foo.rs`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted unit name, e.g. `a.b.Foo`.
    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn simple_name(&self) -> &str {
        self.unit_name
            .rsplit_once('.')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.unit_name)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> FileKind {
        FileKind::Source
    }

    pub fn uri(&self) -> String {
        format!("source:/{}", self.name)
    }

    pub fn is_name_compatible(&self, simple_name: &str, kind: FileKind) -> bool {
        kind == FileKind::Source && self.simple_name() == simple_name
    }
}

#[derive(Default)]
struct OutputState {
    bytes: Option<Vec<u8>>,
    last_modified: u64,
}

struct OutputInner {
    location: Location,
    name: String,
    package: String,
    kind: FileKind,
    sibling: Option<SourceUnit>,
    state: Mutex<OutputState>,
}

/// A file written by the toolchain into memory.
///
/// Clones refer to the same live unit.
#[derive(Clone)]
pub struct OutputUnit {
    inner: Arc<OutputInner>,
}

impl OutputUnit {
    pub(crate) fn new(
        location: Location,
        name: String,
        package: String,
        kind: FileKind,
        sibling: Option<SourceUnit>,
    ) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                location,
                name,
                package,
                kind,
                sibling,
                state: Mutex::new(OutputState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, OutputState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn location(&self) -> Location {
        self.inner.location
    }

    /// Slash-separated path below the output root.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Dotted package the output belongs to.
    pub fn package(&self) -> &str {
        &self.inner.package
    }

    pub fn kind(&self) -> FileKind {
        self.inner.kind
    }

    /// The source this output was produced from, when the toolchain said so.
    pub fn sibling(&self) -> Option<&SourceUnit> {
        self.inner.sibling.as_ref()
    }

    pub fn simple_name(&self) -> &str {
        let file = self.inner.name.rsplit('/').next().unwrap_or(&self.inner.name);
        file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
    }

    /// Dotted unit name for binary outputs.
    pub fn binary_name(&self) -> Option<String> {
        if self.inner.kind != FileKind::Binary {
            return None;
        }
        let stem = self
            .inner
            .name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.inner.name);
        Some(stem.replace('/', "."))
    }

    pub fn is_name_compatible(&self, simple_name: &str, kind: FileKind) -> bool {
        self.inner.kind == kind && self.simple_name() == simple_name
    }

    /// `file:/<path>`, for example `file:/a/b/Foo.unit` or `file:/META-INF/x.json`.
    pub fn uri(&self) -> String {
        format!("file:/{}", self.inner.name)
    }

    /// 0 until the first write session commits.
    pub fn last_modified(&self) -> u64 {
        self.state().last_modified
    }

    pub fn is_written(&self) -> bool {
        self.state().bytes.is_some()
    }

    /// Committed bytes, if any session has committed yet.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.state().bytes.clone()
    }

    /// Read the committed bytes.
    pub fn open_read(&self) -> io::Result<Cursor<Vec<u8>>> {
        self.bytes().map(Cursor::new).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has not been written yet", self.uri()),
            )
        })
    }

    /// Start a write session. The buffer replaces the content when the
    /// session commits.
    pub fn open_write(&self) -> OutputWriter {
        OutputWriter {
            unit: self.clone(),
            buffer: Vec::new(),
            committed: false,
        }
    }

    /// Committed content as text. Binary units have none.
    pub fn char_content(&self) -> Result<String> {
        if self.inner.kind == FileKind::Binary {
            return Err(Error::Unsupported(format!(
                "{} is a binary unit and has no character content",
                self.uri()
            )));
        }
        let bytes = self.open_read()?.into_inner();
        String::from_utf8(bytes)
            .map_err(|e| Error::InvalidState(format!("{} is not valid UTF-8: {e}", self.uri())))
    }

    /// Outputs live until the compilation ends.
    pub fn delete(&self) -> bool {
        false
    }

    fn commit(&self, bytes: Vec<u8>) {
        let mut state = self.state();
        state.bytes = Some(bytes);
        state.last_modified = now_millis();
    }
}

impl PartialEq for OutputUnit {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.location == other.inner.location
                && self.inner.name == other.inner.name
                && self.inner.kind == other.inner.kind)
    }
}

impl Eq for OutputUnit {}

impl fmt::Debug for OutputUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputUnit")
            .field("location", &self.inner.location)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("written", &self.is_written())
            .finish()
    }
}

/// One write session on an [`OutputUnit`].
///
/// Commits on [`commit`](Self::commit) or when dropped.
pub struct OutputWriter {
    unit: OutputUnit,
    buffer: Vec<u8>,
    committed: bool,
}

impl OutputWriter {
    pub fn commit(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.committed {
            self.committed = true;
            self.unit.commit(std::mem::take(&mut self.buffer));
        }
    }
}

impl io::Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for OutputWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buffer.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Every output requested during one compilation, in request order.
#[derive(Default)]
pub struct OutputCollector {
    index: FxHashMap<(Location, String, FileKind), usize>,
    outputs: Vec<OutputUnit>,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the output for `(location, name, kind)`, creating it on first request.
    pub fn get_or_create(
        &mut self,
        location: Location,
        name: String,
        package: String,
        kind: FileKind,
        sibling: Option<&SourceUnit>,
    ) -> OutputUnit {
        let key = (location, name, kind);
        if let Some(&i) = self.index.get(&key) {
            return self.outputs[i].clone();
        }
        let unit = OutputUnit::new(location, key.1.clone(), package, kind, sibling.cloned());
        tracing::debug!("Created output {}", unit.uri());
        self.index.insert(key, self.outputs.len());
        self.outputs.push(unit.clone());
        unit
    }

    pub fn outputs(&self) -> &[OutputUnit] {
        &self.outputs
    }

    /// Binary units with committed bytes, in creation order.
    pub fn compiled_units(&self) -> Vec<CompiledUnit> {
        self.outputs
            .iter()
            .filter(|o| o.kind() == FileKind::Binary)
            .filter_map(|o| {
                Some(CompiledUnit {
                    name: o.binary_name()?,
                    bytes: o.bytes()?,
                })
            })
            .collect()
    }

    /// Committed non-binary outputs, in creation order.
    pub fn resources(&self) -> Vec<CompiledResource> {
        self.outputs
            .iter()
            .filter(|o| o.kind() != FileKind::Binary)
            .filter_map(|o| {
                Some(CompiledResource {
                    name: o.name().to_string(),
                    bytes: o.bytes()?,
                })
            })
            .collect()
    }
}

impl fmt::Debug for OutputCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.outputs).finish()
    }
}

//! Enumeration of archives, including archives nested inside archives.
//!
//! Nested archives are opened from an in-memory copy of their bytes; nothing
//! is extracted to disk. Every open archive is tracked by a [`HandleRegistry`]
//! so the owning classpath can release all of them deterministically.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::NaiveDate;
use zip::ZipArchive;

use super::entry::{ClasspathEntry, Origin};
use super::filter::{PackageFilter, accepts};
use crate::error::{Error, Result};

/// Suffix marking an archive entry that is itself an archive.
pub const NESTED_ARCHIVE_SUFFIX: &str = ".zip";

enum OpenArchive {
    File(ZipArchive<File>),
    Memory(ZipArchive<Cursor<Vec<u8>>>),
}

/// Name, directory flag and timestamp of one archive slot.
struct SlotInfo {
    name: String,
    is_dir: bool,
    last_modified: u64,
}

fn slot_info<R: Read + Seek>(zip: &mut ZipArchive<R>, index: usize) -> Result<SlotInfo> {
    let file = zip.by_index(index)?;
    Ok(SlotInfo {
        name: file.name().to_string(),
        is_dir: file.is_dir(),
        last_modified: zip_time_millis(file.last_modified()),
    })
}

fn read_named<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = zip.by_name(name)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

impl OpenArchive {
    fn len(&self) -> usize {
        match self {
            Self::File(zip) => zip.len(),
            Self::Memory(zip) => zip.len(),
        }
    }

    fn slot(&mut self, index: usize) -> Result<SlotInfo> {
        match self {
            Self::File(zip) => slot_info(zip, index),
            Self::Memory(zip) => slot_info(zip, index),
        }
    }

    fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        match self {
            Self::File(zip) => read_named(zip, name),
            Self::Memory(zip) => read_named(zip, name),
        }
    }
}

/// A shared, closable handle on one open archive.
pub(crate) struct ArchiveHandle {
    path: PathBuf,
    nesting: Vec<String>,
    archive: Mutex<Option<OpenArchive>>,
}

impl ArchiveHandle {
    /// Open an archive file on disk.
    pub(crate) fn open(path: &Path) -> Result<Arc<Self>> {
        let path = std::path::absolute(path)?;
        let zip = ZipArchive::new(File::open(&path)?)?;
        Ok(Arc::new(Self {
            path,
            nesting: Vec::new(),
            archive: Mutex::new(Some(OpenArchive::File(zip))),
        }))
    }

    /// Open the archive stored as entry `inner` of `self`, in memory.
    pub(crate) fn open_nested(&self, inner: &str) -> Result<Arc<Self>> {
        let bytes = self.read(inner)?;
        let zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut nesting = self.nesting.clone();
        nesting.push(inner.to_string());
        Ok(Arc::new(Self {
            path: self.path.clone(),
            nesting,
            archive: Mutex::new(Some(OpenArchive::Memory(zip))),
        }))
    }

    pub(crate) fn origin(&self) -> Origin {
        Origin::Archive {
            path: self.path.clone(),
            nesting: self.nesting.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenArchive>> {
        self.archive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> Error {
        Error::InvalidState(format!("archive {} has been closed", self.describe()))
    }

    fn describe(&self) -> String {
        let mut out = self.path.display().to_string();
        for inner in &self.nesting {
            out.push('!');
            out.push_str(inner);
        }
        out
    }

    fn len(&self) -> usize {
        self.lock().as_ref().map(OpenArchive::len).unwrap_or(0)
    }

    fn slot(&self, index: usize) -> Result<SlotInfo> {
        match self.lock().as_mut() {
            Some(archive) => archive.slot(index),
            None => Err(self.closed()),
        }
    }

    /// Read one entry's bytes.
    pub(crate) fn read(&self, name: &str) -> Result<Vec<u8>> {
        match self.lock().as_mut() {
            Some(archive) => archive.read(name),
            None => Err(self.closed()),
        }
    }

    /// Release the underlying reader. Later reads fail with `InvalidState`.
    pub(crate) fn close(&self) {
        if self.lock().take().is_some() {
            tracing::debug!("Closed archive {}", self.describe());
        }
    }
}

impl fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArchiveHandle").field(&self.describe()).finish()
    }
}

/// Tracks archive handles opened on behalf of one classpath.
#[derive(Default)]
pub(crate) struct HandleRegistry {
    handles: Mutex<Vec<Weak<ArchiveHandle>>>,
}

impl HandleRegistry {
    pub(crate) fn register(&self, handle: &Arc<ArchiveHandle>) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| h.strong_count() > 0);
        handles.push(Arc::downgrade(handle));
    }

    /// Close every handle still alive.
    pub(crate) fn close_all(&self) {
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles.iter().filter_map(Weak::upgrade) {
            handle.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn open_count(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|h| h.lock().is_some())
            .count()
    }
}

impl Drop for HandleRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry").finish_non_exhaustive()
    }
}

struct Frame {
    handle: Arc<ArchiveHandle>,
    index: usize,
    len: usize,
}

impl Frame {
    fn new(handle: Arc<ArchiveHandle>) -> Self {
        let len = handle.len();
        Self {
            handle,
            index: 0,
            len,
        }
    }
}

/// Yields every file in an archive, descending into nested archives in place.
pub struct ArchiveEnumerator {
    frames: Vec<Frame>,
    filter: Option<PackageFilter>,
    registry: Option<Arc<HandleRegistry>>,
}

impl ArchiveEnumerator {
    /// Open `path` and enumerate its entries.
    pub fn open(path: impl AsRef<Path>, filter: Option<PackageFilter>) -> Result<Self> {
        Self::open_registered(path.as_ref(), filter, None)
    }

    pub(crate) fn open_registered(
        path: &Path,
        filter: Option<PackageFilter>,
        registry: Option<Arc<HandleRegistry>>,
    ) -> Result<Self> {
        let handle = ArchiveHandle::open(path)?;
        if let Some(registry) = &registry {
            registry.register(&handle);
        }
        tracing::debug!("Opened archive {}", path.display());
        Ok(Self {
            frames: vec![Frame::new(handle)],
            filter,
            registry,
        })
    }

    fn advance(&mut self) -> Result<Option<ClasspathEntry>> {
        while let Some(frame) = self.frames.last_mut() {
            if frame.index >= frame.len {
                self.frames.pop();
                continue;
            }
            let index = frame.index;
            frame.index += 1;
            let handle = Arc::clone(&frame.handle);

            let slot = handle.slot(index)?;
            if slot.is_dir {
                continue;
            }
            if slot.name.ends_with(NESTED_ARCHIVE_SUFFIX) {
                let nested = handle.open_nested(&slot.name)?;
                if let Some(registry) = &self.registry {
                    registry.register(&nested);
                }
                self.frames.push(Frame::new(nested));
                continue;
            }
            if accepts(self.filter.as_ref(), &slot.name) {
                return Ok(Some(ClasspathEntry::from_archive(
                    handle,
                    slot.name,
                    slot.last_modified,
                )));
            }
        }
        Ok(None)
    }
}

impl Iterator for ArchiveEnumerator {
    type Item = Result<ClasspathEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                // a broken archive ends this traversal
                self.frames.clear();
                Some(Err(e))
            }
        }
    }
}

/// Convert an archive timestamp (local civil time, no zone) to epoch milliseconds.
/// Dates before the epoch, or fields zip cannot represent, yield 0.
fn zip_time_millis(dt: zip::DateTime) -> u64 {
    NaiveDate::from_ymd_opt(dt.year().into(), dt.month().into(), dt.day().into())
        .and_then(|date| date.and_hms_opt(dt.hour().into(), dt.minute().into(), dt.second().into()))
        .map(|time| time.and_utc().timestamp_millis())
        .and_then(|millis| u64::try_from(millis).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_zip_time_millis() {
        let dt = zip::DateTime::from_date_and_time(2000, 3, 1, 12, 30, 15).unwrap();
        assert_eq!(zip_time_millis(dt), 951_913_815_000);
        // earliest timestamp an archive can carry
        assert_eq!(zip_time_millis(zip::DateTime::default()), 315_532_800_000);
    }

    #[test]
    fn test_flat_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simple.zip");
        std::fs::write(
            &path,
            zip_bytes(&[
                ("com/foo/Xxx.unit", &b"fake\n"[..]),
                ("com/bar/Yyy.unit", &b"other\n"[..]),
            ]),
        )
        .unwrap();

        let entries: Vec<_> = ArchiveEnumerator::open(&path, None)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name(), "com/foo/Xxx.unit");
        assert_eq!(entries[0].read_bytes().unwrap(), b"fake\n");
        assert!(entries[0].last_modified() > 0);

        let absolute = std::path::absolute(&path).unwrap();
        assert_eq!(
            entries[0].uri(),
            format!("zip:{}!com/foo/Xxx.unit", absolute.display())
        );
    }

    #[test]
    fn test_oversized_header_does_not_preallocate() {
        let mut bytes = zip_bytes(&[("Big.unit", &b"small\n"[..])]);
        // central directory claims ~4 GiB uncompressed
        let central = bytes
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&u32::MAX.to_le_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lying.zip");
        std::fs::write(&path, bytes).unwrap();

        let entries: Vec<_> = ArchiveEnumerator::open(&path, None)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(entries[0].read_bytes().unwrap(), b"small\n");
    }

    #[test]
    fn test_doubly_nested_archive() {
        let innermost = zip_bytes(&[("Deep.unit", &b"deep\n"[..])]);
        let inner = zip_bytes(&[
            ("lib/deeper.zip", innermost.as_slice()),
            ("Mid.unit", &b"mid\n"[..]),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outer.zip");
        std::fs::write(&path, zip_bytes(&[("lib/inner.zip", inner.as_slice())])).unwrap();

        let entries: Vec<_> = ArchiveEnumerator::open(&path, None)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        let absolute = std::path::absolute(&path).unwrap().display().to_string();
        let uris: Vec<_> = entries.iter().map(ClasspathEntry::uri).collect();
        assert_eq!(
            uris,
            vec![
                format!("zip:{absolute}!lib/inner.zip!lib/deeper.zip!Deep.unit"),
                format!("zip:{absolute}!lib/inner.zip!Mid.unit"),
            ]
        );
        assert_eq!(entries[0].read_bytes().unwrap(), b"deep\n");
        assert_eq!(entries[1].read_bytes().unwrap(), b"mid\n");
    }

    #[test]
    fn test_closed_handle_rejects_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simple.zip");
        std::fs::write(&path, zip_bytes(&[("A.unit", &b"a"[..])])).unwrap();

        let registry = Arc::new(HandleRegistry::default());
        let entry = ArchiveEnumerator::open_registered(&path, None, Some(Arc::clone(&registry)))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(registry.open_count(), 1);
        registry.close_all();
        assert_eq!(registry.open_count(), 0);
        assert!(matches!(entry.read_bytes(), Err(Error::InvalidState(_))));
    }
}

//! Integration tests for classpath traversal over directories and nested archives.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use rill_core::classpath::{ArchiveEnumerator, DirEnumerator, PackageFilter, VirtualClasspath};
use rill_core::{Error, FileKind};
use zip::write::{FileOptions, ZipWriter};

// =============================================================================
// Test Helpers
// =============================================================================

fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// `outer.zip` holding `a/A.txt` and `inner.zip`, which holds `b/B.txt`
/// and `deep.zip` holding `c/C.txt`.
fn nested_archive(dir: &Path) -> std::path::PathBuf {
    let deep = zip_bytes(&[("c/C.txt", b"deepest".as_slice())]);
    let inner = zip_bytes(&[("b/B.txt", b"inner".as_slice()), ("deep.zip", deep.as_slice())]);
    let outer = zip_bytes(&[("a/A.txt", b"outer".as_slice()), ("inner.zip", inner.as_slice())]);
    let path = dir.join("outer.zip");
    fs::write(&path, outer).unwrap();
    path
}

fn names(cp: &VirtualClasspath) -> Vec<String> {
    cp.iter()
        .map(|entry| entry.unwrap().name().to_string())
        .collect()
}

// =============================================================================
// Directory traversal
// =============================================================================

#[test]
fn test_directory_walk_is_sorted_and_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("org/example")).unwrap();
    fs::write(dir.path().join("org/example/B.rs"), "fn b() {}").unwrap();
    fs::write(dir.path().join("org/example/A.unit"), b"RILU").unwrap();
    fs::write(dir.path().join("top.txt"), "top").unwrap();

    let first: Vec<_> = DirEnumerator::new(dir.path()).map(Result::unwrap).collect();
    let second: Vec<_> = DirEnumerator::new(dir.path()).map(Result::unwrap).collect();
    assert_eq!(first, second);

    let names: Vec<_> = first.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["org/example/A.unit", "org/example/B.rs", "top.txt"]);
    assert_eq!(first[0].kind(), FileKind::Binary);
    assert_eq!(first[1].kind(), FileKind::Source);
    assert_eq!(first[2].kind(), FileKind::Resource);
    assert_eq!(first[0].binary_name(), "org.example.A");
}

#[test]
fn test_missing_directory_is_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let mut walk = DirEnumerator::new(dir.path().join("absent"));
    assert!(!walk.has_next());
    assert!(matches!(walk.next_entry(), Err(Error::ExhaustedIteration)));
}

#[test]
fn test_relative_name_outside_root() {
    let dir = tempfile::tempdir().unwrap();
    let walk = DirEnumerator::new(dir.path());
    assert_eq!(
        walk.relative_name(&dir.path().join("x/Y.rs")).unwrap(),
        "x/Y.rs"
    );
    assert!(matches!(
        walk.relative_name(Path::new("/elsewhere/Y.rs")),
        Err(Error::InvalidState(_))
    ));
}

// =============================================================================
// Nested archives
// =============================================================================

#[test]
fn test_nested_archives_are_flattened() {
    let dir = tempfile::tempdir().unwrap();
    let outer = nested_archive(dir.path());

    let entries: Vec<_> = ArchiveEnumerator::open(&outer, None)
        .unwrap()
        .map(Result::unwrap)
        .collect();
    let names: Vec<_> = entries.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["a/A.txt", "b/B.txt", "c/C.txt"]);

    let deepest = &entries[2];
    assert!(deepest.uri().starts_with("zip:"));
    assert!(deepest.uri().ends_with("outer.zip!inner.zip!deep.zip!c/C.txt"));
    assert_eq!(deepest.char_content().unwrap(), "deepest");
    assert_eq!(entries[1].read_bytes().unwrap(), b"inner");
}

#[test]
fn test_archive_traversals_compare_equal() {
    let dir = tempfile::tempdir().unwrap();
    let outer = nested_archive(dir.path());
    let cp = VirtualClasspath::new(&outer);
    let first: Vec<_> = cp.iter().map(Result::unwrap).collect();
    let second: Vec<_> = cp.iter().map(Result::unwrap).collect();
    assert_eq!(first, second);
}

#[test]
fn test_closed_classpath_refuses_reads() {
    let dir = tempfile::tempdir().unwrap();
    let outer = nested_archive(dir.path());
    let cp = VirtualClasspath::new(&outer);
    let entry = cp.find("a/A.txt").unwrap().unwrap();
    assert_eq!(entry.read_bytes().unwrap(), b"outer");

    cp.close();
    assert!(matches!(entry.read_bytes(), Err(Error::InvalidState(_))));
}

// =============================================================================
// Classpath composition and filtering
// =============================================================================

#[test]
fn test_classpath_segments_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let classes = dir.path().join("classes");
    fs::create_dir_all(classes.join("b")).unwrap();
    fs::write(classes.join("b/Local.rs"), "").unwrap();
    let outer = nested_archive(dir.path());

    let missing = dir.path().join("missing");
    let joined =
        std::env::join_paths([classes.as_path(), missing.as_path(), outer.as_path()]).unwrap();
    let cp = VirtualClasspath::new(&joined);
    assert_eq!(
        names(&cp),
        vec!["b/Local.rs", "a/A.txt", "b/B.txt", "c/C.txt"]
    );

    let only_b = VirtualClasspath::filtered(&joined, "b", false).unwrap();
    assert_eq!(names(&only_b), vec!["b/Local.rs", "b/B.txt"]);
}

#[test]
fn test_package_filter_recursion_and_default_package() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("org/example/sub")).unwrap();
    fs::write(dir.path().join("Root.rs"), "").unwrap();
    fs::write(dir.path().join("org/example/A.rs"), "").unwrap();
    fs::write(dir.path().join("org/example/sub/B.rs"), "").unwrap();

    let flat = VirtualClasspath::filtered(dir.path(), "org.example", false).unwrap();
    assert_eq!(names(&flat), vec!["org/example/A.rs"]);

    let deep = flat.with_filter(Some("org.example"), true).unwrap();
    assert_eq!(names(&deep), vec!["org/example/A.rs", "org/example/sub/B.rs"]);

    let default = flat.with_filter(Some(""), false).unwrap();
    assert_eq!(names(&default), vec!["Root.rs"]);
}

#[test]
fn test_slash_package_rejected_before_io() {
    assert!(matches!(
        PackageFilter::new("org/example", false),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        VirtualClasspath::filtered("/does/not/exist", "org/example", true),
        Err(Error::InvalidArgument(_))
    ));
}

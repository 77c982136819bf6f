//! Integration tests for the file manager over archive classpaths and in-memory outputs.

use std::fs;
use std::io::{Cursor, Write};

use rill_core::compile::{CompilerConfig, FileManager, FileObject, Location, SourceUnit};
use rill_core::{Error, FileKind};
use zip::write::{FileOptions, ZipWriter};

fn archive_with(dir: &std::path::Path, files: &[(&str, &[u8])]) -> std::path::PathBuf {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    let path = dir.join("lib.zip");
    fs::write(&path, writer.finish().unwrap().into_inner()).unwrap();
    path
}

#[test]
fn test_lists_units_inside_archives() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_with(
        dir.path(),
        &[
            ("org/util/Strings.unit", b"RILU".as_slice()),
            ("org/util/README.txt", b"readme".as_slice()),
            ("org/Other.unit", b"RILU".as_slice()),
        ],
    );
    let fm = FileManager::new(&CompilerConfig::default().with_classpath(&archive));

    let units = fm
        .list(Location::ClassPath, "org.util", &[FileKind::Binary], false)
        .unwrap();
    assert_eq!(units.len(), 1);
    assert!(units[0].uri().ends_with("lib.zip!org/util/Strings.unit"));
    assert_eq!(
        fm.infer_binary_name(Location::ClassPath, &units[0]).as_deref(),
        Some("org.util.Strings")
    );
    assert!(units[0].is_name_compatible("Strings", FileKind::Binary));

    let readme = fm
        .get_file_for_input(Location::ClassPath, "org.util", "README.txt")
        .unwrap()
        .unwrap();
    assert_eq!(readme.char_content().unwrap(), "readme");

    let recursive = fm.list(Location::ClassPath, "org", &[], true).unwrap();
    assert_eq!(recursive.len(), 3);
}

#[test]
fn test_platform_classpath_is_separate() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("core")).unwrap();
    fs::write(dir.path().join("core/Base.unit"), b"RILU").unwrap();
    let config = CompilerConfig {
        platform_classpath: dir.path().as_os_str().to_owned(),
        ..CompilerConfig::default()
    };
    let fm = FileManager::new(&config);

    assert!(
        fm.get_unit_for_input(Location::ClassPath, "core.Base", FileKind::Binary)
            .unwrap()
            .is_none()
    );
    assert!(
        fm.get_unit_for_input(Location::PlatformClassPath, "core.Base", FileKind::Binary)
            .unwrap()
            .is_some()
    );
}

#[test]
fn test_rewritten_output_keeps_last_commit() {
    let mut fm = FileManager::new(&CompilerConfig::default());
    let source = SourceUnit::new("pkg.Gen", "fn f() {}");
    let unit = fm
        .get_unit_for_output(Location::ClassOutput, "pkg.Gen", FileKind::Binary, Some(&source))
        .unwrap();
    assert!(!unit.is_written());
    assert!(fm.compiled_units().is_empty());

    let mut first = unit.open_write();
    first.write_all(b"first").unwrap();
    first.commit();
    let mut second = unit.open_write();
    second.write_all(b"second").unwrap();
    drop(second);

    let units = fm.compiled_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].bytes, b"second");
    assert_eq!(unit.sibling().map(SourceUnit::unit_name), Some("pkg.Gen"));
    assert!(unit.last_modified() > 0);
    assert!(matches!(unit.char_content(), Err(Error::Unsupported(_))));
}

#[test]
fn test_resources_are_collected_separately() {
    let mut fm = FileManager::new(&CompilerConfig::default());
    let meta = fm
        .get_file_for_output(Location::ClassOutput, "", "META-INF/rill/pkg.Gen.json", None)
        .unwrap();
    write!(meta.open_write(), "{{}}").unwrap();

    let output = FileObject::Output(meta.clone());
    assert_eq!(output.kind(), FileKind::Resource);
    assert_eq!(output.char_content().unwrap(), "{}");
    assert!(!output.delete());

    let resources = fm.resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].name, "META-INF/rill/pkg.Gen.json");
    assert!(fm.compiled_units().is_empty());
}

#[test]
fn test_outputs_survive_close() {
    let mut fm = FileManager::new(&CompilerConfig::default());
    let unit = fm
        .get_unit_for_output(Location::ClassOutput, "Top", FileKind::Binary, None)
        .unwrap();
    unit.open_write().write_all(b"bytes").unwrap();
    fm.close();
    fm.close();
    assert_eq!(fm.compiled_units()[0].name, "Top");
    assert_eq!(fm.compiled_units()[0].bytes, b"bytes");
}

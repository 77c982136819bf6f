//! The file manager a toolchain performs all of its I/O through.
//!
//! Reads resolve against the host's classpaths, writes land in an
//! [`OutputCollector`]. Nothing is written to disk.

use super::file_object::FileObject;
use super::location::Location;
use super::output::{OutputCollector, OutputUnit, SourceUnit};
use super::types::{CompiledResource, CompiledUnit, CompilerConfig};
use crate::classpath::{FileKind, VirtualClasspath};
use crate::error::{Error, Result};

/// Mediates every read and write of one compilation.
pub struct FileManager {
    classpath: VirtualClasspath,
    platform_classpath: VirtualClasspath,
    collector: OutputCollector,
    closed: bool,
}

impl FileManager {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            classpath: VirtualClasspath::new(&config.classpath),
            platform_classpath: VirtualClasspath::new(&config.platform_classpath),
            collector: OutputCollector::new(),
            closed: false,
        }
    }

    pub fn has_location(&self, location: Location) -> bool {
        !matches!(location, Location::AnnotationProcessorPath)
    }

    fn classpath_for(&self, location: Location) -> Option<&VirtualClasspath> {
        match location {
            Location::ClassPath => Some(&self.classpath),
            Location::PlatformClassPath => Some(&self.platform_classpath),
            _ => None,
        }
    }

    /// List the files of `package` at `location` whose kind is in `kinds`.
    ///
    /// An empty `kinds` slice accepts every kind. Only the classpath
    /// locations have content.
    pub fn list(
        &self,
        location: Location,
        package: &str,
        kinds: &[FileKind],
        recurse: bool,
    ) -> Result<Vec<FileObject>> {
        let Some(classpath) = self.classpath_for(location) else {
            return Ok(Vec::new());
        };
        let view = classpath.with_filter(Some(package), recurse)?;
        let mut files = Vec::new();
        for entry in &view {
            let entry = entry?;
            if kinds.is_empty() || kinds.contains(&entry.kind()) {
                files.push(FileObject::Entry(entry));
            }
        }
        tracing::debug!(
            "Listed {} file(s) in package '{}' at {} (recurse: {})",
            files.len(),
            package,
            location,
            recurse
        );
        Ok(files)
    }

    /// Dotted unit name of `file` as seen from `location`.
    pub fn infer_binary_name(&self, location: Location, file: &FileObject) -> Option<String> {
        match (location, file) {
            (Location::ClassPath | Location::PlatformClassPath, FileObject::Entry(entry)) => {
                Some(entry.binary_name())
            }
            (Location::ClassOutput, FileObject::Output(output)) => output.binary_name(),
            _ => None,
        }
    }

    pub fn is_same_file(&self, a: &FileObject, b: &FileObject) -> bool {
        a == b
    }

    fn check_input(&self, location: Location) -> Result<&VirtualClasspath> {
        self.classpath_for(location).ok_or_else(|| {
            Error::Unsupported(format!("reading from {location} is not supported"))
        })
    }

    /// Find the unit `unit_name` of `kind` at a classpath location.
    pub fn get_unit_for_input(
        &self,
        location: Location,
        unit_name: &str,
        kind: FileKind,
    ) -> Result<Option<FileObject>> {
        let classpath = self.check_input(location)?;
        let Some(ext) = kind.extension() else {
            return Err(Error::InvalidArgument(format!(
                "{kind:?} files are not addressed by unit name"
            )));
        };
        let name = format!("{}.{ext}", unit_name.replace('.', "/"));
        Ok(classpath.find(&name)?.map(FileObject::Entry))
    }

    /// Find `relative_name` in `package` at a classpath location.
    pub fn get_file_for_input(
        &self,
        location: Location,
        package: &str,
        relative_name: &str,
    ) -> Result<Option<FileObject>> {
        let classpath = self.check_input(location)?;
        let name = package_path(package, relative_name);
        Ok(classpath.find(&name)?.map(FileObject::Entry))
    }

    fn check_output(&self, location: Location) -> Result<()> {
        if location.is_output() {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "writing to {location} is not supported"
            )))
        }
    }

    /// The output holding unit `unit_name`. Repeated requests return the same unit.
    pub fn get_unit_for_output(
        &mut self,
        location: Location,
        unit_name: &str,
        kind: FileKind,
        sibling: Option<&SourceUnit>,
    ) -> Result<OutputUnit> {
        self.check_output(location)?;
        let path = unit_name.replace('.', "/");
        let name = match kind.extension() {
            Some(ext) => format!("{path}.{ext}"),
            None => path,
        };
        let package = unit_name
            .rsplit_once('.')
            .map(|(package, _)| package.to_string())
            .unwrap_or_default();
        Ok(self
            .collector
            .get_or_create(location, name, package, kind, sibling))
    }

    /// The output at `relative_name` in `package`. Repeated requests return the same unit.
    pub fn get_file_for_output(
        &mut self,
        location: Location,
        package: &str,
        relative_name: &str,
        sibling: Option<&SourceUnit>,
    ) -> Result<OutputUnit> {
        self.check_output(location)?;
        let name = package_path(package, relative_name);
        let kind = FileKind::of(relative_name);
        Ok(self
            .collector
            .get_or_create(location, name, package.to_string(), kind, sibling))
    }

    /// Number of arguments `option` takes, or `None` when unrecognised.
    pub fn is_supported_option(&self, _option: &str) -> Option<usize> {
        None
    }

    /// Consume `option`. Returns whether it was recognised.
    pub fn handle_option(&mut self, _option: &str, _args: &[String]) -> bool {
        false
    }

    pub fn compiled_units(&self) -> Vec<CompiledUnit> {
        self.collector.compiled_units()
    }

    pub fn resources(&self) -> Vec<CompiledResource> {
        self.collector.resources()
    }

    /// Release the classpaths' archive handles. Outputs stay readable.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.classpath.close();
            self.platform_classpath.close();
            tracing::debug!("Closed file manager");
        }
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn package_path(package: &str, relative_name: &str) -> String {
    if package.is_empty() {
        relative_name.to_string()
    } else {
        format!("{}/{relative_name}", package.replace('.', "/"))
    }
}

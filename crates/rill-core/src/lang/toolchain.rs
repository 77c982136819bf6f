//! The built-in toolchain: snippet source in, binary units out.

use std::io::Write;

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::ir::{UNIT_FORMAT_VERSION, UnitImage};
use super::lower::{self, Lowered, UnitResolver};
use crate::classpath::FileKind;
use crate::compile::{
    CompileTask, Diagnostic, DiagnosticSink, FileManager, LineIndex, Location, Severity,
    SourceUnit, Toolchain,
};
use crate::error::Result;

/// Directory of the per-unit metadata side-files.
pub const METADATA_DIR: &str = "META-INF/rill";

/// Compiles snippet source with `syn`, lowering it to [`UnitImage`]s.
#[derive(Debug, Clone, Default)]
pub struct SnippetToolchain;

impl SnippetToolchain {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Default)]
struct Options {
    warnings_as_errors: bool,
    metadata: bool,
}

impl Options {
    fn parse(fm: &mut FileManager, options: &[String], sink: &mut DiagnosticSink) -> Self {
        let mut parsed = Options {
            warnings_as_errors: false,
            metadata: true,
        };
        for option in options {
            if fm.handle_option(option, &[]) {
                continue;
            }
            match option.as_str() {
                "-Werror" => parsed.warnings_as_errors = true,
                "--no-metadata" => parsed.metadata = false,
                other => sink.report(Diagnostic::warning(format!(
                    "unrecognised option `{other}` ignored"
                ))),
            }
        }
        parsed
    }
}

/// Resolves `use` items against the classpaths of the file manager.
struct ClasspathResolver<'a> {
    file_manager: &'a FileManager,
    cache: FxHashMap<String, Option<UnitImage>>,
}

impl ClasspathResolver<'_> {
    fn lookup(&self, unit_name: &str) -> Result<Option<UnitImage>> {
        let package = unit_name
            .rsplit_once('.')
            .map(|(package, _)| package)
            .unwrap_or("");
        for location in [Location::PlatformClassPath, Location::ClassPath] {
            let files = self
                .file_manager
                .list(location, package, &[FileKind::Binary], false)?;
            for file in files {
                if self
                    .file_manager
                    .infer_binary_name(location, &file)
                    .is_some_and(|name| name == unit_name)
                {
                    let image = UnitImage::decode(unit_name, &file.read_bytes()?)?;
                    return Ok(Some(image));
                }
            }
        }
        Ok(None)
    }
}

impl UnitResolver for ClasspathResolver<'_> {
    fn resolve(&mut self, unit_name: &str) -> Result<Option<UnitImage>> {
        if let Some(cached) = self.cache.get(unit_name) {
            return Ok(cached.clone());
        }
        let image = self.lookup(unit_name).inspect_err(|e| {
            tracing::debug!("Failed to resolve {}: {}", unit_name, e);
        })?;
        self.cache.insert(unit_name.to_string(), image.clone());
        Ok(image)
    }
}

#[derive(Serialize)]
struct FunctionMetadata<'a> {
    name: &'a str,
    params: Vec<String>,
    ret: String,
}

/// Contents of `META-INF/rill/<unit>.json`.
#[derive(Serialize)]
struct UnitMetadata<'a> {
    unit: &'a str,
    source: &'a str,
    format_version: u16,
    factory: bool,
    functions: Vec<FunctionMetadata<'a>>,
    references: &'a [String],
}

impl<'a> UnitMetadata<'a> {
    fn of(image: &'a UnitImage) -> Self {
        Self {
            unit: &image.name,
            source: &image.source_name,
            format_version: UNIT_FORMAT_VERSION,
            factory: image.factory.is_some(),
            functions: image
                .functions
                .iter()
                .map(|f| FunctionMetadata {
                    name: &f.name,
                    params: f.sig.params.iter().map(ToString::to_string).collect(),
                    ret: f.sig.ret.to_string(),
                })
                .collect(),
            references: &image.references,
        }
    }
}

fn report_parse_error(sink: &mut DiagnosticSink, source: &SourceUnit, error: syn::Error) {
    let index = LineIndex::new(source.text());
    for e in error {
        let span = e.span();
        let (start, end) = (span.start(), span.end());
        let from = index.offset(source.text(), start.line, start.column);
        let to = index.offset(source.text(), end.line, end.column).max(from);
        sink.report(Diagnostic::error(e.to_string()).at(source.name(), from..to));
    }
}

fn write_outputs(
    fm: &mut FileManager,
    source: &SourceUnit,
    units: &[UnitImage],
    metadata: bool,
) -> Result<()> {
    for image in units {
        let output =
            fm.get_unit_for_output(Location::ClassOutput, &image.name, FileKind::Binary, Some(source))?;
        let mut writer = output.open_write();
        writer.write_all(&image.encode()?)?;
        writer.commit();

        if metadata {
            let json = serde_json::to_vec_pretty(&UnitMetadata::of(image))
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            let relative = format!("{METADATA_DIR}/{}.json", image.name);
            let output = fm.get_file_for_output(Location::ClassOutput, "", &relative, Some(source))?;
            let mut writer = output.open_write();
            writer.write_all(&json)?;
            writer.commit();
        }
    }
    Ok(())
}

impl SnippetToolchain {
    fn compile_source(
        &self,
        fm: &mut FileManager,
        sink: &mut DiagnosticSink,
        source: &SourceUnit,
        options: &Options,
    ) -> bool {
        let file = match syn::parse_file(source.text()) {
            Ok(file) => file,
            Err(e) => {
                report_parse_error(sink, source, e);
                return false;
            }
        };

        let Lowered { units, diagnostics } = {
            let mut resolver = ClasspathResolver {
                file_manager: fm,
                cache: FxHashMap::default(),
            };
            lower::lower_file(
                &file,
                source.unit_name(),
                source.text(),
                source.name(),
                &mut resolver,
            )
        };

        let mut failed = false;
        for mut diagnostic in diagnostics {
            if options.warnings_as_errors && diagnostic.severity == Severity::Warning {
                diagnostic.severity = Severity::Error;
            }
            failed |= diagnostic.severity == Severity::Error;
            sink.report(diagnostic);
        }
        if failed {
            return false;
        }

        if let Err(e) = write_outputs(fm, source, &units, options.metadata) {
            sink.report(Diagnostic::error(format!(
                "failed to write output for {}: {e}",
                source.unit_name()
            )));
            return false;
        }
        tracing::debug!(
            "Lowered {} into {} unit(s)",
            source.unit_name(),
            units.len()
        );
        true
    }
}

impl Toolchain for SnippetToolchain {
    fn name(&self) -> &str {
        "rill-snippet"
    }

    fn compile(&self, task: CompileTask<'_>) -> bool {
        let CompileTask {
            file_manager,
            diagnostics,
            sources,
            options,
        } = task;
        let options = Options::parse(file_manager, options, diagnostics);
        let mut ok = true;
        for source in sources {
            ok &= self.compile_source(file_manager, diagnostics, source, &options);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompilerConfig, RuntimeCompiler};
    use std::sync::Arc;

    fn compiler(options: &[&str]) -> RuntimeCompiler {
        let config =
            CompilerConfig::default().with_options(options.iter().map(|s| s.to_string()).collect::<Vec<String>>());
        RuntimeCompiler::with_toolchain(config, Arc::new(SnippetToolchain::new()))
    }

    #[test]
    fn test_units_and_metadata() {
        let result = compiler(&[]).compile("lib.Math", "pub fn twice(x: i64) -> i64 { x * 2 }");
        assert!(result.was_successful(), "{result}");
        assert_eq!(result.units.len(), 1);
        assert_eq!(result.units[0].name, "lib.Math");
        assert_eq!(&result.units[0].bytes[..4], b"RILU");

        assert_eq!(result.resources.len(), 1);
        assert_eq!(result.resources[0].name, "META-INF/rill/lib.Math.json");
        let meta: serde_json::Value = serde_json::from_slice(&result.resources[0].bytes).unwrap();
        assert_eq!(meta["functions"][0]["name"], "twice");
        assert_eq!(meta["functions"][0]["ret"], "i64");
    }

    #[test]
    fn test_parse_error_position() {
        let source = "fn f() -> i64 { 1 + }";
        let result = compiler(&[]).compile("Broken", source);
        assert!(!result.was_successful());
        assert!(result.units.is_empty());
        let msg = result.errors().next().unwrap();
        assert!(msg.start <= source.len());
    }

    #[test]
    fn test_werror_and_unknown_option() {
        let source = "fn f() -> i64 { let x = 1; 2 }";
        let lenient = compiler(&["--fancy"]).compile("W", source);
        assert!(lenient.was_successful());
        assert!(
            lenient
                .messages
                .iter()
                .any(|m| m.message == "unrecognised option `--fancy` ignored")
        );

        let strict = compiler(&["-Werror"]).compile("W", source);
        assert!(!strict.was_successful());
        assert!(strict.units.is_empty());
    }

    #[test]
    fn test_no_metadata() {
        let result = compiler(&["--no-metadata"]).compile("M", "fn f() {}");
        assert!(result.was_successful());
        assert!(result.resources.is_empty());
    }
}

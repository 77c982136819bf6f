//! Compile command: turn a library source file into binary units on disk.
//!
//! The output directory mirrors the classpath layout (`a/b/Unit.unit`), so it
//! can be put on `RILL_CLASSPATH` as is.

use std::fs;
use std::path::Path;

use anyhow::Context;
use rill_core::classpath::BINARY_EXTENSION;
use rill_core::{CompilerConfig, RuntimeCompiler};

pub fn execute(
    file: &Path,
    unit: Option<&str>,
    out: &Path,
    classpath: Option<&str>,
    options: Vec<String>,
) -> anyhow::Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let unit = match unit {
        Some(unit) => unit.to_string(),
        None => file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .with_context(|| format!("cannot derive a unit name from {}", file.display()))?,
    };

    let mut config = CompilerConfig::from_env();
    if let Some(classpath) = classpath {
        config.classpath = classpath.into();
    }
    if !options.is_empty() {
        config.options = options;
    }

    let result = RuntimeCompiler::new(config).compile(&unit, &source);
    for message in &result.messages {
        eprint!("{}", message.render());
    }
    if !result.was_successful() {
        anyhow::bail!(
            "{} failed to compile with {} error(s)",
            unit,
            result.errors().count()
        );
    }

    for compiled in &result.units {
        let relative = format!("{}.{BINARY_EXTENSION}", compiled.name.replace('.', "/"));
        write_file(&out.join(relative), &compiled.bytes)?;
    }
    for resource in &result.resources {
        write_file(&out.join(&resource.name), &resource.bytes)?;
    }

    println!(
        "Wrote {} unit(s) and {} resource(s) to {}",
        result.units.len(),
        result.resources.len(),
        out.display()
    );
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

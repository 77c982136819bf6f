//! Run command: build the stage and push stdin through it as one batch.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use anyhow::Context;
use rill_core::{SnippetPipeline, Value};

use crate::snippet::{self, SnippetArgs};

pub fn execute(args: &SnippetArgs) -> anyhow::Result<()> {
    let config = snippet::load(args)?;
    let stage = SnippetPipeline::from_config(&config).try_build(&config.code)?;

    let input = read_values(io::stdin().lock())?;
    let start = Instant::now();
    let count = input.len();
    let output = stage.process(input)?;
    tracing::info!(
        "Processed {} value(s) into {} in {:?}",
        count,
        output.len(),
        start.elapsed()
    );

    let mut out = io::stdout().lock();
    for value in &output {
        serde_json::to_writer(&mut out, value)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// One JSON value per line. Blank lines are skipped.
fn read_values(reader: impl BufRead) -> anyhow::Result<Vec<Value>> {
    let mut values = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let json: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", i + 1))?;
        let value = Value::from_json(json)
            .with_context(|| format!("line {}: objects are not supported", i + 1))?;
        values.push(value);
    }
    Ok(values)
}

//! Where a snippet comes from: a flag, a file, a JSON config or the environment.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use rill_core::TransformerConfig;

#[derive(Args, Debug, Clone)]
pub struct SnippetArgs {
    /// Snippet text, encoded as in configuration
    #[arg(long, conflicts_with_all = ["file", "config"])]
    pub code: Option<String>,

    /// File holding the snippet text
    #[arg(long, conflicts_with = "config")]
    pub file: Option<PathBuf>,

    /// JSON transformer configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Classpath overriding the configured one
    #[arg(long)]
    pub classpath: Option<String>,
}

/// Resolve the transformer configuration. Without `--code`, `--file` or
/// `--config` the snippet is read from `RILL_CODE`.
pub fn load(args: &SnippetArgs) -> anyhow::Result<TransformerConfig> {
    let mut config = if let Some(path) = &args.config {
        TransformerConfig::from_json_file(path)?
    } else if let Some(code) = &args.code {
        TransformerConfig {
            code: code.clone(),
            ..TransformerConfig::default()
        }
    } else if let Some(path) = &args.file {
        let code = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snippet from {}", path.display()))?;
        TransformerConfig {
            code,
            ..TransformerConfig::default()
        }
    } else {
        TransformerConfig::from_env()?
    };

    if let Some(classpath) = &args.classpath {
        config.classpath = Some(classpath.clone());
    }
    tracing::debug!("Loaded snippet of {} byte(s)", config.code.len());
    Ok(config)
}

//! rill CLI - compile and run stream-transform snippets.

mod check;
mod classpath;
mod compile;
mod run;
mod snippet;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::snippet::SnippetArgs;

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "Runtime compilation of stream-transform snippets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a snippet and report its diagnostics
    Check {
        #[command(flatten)]
        snippet: SnippetArgs,
    },

    /// Build a snippet stage and feed it JSON values, one per stdin line
    Run {
        #[command(flatten)]
        snippet: SnippetArgs,
    },

    /// Compile a library unit and write its binary units to a directory
    Compile {
        /// Source file of the unit
        file: PathBuf,

        /// Dotted unit name (default: the file stem)
        #[arg(long)]
        unit: Option<String>,

        /// Output directory, usable as a classpath segment
        #[arg(short, long)]
        out: PathBuf,

        /// Classpath to resolve imports against (default: RILL_CLASSPATH)
        #[arg(long)]
        classpath: Option<String>,

        /// Compiler option, may be repeated
        #[arg(long = "option", short = 'O')]
        options: Vec<String>,
    },

    /// List the entries visible on a classpath
    Classpath {
        /// Classpath to list (default: RILL_CLASSPATH)
        #[arg(long)]
        classpath: Option<String>,

        /// Only list this dotted package
        #[arg(short, long)]
        package: Option<String>,

        /// Include subpackages of --package
        #[arg(short, long)]
        recursive: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Helper to format rill-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(rill_err) = err.downcast_ref::<rill_core::Error>() {
            anyhow::anyhow!("{}", rill_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Check { snippet } => check::execute(&snippet).map_err(format_error)?,

        Commands::Run { snippet } => run::execute(&snippet).map_err(format_error)?,

        Commands::Compile {
            file,
            unit,
            out,
            classpath,
            options,
        } => {
            compile::execute(&file, unit.as_deref(), &out, classpath.as_deref(), options)
                .map_err(format_error)?;
        }

        Commands::Classpath {
            classpath,
            package,
            recursive,
        } => {
            classpath::execute(classpath.as_deref(), package.as_deref(), recursive)
                .map_err(format_error)?;
        }
    }

    Ok(())
}

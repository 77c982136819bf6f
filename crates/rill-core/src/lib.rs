//! Runtime compilation service for rill stream-transform snippets.
//!
//! This crate provides:
//! - A virtual classpath over directories and (nested) zip archives
//! - An in-memory file manager and output collector for the compiler toolchain
//! - Diagnostics mapped back to exact source positions
//! - Isolated loaders turning binary units into callable stages
//! - The snippet language and the pipeline that installs a snippet as a stage

pub mod classpath;
pub mod compile;
pub mod config;
pub mod error;
pub mod execute;
pub mod lang;
pub mod pipeline;

pub use classpath::{ClasspathEntry, FileKind, PackageFilter, VirtualClasspath};
pub use compile::{
    CompilationMessage, CompilationResult, CompiledUnit, CompilerConfig, FileManager, Location,
    RuntimeCompiler, Severity, Toolchain,
};
pub use config::TransformerConfig;
pub use error::{Error, Result};
pub use execute::{HostLoader, IsolatedLoader, Processor, ProcessorFactory, UnitHandle, UnitLoader};
pub use lang::{SnippetToolchain, Value};
pub use pipeline::{SnippetPipeline, WRAPPER_UNIT, decode_snippet, template};

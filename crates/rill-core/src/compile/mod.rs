//! Compilation pipeline for runtime snippets.
//!
//! This module provides:
//! - The file manager mediating all toolchain I/O
//! - In-memory output units and their collector
//! - Diagnostic mapping (byte offsets → framed, caret-marked messages)
//! - The toolchain seam and the runtime compiler front end
//!
//! # Architecture
//!
//! ```text
//! RuntimeCompiler::compile(unit, source)
//!     │
//!     ├── SourceUnit ──► Toolchain ──► DiagnosticSink ──► CompilationMessage
//!     │                     │
//!     │                     ├── reads ──► FileManager ──► VirtualClasspath
//!     │                     │
//!     │                     └── writes ─► FileManager ──► OutputCollector
//!     │
//!     └── CompilationResult { units, resources, messages }
//! ```

mod compiler;
mod errors;
mod file_manager;
mod file_object;
mod location;
mod output;
mod toolchain;
mod types;

pub use compiler::RuntimeCompiler;
pub use errors::{CompilationMessage, Diagnostic, DiagnosticSink, LineIndex, Severity};
pub use file_manager::FileManager;
pub use file_object::FileObject;
pub use location::Location;
pub use output::{OutputCollector, OutputUnit, OutputWriter, SourceUnit};
pub use toolchain::{CompileTask, Toolchain};
pub use types::{
    CLASSPATH_ENV, COMPILER_OPTIONS_ENV, CompilationResult, CompiledResource, CompiledUnit,
    CompilerConfig, PLATFORM_CLASSPATH_ENV,
};

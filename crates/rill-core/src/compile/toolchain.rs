//! The compiler toolchain seam.

use super::errors::DiagnosticSink;
use super::file_manager::FileManager;
use super::output::SourceUnit;

/// Everything a toolchain may touch during one compilation.
pub struct CompileTask<'a> {
    /// All reads and writes go through here
    pub file_manager: &'a mut FileManager,

    /// Diagnostics, in report order
    pub diagnostics: &'a mut DiagnosticSink,

    /// The sources to compile
    pub sources: &'a [SourceUnit],

    /// Toolchain options
    pub options: &'a [String],
}

/// A compiler turning source units into binary units.
///
/// Implementations must be usable from several threads at once; each call
/// gets its own [`CompileTask`].
pub trait Toolchain: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Compile `task.sources`. Returns whether compilation succeeded.
    fn compile(&self, task: CompileTask<'_>) -> bool;
}

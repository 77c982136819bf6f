//! Compile a named unit from a source string, entirely in memory.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::errors::{CompilationMessage, Diagnostic, DiagnosticSink};
use super::file_manager::FileManager;
use super::output::SourceUnit;
use super::toolchain::{CompileTask, Toolchain};
use super::types::{CompilationResult, CompilerConfig};
use crate::lang::SnippetToolchain;

/// Front end over a [`Toolchain`].
///
/// Each call to [`compile`](Self::compile) gets a fresh [`FileManager`] and
/// diagnostic buffer, so concurrent compilations share no mutable state.
#[derive(Clone)]
pub struct RuntimeCompiler {
    toolchain: Arc<dyn Toolchain>,
    config: CompilerConfig,
}

impl RuntimeCompiler {
    /// A compiler using the built-in snippet toolchain.
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_toolchain(config, Arc::new(SnippetToolchain::new()))
    }

    pub fn with_toolchain(config: CompilerConfig, toolchain: Arc<dyn Toolchain>) -> Self {
        Self { toolchain, config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `source` as unit `unit_name` (dotted).
    ///
    /// Failures are reported in the result, never as an `Err`.
    pub fn compile(&self, unit_name: &str, source: &str) -> CompilationResult {
        let start = Instant::now();
        let text: Arc<str> = Arc::from(source);
        let sources = [SourceUnit::new(unit_name, Arc::clone(&text))];

        let mut file_manager = FileManager::new(&self.config);
        let mut diagnostics = DiagnosticSink::new();
        let succeeded = self.toolchain.compile(CompileTask {
            file_manager: &mut file_manager,
            diagnostics: &mut diagnostics,
            sources: &sources,
            options: &self.config.options,
        });
        let units = file_manager.compiled_units();
        let resources = file_manager.resources();
        file_manager.close();

        if !succeeded && !diagnostics.has_errors() {
            diagnostics.report(Diagnostic::error(format!(
                "{} reported failure without diagnostics",
                self.toolchain.name()
            )));
        }
        let messages: Vec<_> = diagnostics
            .into_diagnostics()
            .into_iter()
            .map(|d| CompilationMessage::from_diagnostic(d, Arc::clone(&text)))
            .collect();

        tracing::debug!(
            "Compiled {} with {} in {:?}: {} unit(s), {} message(s)",
            unit_name,
            self.toolchain.name(),
            start.elapsed(),
            units.len(),
            messages.len()
        );

        CompilationResult {
            units,
            resources,
            messages,
        }
    }
}

impl fmt::Debug for RuntimeCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeCompiler")
            .field("toolchain", &self.toolchain.name())
            .field("config", &self.config)
            .finish()
    }
}

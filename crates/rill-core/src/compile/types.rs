//! Common types for the compilation pipeline.

use std::ffi::OsString;
use std::fmt;

use super::errors::CompilationMessage;

/// Environment variable holding the user classpath.
pub const CLASSPATH_ENV: &str = "RILL_CLASSPATH";

/// Environment variable holding the platform classpath.
pub const PLATFORM_CLASSPATH_ENV: &str = "RILL_PLATFORM_CLASSPATH";

/// Environment variable holding whitespace-separated toolchain options.
pub const COMPILER_OPTIONS_ENV: &str = "RILL_COMPILER_OPTIONS";

/// Configuration for the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerConfig {
    /// The host application's classpath (platform path separator)
    pub classpath: OsString,

    /// Units shipped with the host runtime
    pub platform_classpath: OsString,

    /// Options passed to the toolchain
    pub options: Vec<String>,
}

impl CompilerConfig {
    /// Read the classpaths and options from the process environment.
    ///
    /// Unset variables leave the corresponding field empty.
    pub fn from_env() -> Self {
        Self {
            classpath: std::env::var_os(CLASSPATH_ENV).unwrap_or_default(),
            platform_classpath: std::env::var_os(PLATFORM_CLASSPATH_ENV).unwrap_or_default(),
            options: std::env::var(COMPILER_OPTIONS_ENV)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    pub fn with_classpath(mut self, classpath: impl Into<OsString>) -> Self {
        self.classpath = classpath.into();
        self
    }

    pub fn with_platform_classpath(mut self, classpath: impl Into<OsString>) -> Self {
        self.platform_classpath = classpath.into();
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// A binary unit produced by a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Dotted unit name
    pub name: String,

    /// Encoded unit image
    pub bytes: Vec<u8>,
}

/// A non-binary output produced by a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledResource {
    /// Slash-separated path below the output root
    pub name: String,

    pub bytes: Vec<u8>,
}

/// Result of one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilationResult {
    pub units: Vec<CompiledUnit>,
    pub resources: Vec<CompiledResource>,
    pub messages: Vec<CompilationMessage>,
}

impl CompilationResult {
    /// True when no error-severity message was reported. Warnings do not count.
    pub fn was_successful(&self) -> bool {
        !self.messages.iter().any(CompilationMessage::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &CompilationMessage> {
        self.messages.iter().filter(|m| m.is_error())
    }

    /// Look up a produced unit by dotted name.
    pub fn unit(&self, name: &str) -> Option<&CompiledUnit> {
        self.units.iter().find(|u| u.name == name)
    }
}

impl fmt::Display for CompilationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Compilation {}: {} unit(s), {} message(s)",
            if self.was_successful() { "succeeded" } else { "failed" },
            self.units.len(),
            self.messages.len()
        )?;
        for unit in &self.units {
            writeln!(f, "  unit {} ({} bytes)", unit.name, unit.bytes.len())?;
        }
        for message in &self.messages {
            f.write_str(&message.render())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::errors::{Diagnostic, Severity};
    use std::sync::Arc;

    fn message(severity: Severity) -> CompilationMessage {
        CompilationMessage::from_diagnostic(
            Diagnostic::new(severity, "something"),
            Arc::from("fn f() {}"),
        )
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let result = CompilationResult {
            messages: vec![message(Severity::Warning), message(Severity::Note)],
            ..Default::default()
        };
        assert!(result.was_successful());

        let result = CompilationResult {
            messages: vec![message(Severity::Warning), message(Severity::Error)],
            ..Default::default()
        };
        assert!(!result.was_successful());
        assert_eq!(result.errors().count(), 1);
    }

    #[test]
    fn test_config_builders() {
        let config = CompilerConfig::default()
            .with_classpath("/a")
            .with_options(["-Wunused"]);
        assert_eq!(config.classpath, OsString::from("/a"));
        assert_eq!(config.options, vec!["-Wunused".to_string()]);
        assert!(config.platform_classpath.is_empty());
    }
}

//! Storage locations the toolchain reads from and writes to.

use std::fmt;

/// A logical location known to the [`FileManager`](super::FileManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Units shipped with the host runtime itself.
    PlatformClassPath,
    /// The host application's user classpath.
    ClassPath,
    /// Additional source roots. Never backed by content.
    SourcePath,
    /// Compile-time processors. Not supported.
    AnnotationProcessorPath,
    /// Where compiled units and resources are written, in memory.
    ClassOutput,
}

impl Location {
    pub fn is_output(&self) -> bool {
        matches!(self, Self::ClassOutput)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PlatformClassPath => "PLATFORM_CLASS_PATH",
            Self::ClassPath => "CLASS_PATH",
            Self::SourcePath => "SOURCE_PATH",
            Self::AnnotationProcessorPath => "ANNOTATION_PROCESSOR_PATH",
            Self::ClassOutput => "CLASS_OUTPUT",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

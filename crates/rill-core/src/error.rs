//! Error types for rill-core.

use thiserror::Error;

/// Result type for rill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rill-core.
#[derive(Debug, Error)]
pub enum Error {
    /// A lazy sequence was advanced past its end.
    #[error("no more elements")]
    ExhaustedIteration,

    /// Derived information was requested for something the component does not own.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed argument, rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not backed by real content at this location or on this kind of file.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Compilation failed.
    #[error("compilation failed for {unit}: {message}")]
    Compilation { unit: String, message: String },

    /// A unit could not be found by any loader in the chain.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// A loader was asked to define a unit name it already holds.
    #[error("unit already defined in this loading context: {0}")]
    DuplicateUnit(String),

    /// Bytes handed to a loader are not a valid binary unit.
    #[error("invalid binary unit {name}: {reason}")]
    InvalidUnit { name: String, reason: String },

    /// The unit declares no processor factory.
    #[error("unit {0} does not implement ProcessorFactory")]
    NotAFactory(String),

    /// Fault raised while executing compiled code.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error.
    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Archive error.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    /// Recovery hint for errors that usually come from configuration mistakes.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument(_) => {
                Some("package filters use dotted names such as `com.example`, not paths")
            }
            Self::UnitNotFound(_) => {
                Some("check that RILL_CLASSPATH contains the directory or archive holding the unit")
            }
            Self::Config(_) => Some("set RILL_CODE or pass --code/--file"),
            _ => None,
        }
    }

    /// Render the error followed by its hint, if any.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_rendering() {
        let err = Error::InvalidArgument("org/example".to_string());
        let rendered = err.with_hint();
        assert!(rendered.starts_with("invalid argument: org/example"));
        assert!(rendered.contains("hint: package filters"));

        let err = Error::ExhaustedIteration;
        assert_eq!(err.with_hint(), "no more elements");
    }
}

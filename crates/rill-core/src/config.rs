//! Transformer configuration: the snippet plus the compiler settings.

use std::path::Path;

use serde::Deserialize;

use crate::compile::{
    CLASSPATH_ENV, COMPILER_OPTIONS_ENV, CompilerConfig, PLATFORM_CLASSPATH_ENV,
};
use crate::error::{Error, Result};

/// Environment variable holding the raw snippet.
pub const CODE_ENV: &str = "RILL_CODE";

/// Configuration of one transform stage.
///
/// `code` is the raw, still encoded snippet as it appears in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    pub code: String,
    pub classpath: Option<String>,
    pub platform_classpath: Option<String>,
    pub options: Vec<String>,
}

impl TransformerConfig {
    /// Read `RILL_CODE` and the compiler variables from the environment.
    pub fn from_env() -> Result<Self> {
        let code = std::env::var(CODE_ENV)
            .map_err(|_| Error::Config(format!("{CODE_ENV} is not set")))?;
        Ok(Self {
            code,
            classpath: std::env::var(CLASSPATH_ENV).ok(),
            platform_classpath: std::env::var(PLATFORM_CLASSPATH_ENV).ok(),
            options: std::env::var(COMPILER_OPTIONS_ENV)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        if config.code.trim().is_empty() {
            return Err(Error::Config("`code` is empty".to_string()));
        }
        Ok(config)
    }

    /// Compiler settings. Unset classpaths fall back to the environment.
    pub fn compiler_config(&self) -> CompilerConfig {
        let env = CompilerConfig::from_env();
        CompilerConfig {
            classpath: self
                .classpath
                .as_ref()
                .map(Into::into)
                .unwrap_or(env.classpath),
            platform_classpath: self
                .platform_classpath
                .as_ref()
                .map(Into::into)
                .unwrap_or(env.platform_classpath),
            options: if self.options.is_empty() {
                env.options
            } else {
                self.options.clone()
            },
        }
    }
}

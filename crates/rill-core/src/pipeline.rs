//! From a configured snippet to an installed stage.
//!
//! `raw → decoded → templated → compiled → loaded → instantiated → extracted`,
//! strictly in that order, with no retries.

use std::sync::Arc;
use std::time::Instant;

use crate::compile::{CompilationResult, CompilerConfig, RuntimeCompiler};
use crate::config::TransformerConfig;
use crate::error::{Error, Result};
use crate::execute::{HostLoader, IsolatedLoader, Processor, UnitLoader};

/// Qualified name of the unit generated from the template.
pub const WRAPPER_UNIT: &str = "rill.transform.GeneratedProcessor";

const TEMPLATE_PREFIX: &str = "pub struct GeneratedProcessor;

impl ProcessorFactory for GeneratedProcessor {
    fn processor(&self) -> Processor {
";

const TEMPLATE_SUFFIX: &str = "
    }
}
";

/// Undo configuration escaping: `\n` becomes a newline, `""` becomes `"`,
/// then one surrounding quote pair is stripped.
pub fn decode_snippet(raw: &str) -> String {
    let decoded = raw.replace("\\n", "\n").replace("\"\"", "\"");
    match decoded
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner.to_string(),
        None => decoded,
    }
}

/// Splice a decoded snippet into the factory template, unmodified.
pub fn template(snippet: &str) -> String {
    let mut source =
        String::with_capacity(TEMPLATE_PREFIX.len() + snippet.len() + TEMPLATE_SUFFIX.len());
    source.push_str(TEMPLATE_PREFIX);
    source.push_str(snippet);
    source.push_str(TEMPLATE_SUFFIX);
    source
}

/// Builds stages from snippets.
#[derive(Clone)]
pub struct SnippetPipeline {
    compiler: RuntimeCompiler,
    host: Arc<dyn UnitLoader>,
}

impl SnippetPipeline {
    pub fn new(config: CompilerConfig) -> Self {
        let host = Arc::new(HostLoader::new(&config));
        Self::with_parts(RuntimeCompiler::new(config), host)
    }

    pub fn from_config(config: &TransformerConfig) -> Self {
        Self::new(config.compiler_config())
    }

    pub fn with_parts(compiler: RuntimeCompiler, host: Arc<dyn UnitLoader>) -> Self {
        Self { compiler, host }
    }

    pub fn compiler(&self) -> &RuntimeCompiler {
        &self.compiler
    }

    /// Decode, template and compile `raw` without loading anything.
    pub fn compile(&self, raw: &str) -> CompilationResult {
        let source = template(&decode_snippet(raw));
        self.compiler.compile(WRAPPER_UNIT, &source)
    }

    /// Build the stage for `raw`, reporting why it could not be built.
    pub fn try_build(&self, raw: &str) -> Result<Box<dyn Processor>> {
        let start = Instant::now();
        let result = self.compile(raw);
        if !result.was_successful() {
            let rendered: Vec<String> = result.messages.iter().map(|m| m.render()).collect();
            return Err(Error::Compilation {
                unit: WRAPPER_UNIT.to_string(),
                message: rendered.join(""),
            });
        }
        self.install(&result, start)
    }

    /// Build the stage for `raw`, or `None` after logging the failure.
    pub fn build(&self, raw: &str) -> Option<Box<dyn Processor>> {
        let start = Instant::now();
        let result = self.compile(raw);
        if !result.was_successful() {
            tracing::error!("Compilation failed");
            for message in &result.messages {
                tracing::error!("{}", message.render());
            }
            return None;
        }
        match self.install(&result, start) {
            Ok(processor) => Some(processor),
            Err(Error::UnitNotFound(name)) if name == WRAPPER_UNIT => {
                tracing::error!("Compilation produced no {} unit", WRAPPER_UNIT);
                None
            }
            Err(e) => {
                tracing::error!("Failed to install snippet stage: {}", e);
                None
            }
        }
    }

    /// Load a successful compilation and extract its stage.
    fn install(&self, result: &CompilationResult, start: Instant) -> Result<Box<dyn Processor>> {
        tracing::info!(
            "Compiled {} into {} unit(s) in {:?}",
            WRAPPER_UNIT,
            result.units.len(),
            start.elapsed()
        );

        let loader = IsolatedLoader::new(Arc::clone(&self.host));
        for unit in &result.units {
            loader.define(&unit.name, &unit.bytes)?;
        }
        if !loader.is_defined(WRAPPER_UNIT) {
            return Err(Error::UnitNotFound(WRAPPER_UNIT.to_string()));
        }
        tracing::info!("Loaded {} unit(s) into loader {}", result.units.len(), loader.id());

        let factory = loader.handle(WRAPPER_UNIT).instantiate()?;
        let processor = factory.processor()?;
        tracing::info!("Extracted stage from {}", WRAPPER_UNIT);
        Ok(processor)
    }
}

impl std::fmt::Debug for SnippetPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnippetPipeline")
            .field("compiler", &self.compiler)
            .field("host", &self.host.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_snippet_unchanged() {
        let raw = "return |input| input.buffer(5).map(|list| list.get(4));";
        assert_eq!(decode_snippet(raw), raw);
    }

    #[test]
    fn test_decode_quoted_multiline() {
        let raw = r#""let s = ""a"";\n|input| input""#;
        assert_eq!(decode_snippet(raw), "let s = \"a\";\n|input| input");
    }

    #[test]
    fn test_decode_lone_quote() {
        assert_eq!(decode_snippet("\""), "\"");
    }

    #[test]
    fn test_template_splices_unmodified() {
        let source = template("|input| input");
        assert!(source.starts_with("pub struct GeneratedProcessor;"));
        assert!(source.contains("Processor {\n|input| input\n    }"));
        assert!(syn::parse_file(&source).is_ok());
    }
}

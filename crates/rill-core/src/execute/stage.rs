//! Stage contract and the instantiation of loaded units.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::loader::UnitLoader;
use crate::error::{Error, Result};
use crate::lang::{Closure, Linked, Program, Value};

/// One stage of a stream pipeline.
pub trait Processor: Send + Sync {
    /// Transform one batch of input values.
    fn process(&self, input: Vec<Value>) -> Result<Vec<Value>>;
}

/// Produces processors. Implemented by units declaring
/// `impl ProcessorFactory for <Unit>`.
pub trait ProcessorFactory: Send + Sync {
    fn processor(&self) -> Result<Box<dyn Processor>>;
}

/// A unit name bound to the loader that resolves it.
#[derive(Clone)]
pub struct UnitHandle {
    name: String,
    loader: Arc<dyn UnitLoader>,
}

impl UnitHandle {
    pub fn new(name: &str, loader: Arc<dyn UnitLoader>) -> Self {
        Self {
            name: name.to_string(),
            loader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the unit and everything it references, transitively.
    pub fn link(&self) -> Result<Program> {
        let mut linked = Linked::default();
        let mut queue = VecDeque::from([self.name.clone()]);
        while let Some(name) = queue.pop_front() {
            if linked.contains_key(&name) {
                continue;
            }
            let image = self
                .loader
                .find_unit(&name)?
                .ok_or_else(|| Error::UnitNotFound(name.clone()))?;
            queue.extend(image.references.iter().cloned());
            linked.insert(name, image);
        }
        tracing::debug!(
            "Linked {} with {} unit(s) via {}",
            self.name,
            linked.len(),
            self.loader.describe()
        );
        Ok(Program::new(linked))
    }

    /// Link the unit and return its processor factory.
    pub fn instantiate(&self) -> Result<Box<dyn ProcessorFactory>> {
        let program = self.link()?;
        let declares_factory = program
            .units()
            .get(&self.name)
            .is_some_and(|image| image.factory.is_some());
        if !declares_factory {
            return Err(Error::NotAFactory(self.name.clone()));
        }
        Ok(Box::new(CompiledFactory {
            unit: self.name.clone(),
            program,
        }))
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("name", &self.name)
            .field("loader", &self.loader.describe())
            .finish()
    }
}

struct CompiledFactory {
    unit: String,
    program: Program,
}

impl ProcessorFactory for CompiledFactory {
    fn processor(&self) -> Result<Box<dyn Processor>> {
        let closure = self.program.factory(&self.unit)?;
        Ok(Box::new(CompiledProcessor {
            program: self.program.clone(),
            closure,
        }))
    }
}

/// A processor backed by a compiled closure.
struct CompiledProcessor {
    program: Program,
    closure: Arc<Closure>,
}

impl Processor for CompiledProcessor {
    fn process(&self, input: Vec<Value>) -> Result<Vec<Value>> {
        self.program.process(&self.closure, input)
    }
}

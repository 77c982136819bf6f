//! Loading and running compiled units.
//!
//! # Architecture
//!
//! ```text
//! CompilationResult.units
//!     │
//!     └── IsolatedLoader::define (one loader per compilation)
//!             │
//!             ├── own units ──► parent HostLoader ──► host classpaths
//!             │
//!             └── UnitHandle::instantiate ──► link references ──► ProcessorFactory
//!                                                                      │
//!                                                  Processor::process ◄┘
//! ```

mod loader;
mod stage;

pub use loader::{HostLoader, IsolatedLoader, UnitLoader};
pub use stage::{Processor, ProcessorFactory, UnitHandle};

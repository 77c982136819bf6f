//! The snippet language: a small, statically checked Rust subset.
//!
//! Source is parsed with `syn`, lowered into a [`UnitImage`] per unit, and
//! executed by a tree-walking [`Program`] once the units are linked.
//!
//! ```text
//! source ──► syn::File ──► lower ──► UnitImage ──► bincode ──► binary unit
//!                             │
//!                             └── use a::b::Unit ──► FileManager (classpath)
//! ```

mod interp;
mod ir;
mod lower;
mod toolchain;
mod value;

pub use interp::{Closure, Linked, MAX_CALL_DEPTH, Program};
pub use ir::{
    BinOp, Block, Callee, Expr, FactoryDef, FnDef, FnSig, Lambda, Lit, Method, Stmt, Ty,
    UNIT_FORMAT_VERSION, UNIT_MAGIC, UnOp, UnitImage,
};
pub use lower::{FACTORY_METHOD, FACTORY_TRAIT, Lowered, UnitResolver, lower_file};
pub use toolchain::{METADATA_DIR, SnippetToolchain};
pub use value::Value;

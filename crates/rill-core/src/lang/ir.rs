//! Binary unit format: the lowered form of one compilation unit.
//!
//! A binary unit is the 4-byte magic `RILU`, a little-endian `u16` format
//! version, then the `bincode`-encoded [`UnitImage`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const UNIT_MAGIC: [u8; 4] = *b"RILU";

pub const UNIT_FORMAT_VERSION: u16 = 1;

/// Static type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    List,
    /// `Value`: checked at run time
    Any,
    Stream,
    Processor,
    /// Type of diverging expressions such as `return`
    Never,
}

impl Ty {
    /// Whether a value of type `self` may be used where `expected` is required.
    pub fn fits(self, expected: Ty) -> bool {
        self == expected
            || self == Ty::Never
            || (expected == Ty::Any && self.is_data())
            || (self == Ty::Any && expected.is_data())
    }

    /// Plain data, as opposed to streams and processors.
    pub fn is_data(self) -> bool {
        !matches!(self, Ty::Stream | Ty::Processor | Ty::Never)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }

    /// Common type of two branches, if any.
    pub fn unify(self, other: Ty) -> Option<Ty> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Ty::Never, t) | (t, Ty::Never) => Some(t),
            (Ty::Any, t) | (t, Ty::Any) if t.is_data() => Some(Ty::Any),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ty::Unit => "()",
            Ty::Bool => "bool",
            Ty::Int => "i64",
            Ty::Float => "f64",
            Ty::Str => "String",
            Ty::List => "Vec<Value>",
            Ty::Any => "Value",
            Ty::Stream => "Stream",
            Ty::Processor => "Processor",
            Ty::Never => "!",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// Built-in methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    // streams
    Map,
    Filter,
    Buffer,
    Take,
    Skip,
    // lists
    Get,
    Sum,
    First,
    Last,
    // lists and strings
    Len,
    IsEmpty,
    Contains,
    // strings
    ToUppercase,
    ToLowercase,
    Trim,
    ParseInt,
    ParseFloat,
    // numbers
    Abs,
    Min,
    Max,
    // anything
    ToString,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "map" => Self::Map,
            "filter" => Self::Filter,
            "buffer" => Self::Buffer,
            "take" => Self::Take,
            "skip" => Self::Skip,
            "get" => Self::Get,
            "sum" => Self::Sum,
            "first" => Self::First,
            "last" => Self::Last,
            "len" => Self::Len,
            "is_empty" => Self::IsEmpty,
            "contains" => Self::Contains,
            "to_uppercase" => Self::ToUppercase,
            "to_lowercase" => Self::ToLowercase,
            "trim" => Self::Trim,
            "parse_int" => Self::ParseInt,
            "parse_float" => Self::ParseFloat,
            "abs" => Self::Abs,
            "min" => Self::Min,
            "max" => Self::Max,
            "to_string" => Self::ToString,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Filter => "filter",
            Self::Buffer => "buffer",
            Self::Take => "take",
            Self::Skip => "skip",
            Self::Get => "get",
            Self::Sum => "sum",
            Self::First => "first",
            Self::Last => "last",
            Self::Len => "len",
            Self::IsEmpty => "is_empty",
            Self::Contains => "contains",
            Self::ToUppercase => "to_uppercase",
            Self::ToLowercase => "to_lowercase",
            Self::Trim => "trim",
            Self::ParseInt => "parse_int",
            Self::ParseFloat => "parse_float",
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::ToString => "to_string",
        }
    }

    pub fn is_stream_op(self) -> bool {
        matches!(
            self,
            Self::Map | Self::Filter | Self::Buffer | Self::Take | Self::Skip
        )
    }
}

/// A function reference, resolved through the loader chain at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Callee {
    pub unit: String,
    pub function: String,
}

/// A closure. Captures a copy of the enclosing frame when created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub param: usize,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Lit(Lit),
    Local(usize),
    List(Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Cast(Box<Expr>, Ty),
    If(Box<Expr>, Block, Option<Box<Expr>>),
    Block(Block),
    Call(Callee, Vec<Expr>),
    Method(Method, Box<Expr>, Vec<Expr>),
    Closure(Lambda),
    Assign(usize, Box<Expr>),
    CompoundAssign(BinOp, usize, Box<Expr>),
    For(usize, Box<Expr>, Block),
    Return(Option<Box<Expr>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Let(usize, Expr),
    Expr(Expr),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub tail: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

impl fmt::Display for FnSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A lowered function. Parameters occupy the first frame slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDef {
    pub name: String,
    pub sig: FnSig,
    pub locals: usize,
    pub body: Block,
}

/// Body of `ProcessorFactory::processor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactoryDef {
    pub locals: usize,
    pub body: Block,
}

/// Everything a binary unit carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitImage {
    /// Dotted unit name
    pub name: String,
    /// Name of the source unit it was compiled from
    pub source_name: String,
    pub functions: Vec<FnDef>,
    pub factory: Option<FactoryDef>,
    /// Other units this one calls into
    pub references: Vec<String>,
}

impl UnitImage {
    pub fn function(&self, name: &str) -> Option<&FnDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Encode as binary unit bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(
            |e| Error::InvalidUnit {
                name: self.name.clone(),
                reason: e.to_string(),
            },
        )?;
        let mut bytes = Vec::with_capacity(payload.len() + 6);
        bytes.extend_from_slice(&UNIT_MAGIC);
        bytes.extend_from_slice(&UNIT_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode binary unit bytes. `name` is only used in error messages.
    pub fn decode(name: &str, bytes: &[u8]) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidUnit {
            name: name.to_string(),
            reason,
        };
        if bytes.len() < 6 || bytes[..4] != UNIT_MAGIC {
            return Err(invalid("not a binary unit (bad magic)".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != UNIT_FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported format version {version} (expected {UNIT_FORMAT_VERSION})"
            )));
        }
        let (image, _): (UnitImage, _) =
            bincode::serde::decode_from_slice(&bytes[6..], bincode::config::standard())
                .map_err(|e| invalid(e.to_string()))?;
        Ok(image)
    }
}

//! Tree-walking evaluation of linked unit images.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::ir::{BinOp, Block, Callee, Expr, Lambda, Lit, Method, Stmt, Ty, UnOp, UnitImage};
use super::value::Value;
use crate::error::{Error, Result};

/// Deepest call nesting before evaluation is aborted.
pub const MAX_CALL_DEPTH: usize = 256;

/// Stack reserved for each evaluation. It must hold `MAX_CALL_DEPTH` nested
/// snippet calls in an unoptimized build.
const EVAL_STACK_SIZE: usize = 128 * 1024 * 1024;

/// Units reachable from an entry unit, keyed by dotted name.
pub type Linked = FxHashMap<String, Arc<UnitImage>>;

/// A frame slot.
#[derive(Debug, Clone)]
enum Slot {
    Data(Value),
    Stream(Vec<Value>),
    Lambda(Arc<Closure>),
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Slot::Data(v) => v.type_name(),
            Slot::Stream(_) => "Stream",
            Slot::Lambda(_) => "Processor",
        }
    }
}

/// A closure value: the lambda plus the frame it was created in.
#[derive(Debug)]
pub struct Closure {
    frame: Vec<Slot>,
    lambda: Lambda,
}

enum Unwind {
    Return(Slot),
    Fault(Error),
}

impl From<Error> for Unwind {
    fn from(e: Error) -> Self {
        Unwind::Fault(e)
    }
}

type Flow<T> = std::result::Result<T, Unwind>;

fn fault(message: impl Into<String>) -> Unwind {
    Unwind::Fault(Error::Runtime(message.into()))
}

fn settle(flow: Flow<Slot>) -> Result<Slot> {
    match flow {
        Ok(slot) | Err(Unwind::Return(slot)) => Ok(slot),
        Err(Unwind::Fault(e)) => Err(e),
    }
}

/// Run `eval` on a dedicated thread whose stack is `EVAL_STACK_SIZE`.
fn on_eval_stack<T: Send>(eval: impl FnOnce() -> Result<T> + Send) -> Result<T> {
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("rill-eval".to_string())
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, eval)?;
        handle
            .join()
            .unwrap_or_else(|_| Err(Error::Runtime("evaluation thread panicked".to_string())))
    })
}

/// Executable view over a set of linked units.
#[derive(Debug, Clone)]
pub struct Program {
    units: Arc<Linked>,
}

impl Program {
    pub fn new(units: Linked) -> Self {
        Self {
            units: Arc::new(units),
        }
    }

    pub fn units(&self) -> &Linked {
        &self.units
    }

    /// Run the factory body of `unit` and return the processor closure.
    pub fn factory(&self, unit: &str) -> Result<Arc<Closure>> {
        let image = self
            .units
            .get(unit)
            .ok_or_else(|| Error::UnitNotFound(unit.to_string()))?;
        let factory = image
            .factory
            .as_ref()
            .ok_or_else(|| Error::NotAFactory(unit.to_string()))?;
        let result = on_eval_stack(|| {
            let mut frame = vec![Slot::Data(Value::Null); factory.locals];
            settle(Machine::new(&self.units).block(&mut frame, &factory.body))
        })?;
        match result {
            Slot::Lambda(closure) => Ok(closure),
            other => Err(Error::Runtime(format!(
                "processor() of {unit} produced `{}`, expected a closure",
                other.kind()
            ))),
        }
    }

    /// Apply a processor closure to one batch.
    pub fn process(&self, closure: &Closure, input: Vec<Value>) -> Result<Vec<Value>> {
        let result =
            on_eval_stack(|| settle(Machine::new(&self.units).apply(closure, Slot::Stream(input))))?;
        match result {
            Slot::Stream(values) | Slot::Data(Value::List(values)) => Ok(values),
            other => Err(Error::Runtime(format!(
                "processor produced `{}`, expected a stream",
                other.kind()
            ))),
        }
    }
}

struct Machine<'a> {
    units: &'a Linked,
    depth: usize,
}

impl<'a> Machine<'a> {
    fn new(units: &'a Linked) -> Self {
        Self { units, depth: 0 }
    }

    fn call(&mut self, callee: &Callee, args: Vec<Slot>) -> Flow<Slot> {
        let image = self
            .units
            .get(&callee.unit)
            .ok_or_else(|| Error::UnitNotFound(callee.unit.clone()))?;
        let def = image.function(&callee.function).ok_or_else(|| {
            fault(format!(
                "unit {} has no function `{}`",
                callee.unit, callee.function
            ))
        })?;
        if args.len() != def.sig.params.len() {
            return Err(fault(format!(
                "`{}` takes {} argument(s), {} given",
                callee.function,
                def.sig.params.len(),
                args.len()
            )));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(fault(format!(
                "call depth exceeded {MAX_CALL_DEPTH} calling `{}::{}`",
                callee.unit, callee.function
            )));
        }

        let mut frame = vec![Slot::Data(Value::Null); def.locals.max(args.len())];
        for (slot, arg) in frame.iter_mut().zip(args) {
            *slot = arg;
        }
        self.depth += 1;
        let result = settle(self.block(&mut frame, &def.body));
        self.depth -= 1;
        Ok(result?)
    }

    fn apply(&mut self, closure: &Closure, arg: Slot) -> Flow<Slot> {
        let mut frame = closure.frame.clone();
        let param = closure.lambda.param;
        match frame.get_mut(param) {
            Some(slot) => *slot = arg,
            None => return Err(fault(format!("closure parameter slot {param} out of range"))),
        }
        Ok(settle(self.eval(&mut frame, &closure.lambda.body))?)
    }

    fn block(&mut self, frame: &mut Vec<Slot>, block: &Block) -> Flow<Slot> {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Let(slot, init) => {
                    let value = self.eval(frame, init)?;
                    store(frame, *slot, value)?;
                }
                Stmt::Expr(expr) => {
                    self.eval(frame, expr)?;
                }
            }
        }
        match &block.tail {
            Some(tail) => self.eval(frame, tail),
            None => Ok(Slot::Data(Value::Null)),
        }
    }

    fn data(&mut self, frame: &mut Vec<Slot>, expr: &Expr) -> Flow<Value> {
        match self.eval(frame, expr)? {
            Slot::Data(v) => Ok(v),
            other => Err(fault(format!("expected a value, found `{}`", other.kind()))),
        }
    }

    fn int(&mut self, frame: &mut Vec<Slot>, expr: &Expr) -> Flow<i64> {
        let v = self.data(frame, expr)?;
        v.as_int()
            .ok_or_else(|| fault(format!("expected `i64`, found `{}`", v.type_name())))
    }

    fn bool(&mut self, frame: &mut Vec<Slot>, expr: &Expr) -> Flow<bool> {
        let v = self.data(frame, expr)?;
        v.as_bool()
            .ok_or_else(|| fault(format!("expected `bool`, found `{}`", v.type_name())))
    }

    fn eval(&mut self, frame: &mut Vec<Slot>, expr: &Expr) -> Flow<Slot> {
        let value = match expr {
            Expr::Lit(lit) => match lit {
                Lit::Unit => Value::Null,
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Int(i) => Value::Int(*i),
                Lit::Float(x) => Value::Float(*x),
                Lit::Str(s) => Value::Str(s.clone()),
            },
            Expr::Local(slot) => {
                return frame
                    .get(*slot)
                    .cloned()
                    .ok_or_else(|| fault(format!("local slot {slot} out of range")));
            }
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.data(frame, item)?);
                }
                Value::List(values)
            }
            Expr::Unary(op, operand) => unary(*op, self.data(frame, operand)?)?,
            Expr::Binary(BinOp::And, left, right) => {
                Value::Bool(self.bool(frame, left)? && self.bool(frame, right)?)
            }
            Expr::Binary(BinOp::Or, left, right) => {
                Value::Bool(self.bool(frame, left)? || self.bool(frame, right)?)
            }
            Expr::Binary(op, left, right) => {
                let l = self.data(frame, left)?;
                let r = self.data(frame, right)?;
                binary(*op, l, r)?
            }
            Expr::Cast(operand, ty) => cast(self.data(frame, operand)?, *ty)?,
            Expr::If(cond, then, otherwise) => {
                return if self.bool(frame, cond)? {
                    self.block(frame, then)
                } else if let Some(otherwise) = otherwise {
                    self.eval(frame, otherwise)
                } else {
                    Ok(Slot::Data(Value::Null))
                };
            }
            Expr::Block(block) => return self.block(frame, block),
            Expr::Call(callee, args) => {
                let mut slots = Vec::with_capacity(args.len());
                for arg in args {
                    slots.push(self.eval(frame, arg)?);
                }
                return self.call(callee, slots);
            }
            Expr::Method(method, receiver, args) => {
                let receiver = self.eval(frame, receiver)?;
                return self.method(frame, *method, receiver, args);
            }
            Expr::Closure(lambda) => {
                return Ok(Slot::Lambda(Arc::new(Closure {
                    frame: frame.clone(),
                    lambda: lambda.clone(),
                })));
            }
            Expr::Assign(slot, value) => {
                let value = self.eval(frame, value)?;
                store(frame, *slot, value)?;
                Value::Null
            }
            Expr::CompoundAssign(op, slot, value) => {
                let rhs = self.data(frame, value)?;
                let current = match frame.get(*slot) {
                    Some(Slot::Data(v)) => v.clone(),
                    Some(other) => {
                        return Err(fault(format!(
                            "cannot apply `{}=` to `{}`",
                            op.symbol(),
                            other.kind()
                        )));
                    }
                    None => return Err(fault(format!("local slot {slot} out of range"))),
                };
                let updated = binary(*op, current, rhs)?;
                store(frame, *slot, Slot::Data(updated))?;
                Value::Null
            }
            Expr::For(slot, iter, body) => {
                let items = match self.eval(frame, iter)? {
                    Slot::Stream(values) | Slot::Data(Value::List(values)) => values,
                    other => {
                        return Err(fault(format!("`{}` is not iterable", other.kind())));
                    }
                };
                for item in items {
                    store(frame, *slot, Slot::Data(item))?;
                    self.block(frame, body)?;
                }
                Value::Null
            }
            Expr::Return(value) => {
                let slot = match value {
                    Some(value) => self.eval(frame, value)?,
                    None => Slot::Data(Value::Null),
                };
                return Err(Unwind::Return(slot));
            }
        };
        Ok(Slot::Data(value))
    }

    fn method(
        &mut self,
        frame: &mut Vec<Slot>,
        method: Method,
        receiver: Slot,
        args: &[Expr],
    ) -> Flow<Slot> {
        if method.is_stream_op() {
            let Slot::Stream(items) = receiver else {
                return Err(fault(format!(
                    "no method named `{}` for `{}`",
                    method.name(),
                    receiver.kind()
                )));
            };
            let arg = args
                .first()
                .ok_or_else(|| fault(format!("`{}` takes one argument", method.name())))?;
            return Ok(Slot::Stream(self.stream_op(frame, method, items, arg)?));
        }

        let Slot::Data(value) = receiver else {
            return Err(fault(format!(
                "no method named `{}` for `{}`",
                method.name(),
                receiver.kind()
            )));
        };
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.data(frame, arg)?);
        }
        Ok(Slot::Data(data_method(method, value, values)?))
    }

    fn stream_op(
        &mut self,
        frame: &mut Vec<Slot>,
        method: Method,
        items: Vec<Value>,
        arg: &Expr,
    ) -> Flow<Vec<Value>> {
        match method {
            Method::Map | Method::Filter => {
                let Slot::Lambda(closure) = self.eval(frame, arg)? else {
                    return Err(fault(format!("`{}` expects a closure", method.name())));
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let result = self.apply(&closure, Slot::Data(item.clone()))?;
                    match (method, result) {
                        (Method::Map, Slot::Data(v)) => out.push(v),
                        (Method::Filter, Slot::Data(Value::Bool(keep))) => {
                            if keep {
                                out.push(item);
                            }
                        }
                        (_, other) => {
                            return Err(fault(format!(
                                "`{}` closure produced `{}`",
                                method.name(),
                                other.kind()
                            )));
                        }
                    }
                }
                Ok(out)
            }
            Method::Buffer => {
                let size = self.int(frame, arg)?;
                if size <= 0 {
                    return Err(fault(format!("buffer size must be positive, got {size}")));
                }
                Ok(items
                    .chunks(size as usize)
                    .map(|chunk| Value::List(chunk.to_vec()))
                    .collect())
            }
            Method::Take | Method::Skip => {
                let count = self.int(frame, arg)?;
                if count < 0 {
                    return Err(fault(format!(
                        "`{}` count must not be negative, got {count}",
                        method.name()
                    )));
                }
                let count = count as usize;
                Ok(if method == Method::Take {
                    items.into_iter().take(count).collect()
                } else {
                    items.into_iter().skip(count).collect()
                })
            }
            _ => Err(fault(format!("`{}` is not a stream operation", method.name()))),
        }
    }
}

fn store(frame: &mut [Slot], slot: usize, value: Slot) -> Flow<()> {
    match frame.get_mut(slot) {
        Some(target) => {
            *target = value;
            Ok(())
        }
        None => Err(fault(format!("local slot {slot} out of range"))),
    }
}

fn unary(op: UnOp, v: Value) -> Flow<Value> {
    match (op, v) {
        (UnOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| fault("attempt to negate with overflow")),
        (UnOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, v) => Err(fault(format!(
            "cannot apply `{}` to `{}`",
            if op == UnOp::Neg { "-" } else { "!" },
            v.type_name()
        ))),
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Flow<Value> {
    if op.is_arithmetic() {
        return arithmetic(op, l, r);
    }
    let ordering = match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (l.as_float(), r.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let result = match op {
        BinOp::Eq => ordering.map_or(l == r, |o| o.is_eq()),
        BinOp::Ne => ordering.map_or(l != r, |o| o.is_ne()),
        _ => {
            let Some(o) = ordering else {
                return Err(fault(format!(
                    "cannot compare `{}` with `{}`",
                    l.type_name(),
                    r.type_name()
                )));
            };
            match op {
                BinOp::Lt => o.is_lt(),
                BinOp::Le => o.is_le(),
                BinOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            }
        }
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinOp, l: Value, r: Value) -> Flow<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let (result, what) = match op {
                BinOp::Add => (a.checked_add(b), "add"),
                BinOp::Sub => (a.checked_sub(b), "subtract"),
                BinOp::Mul => (a.checked_mul(b), "multiply"),
                BinOp::Div if b == 0 => return Err(fault("attempt to divide by zero")),
                BinOp::Div => (a.checked_div(b), "divide"),
                BinOp::Rem if b == 0 => {
                    return Err(fault(
                        "attempt to calculate the remainder with a divisor of zero",
                    ));
                }
                _ => (a.checked_rem(b), "calculate the remainder"),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| fault(format!("attempt to {what} with overflow")))
        }
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => Ok(Value::Str(a + &b)),
        (l, r) => match (l.as_float(), r.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                _ => a % b,
            })),
            _ => Err(fault(format!(
                "cannot apply `{}` to `{}` and `{}`",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

fn cast(v: Value, ty: Ty) -> Flow<Value> {
    match (v, ty) {
        (Value::Int(i), Ty::Int) => Ok(Value::Int(i)),
        (Value::Float(x), Ty::Int) => Ok(Value::Int(x as i64)),
        (Value::Bool(b), Ty::Int) => Ok(Value::Int(i64::from(b))),
        (Value::Int(i), Ty::Float) => Ok(Value::Float(i as f64)),
        (Value::Float(x), Ty::Float) => Ok(Value::Float(x)),
        (Value::Bool(b), Ty::Float) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        (v, ty) => Err(fault(format!(
            "non-primitive cast: `{}` as `{ty}`",
            v.type_name()
        ))),
    }
}

fn data_method(method: Method, receiver: Value, args: Vec<Value>) -> Flow<Value> {
    let unsupported = |v: &Value| {
        fault(format!(
            "no method named `{}` for `{}`",
            method.name(),
            v.type_name()
        ))
    };
    let mut args = args.into_iter();
    let mut arg = || args.next().ok_or_else(|| fault(format!("`{}` is missing an argument", method.name())));

    Ok(match (method, receiver) {
        (Method::Get, Value::List(items)) => {
            let index = arg()?;
            let Some(i) = index.as_int() else {
                return Err(fault(format!(
                    "list index must be `i64`, found `{}`",
                    index.type_name()
                )));
            };
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| {
                    fault(format!(
                        "index out of bounds: the len is {} but the index is {i}",
                        items.len()
                    ))
                })?
        }
        (Method::Sum, Value::List(items)) => sum(&items)?,
        (Method::First, Value::List(items)) => items.first().cloned().unwrap_or(Value::Null),
        (Method::Last, Value::List(items)) => items.last().cloned().unwrap_or(Value::Null),
        (Method::Len, Value::List(items)) => Value::Int(items.len() as i64),
        (Method::Len, Value::Str(s)) => Value::Int(s.chars().count() as i64),
        (Method::IsEmpty, Value::List(items)) => Value::Bool(items.is_empty()),
        (Method::IsEmpty, Value::Str(s)) => Value::Bool(s.is_empty()),
        (Method::Contains, Value::List(items)) => {
            let needle = arg()?;
            Value::Bool(items.contains(&needle))
        }
        (Method::Contains, Value::Str(s)) => match arg()? {
            Value::Str(needle) => Value::Bool(s.contains(&needle)),
            other => return Err(unsupported(&other)),
        },
        (Method::ToUppercase, Value::Str(s)) => Value::Str(s.to_uppercase()),
        (Method::ToLowercase, Value::Str(s)) => Value::Str(s.to_lowercase()),
        (Method::Trim, Value::Str(s)) => Value::Str(s.trim().to_string()),
        (Method::ParseInt, Value::Int(i)) => Value::Int(i),
        (Method::ParseInt, Value::Str(s)) => {
            Value::Int(s.trim().parse::<i64>().map_err(|e| {
                fault(format!("cannot parse {s:?} as `i64`: {e}"))
            })?)
        }
        (Method::ParseFloat, Value::Str(s)) => {
            Value::Float(s.trim().parse::<f64>().map_err(|e| {
                fault(format!("cannot parse {s:?} as `f64`: {e}"))
            })?)
        }
        (Method::ParseFloat, v @ (Value::Int(_) | Value::Float(_))) => {
            Value::Float(v.as_float().unwrap_or_default())
        }
        (Method::Abs, Value::Int(i)) => Value::Int(
            i.checked_abs()
                .ok_or_else(|| fault("attempt to negate with overflow"))?,
        ),
        (Method::Abs, Value::Float(x)) => Value::Float(x.abs()),
        (Method::Min | Method::Max, l) => {
            let r = arg()?;
            let pick_left = match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => (a <= b) == (method == Method::Min),
                _ => match (l.as_float(), r.as_float()) {
                    (Some(a), Some(b)) => (a <= b) == (method == Method::Min),
                    _ => return Err(unsupported(&l)),
                },
            };
            let mixed = matches!((&l, &r), (Value::Float(_), _) | (_, Value::Float(_)));
            let picked = if pick_left { l } else { r };
            match picked {
                Value::Int(i) if mixed => Value::Float(i as f64),
                other => other,
            }
        }
        (Method::ToString, v) => Value::Str(v.to_string()),
        (_, v) => return Err(unsupported(&v)),
    })
}

fn sum(items: &[Value]) -> Flow<Value> {
    let mut total = Value::Int(0);
    for item in items {
        if !matches!(item, Value::Int(_) | Value::Float(_)) {
            return Err(fault(format!("cannot sum `{}`", item.type_name())));
        }
        total = arithmetic(BinOp::Add, total, item.clone())?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&i| Value::Int(i)).collect()
    }

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(
            arithmetic(BinOp::Add, Value::Int(2), Value::Float(0.5)).ok(),
            Some(Value::Float(2.5))
        );
        let Err(Unwind::Fault(e)) = arithmetic(BinOp::Div, Value::Int(1), Value::Int(0)) else {
            panic!("expected a fault");
        };
        assert_eq!(e.to_string(), "runtime error: attempt to divide by zero");
        assert!(arithmetic(BinOp::Add, Value::Int(i64::MAX), Value::Int(1)).is_err());
    }

    #[test]
    fn test_comparisons_mix_numbers() {
        assert_eq!(
            binary(BinOp::Lt, Value::Int(1), Value::Float(1.5)).ok(),
            Some(Value::Bool(true))
        );
        assert_eq!(
            binary(BinOp::Eq, Value::Int(2), Value::Float(2.0)).ok(),
            Some(Value::Bool(true))
        );
        assert!(binary(BinOp::Lt, Value::Bool(true), Value::Int(1)).is_err());
    }

    #[test]
    fn test_list_methods() {
        let list = Value::List(ints(&[1, 2, 3]));
        assert_eq!(
            data_method(Method::Sum, list.clone(), vec![]).ok(),
            Some(Value::Int(6))
        );
        assert_eq!(
            data_method(Method::Get, list.clone(), vec![Value::Int(2)]).ok(),
            Some(Value::Int(3))
        );
        let Err(Unwind::Fault(e)) = data_method(Method::Get, list, vec![Value::Int(3)]) else {
            panic!("expected a fault");
        };
        assert!(e.to_string().contains("the len is 3 but the index is 3"));
        assert_eq!(
            data_method(Method::First, Value::List(vec![]), vec![]).ok(),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_parse_and_cast() {
        assert_eq!(
            data_method(Method::ParseInt, Value::Str(" 42 ".into()), vec![]).ok(),
            Some(Value::Int(42))
        );
        assert!(data_method(Method::ParseInt, Value::Str("4x".into()), vec![]).is_err());
        assert_eq!(cast(Value::Float(2.9), Ty::Int).ok(), Some(Value::Int(2)));
        assert!(cast(Value::Str("1".into()), Ty::Int).is_err());
    }
}

//! The evaluator's value type and expression AST (§4.3).
//!
//! There is deliberately no lexer/parser here: a compiled lambda DSL is a
//! non-goal. An external compiler is expected to produce an [`Expr`] tree
//! (or a host program constructs one directly, as the tests below do);
//! this module only walks it.

use crate::error::{EngineError, Result};
use crate::model::point::FieldValue;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;

/// The five-kind union §4.3 evaluates over. `Time` only exists here; it
/// never appears in a [`FieldValue`] on the wire.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Time(_) => "time",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl TryFrom<FieldValue> for Value {
    type Error = EngineError;

    fn try_from(fv: FieldValue) -> Result<Self> {
        match fv {
            FieldValue::Int(i) => Ok(Value::Int(i)),
            FieldValue::Float(f) => Ok(Value::Float(f)),
            FieldValue::Str(s) => Ok(Value::Str(s)),
            FieldValue::Bool(b) => Ok(Value::Bool(b)),
            FieldValue::Null => Err(EngineError::data("eval", "cannot reference a null field")),
        }
    }
}

impl TryFrom<Value> for FieldValue {
    type Error = EngineError;

    fn try_from(v: Value) -> Result<Self> {
        match v {
            Value::Int(i) => Ok(FieldValue::Int(i)),
            Value::Float(f) => Ok(FieldValue::Float(f)),
            Value::Str(s) => Ok(FieldValue::Str(s)),
            Value::Bool(b) => Ok(FieldValue::Bool(b)),
            Value::Time(_) => Err(EngineError::data("eval", "cannot assign a time value to a field")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

/// A built-in stateful function. The function library is intentionally
/// small: the two shapes §4.3 calls out by name ("counters, previous-value
/// functions").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Returns the value from the previous evaluation at this call site
    /// for this group (the current value, on first evaluation).
    Previous,
    /// Returns a 1-based count of evaluations of this call site for this
    /// group.
    Count,
}

/// An expression tree. `call_site` on [`Expr::Call`] is a small integer
/// assigned at construction time, unique within one [`super::scope::CompiledExpr`],
/// used to key that call's private state.
#[derive(Debug, Clone)]
pub enum Expr {
    Lit(LitValue),
    Ref(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Regex match (`true`) / non-match (`false`) of a string expression
    /// against a compiled pattern.
    Regex { value: Box<Expr>, pattern: Regex, negate: bool },
    Call { kind: CallKind, call_site: usize, args: Vec<Expr> },
}

/// A literal, storable inside an `Expr` (unlike `Value`, which also
/// carries runtime state like `Time` comparisons against `now`).
#[derive(Debug, Clone)]
pub enum LitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl From<LitValue> for Value {
    fn from(l: LitValue) -> Self {
        match l {
            LitValue::Int(i) => Value::Int(i),
            LitValue::Float(f) => Value::Float(f),
            LitValue::Str(s) => Value::Str(s),
            LitValue::Bool(b) => Value::Bool(b),
        }
    }
}

/// Per-group mutable state for stateful call sites, keyed by `call_site`.
#[derive(Debug, Default, Clone)]
pub struct CallState {
    previous: std::collections::HashMap<usize, Value>,
    pub(crate) counts: std::collections::HashMap<usize, i64>,
}

use super::scope::Scope;

/// Evaluate `expr` against `scope`, threading `calls` for stateful
/// built-ins. Type errors surface as [`EngineError::Data`] and never
/// panic, per §7's contract that a bad expression drops the point rather
/// than killing the task.
pub fn eval(expr: &Expr, scope: &Scope, calls: &mut CallState) -> Result<Value> {
    match expr {
        Expr::Lit(l) => Ok(l.clone().into()),
        Expr::Ref(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::data("eval", format!("no field or tag exists for {name}"))),
        Expr::Unary(op, inner) => {
            let v = eval(inner, scope, calls)?;
            apply_unary(*op, v)
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, scope, calls)?;
            let r = eval(rhs, scope, calls)?;
            apply_binary(*op, l, r)
        }
        Expr::Regex { value, pattern, negate } => {
            let v = eval(value, scope, calls)?;
            let s = v
                .as_str()
                .ok_or_else(|| EngineError::data("eval", format!("expected string, got {}", v.type_name())))?;
            let matched = pattern.is_match(s);
            Ok(Value::Bool(matched != *negate))
        }
        Expr::Call { kind, call_site, args } => eval_call(*kind, *call_site, args, scope, calls),
    }
}

fn eval_call(kind: CallKind, call_site: usize, args: &[Expr], scope: &Scope, calls: &mut CallState) -> Result<Value> {
    match kind {
        CallKind::Previous => {
            let arg = args
                .first()
                .ok_or_else(|| EngineError::data("eval", "previous() requires one argument"))?;
            let current = eval(arg, scope, calls)?;
            let prev = calls.previous.insert(call_site, current.clone());
            Ok(prev.unwrap_or(current))
        }
        CallKind::Count => {
            let n = calls.counts.entry(call_site).or_insert(0);
            *n += 1;
            Ok(Value::Int(*n))
        }
    }
}

fn apply_unary(op: UnaryOp, v: Value) -> Result<Value> {
    match (op, &v) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        _ => Err(EngineError::data("eval", format!("cannot apply {op:?} to {}", v.type_name()))),
    }
}

fn apply_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    use BinaryOp::*;
    match op {
        And | Or => {
            let (lb, rb) = (
                l.as_bool().ok_or_else(|| type_err(&l))?,
                r.as_bool().ok_or_else(|| type_err(&r))?,
            );
            Ok(Value::Bool(if op == And { lb && rb } else { lb || rb }))
        }
        Eq | Neq | Lt | Lte | Gt | Gte => compare(op, l, r),
        Add | Sub | Mul | Div | Mod => arithmetic(op, l, r),
    }
}

fn type_err(v: &Value) -> EngineError {
    EngineError::data("eval", format!("expected bool, got {}", v.type_name()))
}

fn compare(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    use BinaryOp::*;
    let ordering = match (&l, &r) {
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
        (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
        _ => {
            let (a, b) = (
                l.as_f64().ok_or_else(|| EngineError::data("eval", format!("cannot compare {}", l.type_name())))?,
                r.as_f64().ok_or_else(|| EngineError::data("eval", format!("cannot compare {}", r.type_name())))?,
            );
            a.partial_cmp(&b)
        }
    };
    let ordering = ordering.ok_or_else(|| EngineError::data("eval", "incomparable values"))?;
    let result = match op {
        Eq => ordering.is_eq(),
        Neq => !ordering.is_eq(),
        Lt => ordering.is_lt(),
        Lte => ordering.is_le(),
        Gt => ordering.is_gt(),
        Gte => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    use BinaryOp::*;
    if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
        if op == Add {
            return Ok(Value::Str(format!("{a}{b}")));
        }
    }
    let (a, b) = (
        l.as_f64().ok_or_else(|| EngineError::data("eval", format!("cannot use {} in arithmetic", l.type_name())))?,
        r.as_f64().ok_or_else(|| EngineError::data("eval", format!("cannot use {} in arithmetic", r.type_name())))?,
    );
    let both_int = matches!((&l, &r), (Value::Int(_), Value::Int(_)));
    let result = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => {
            if b == 0.0 {
                return Err(EngineError::data("eval", "division by zero"));
            }
            a / b
        }
        Mod => a % b,
        _ => unreachable!(),
    };
    if both_int && op != Div {
        Ok(Value::Int(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::scope::Scope;

    fn scope_with(pairs: &[(&str, Value)]) -> Scope {
        let mut s = Scope::with_capacity(pairs.len());
        for (k, v) in pairs {
            s.insert(k.to_string(), v.clone());
        }
        s
    }

    #[test]
    fn division_computes_a_rate() {
        let expr = Expr::Binary(
            BinaryOp::Div,
            Box::new(Expr::Ref("errors".into())),
            Box::new(Expr::Ref("total".into())),
        );
        let scope = scope_with(&[("errors", Value::Int(5)), ("total", Value::Int(100))]);
        let mut calls = CallState::default();
        let v = eval(&expr, &scope, &mut calls).unwrap();
        assert!(matches!(v, Value::Float(f) if (f - 0.05).abs() < 1e-9));
    }

    #[test]
    fn division_by_zero_is_a_data_error_not_a_panic() {
        let expr = Expr::Binary(BinaryOp::Div, Box::new(Expr::Lit(LitValue::Int(1))), Box::new(Expr::Lit(LitValue::Int(0))));
        let scope = Scope::with_capacity(0);
        let mut calls = CallState::default();
        assert!(eval(&expr, &scope, &mut calls).is_err());
    }

    #[test]
    fn previous_returns_current_value_on_first_call() {
        let expr = Expr::Call { kind: CallKind::Previous, call_site: 0, args: vec![Expr::Ref("x".into())] };
        let mut calls = CallState::default();
        let s1 = scope_with(&[("x", Value::Int(1))]);
        assert!(matches!(eval(&expr, &s1, &mut calls).unwrap(), Value::Int(1)));
        let s2 = scope_with(&[("x", Value::Int(2))]);
        assert!(matches!(eval(&expr, &s2, &mut calls).unwrap(), Value::Int(1)));
    }

    #[test]
    fn count_increments_per_call_site() {
        let expr = Expr::Call { kind: CallKind::Count, call_site: 0, args: vec![] };
        let mut calls = CallState::default();
        let scope = Scope::with_capacity(0);
        assert!(matches!(eval(&expr, &scope, &mut calls).unwrap(), Value::Int(1)));
        assert!(matches!(eval(&expr, &scope, &mut calls).unwrap(), Value::Int(2)));
    }

    #[test]
    fn undefined_reference_is_a_data_error() {
        let expr = Expr::Ref("missing".into());
        let scope = Scope::with_capacity(0);
        let mut calls = CallState::default();
        assert!(eval(&expr, &scope, &mut calls).is_err());
    }
}

//! The expression evaluator (§4.3): an `Expr` AST, a scope pool, and a
//! per-group compiled-expression cache. Lambda *syntax* is out of scope;
//! `ops::eval_op` and friends build `Expr` trees directly or receive them
//! from an external compiler.

pub mod expr;
pub mod scope;

pub use expr::{eval, BinaryOp, CallKind, CallState, Expr, LitValue, UnaryOp, Value};
pub use scope::{fill_scope, CompiledExpr, GroupExpressionCache, Scope, ScopePool};

// elspeth-expr/src/ast.rs
// ============================================================================
// Module: Abstract Syntax Tree
// Description: The parsed representation of a gate predicate expression.
// Purpose: Give the evaluator a tree with no remaining unknowns — every
//          attribute path has already been checked against the gate's
//          declared projection and every function name against its registry.
// Dependencies: serde_json::Value
// ============================================================================

use serde_json::Value;

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// A parsed gate predicate expression.
///
/// # Invariants
/// Every [`Expr::Attribute`] path was checked, at parse time, against the
/// caller-supplied projection; every [`Expr::Call`] name was checked against
/// the caller-supplied function registry. The evaluator never encounters an
/// attribute or function it cannot resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value (string, number, boolean, or null).
    Literal(Value),
    /// A dotted path into the row, e.g. `user.age`.
    Attribute(Vec<String>),
    /// `not expr`
    Not(Box<Expr>),
    /// `lhs and rhs`
    And(Box<Expr>, Box<Expr>),
    /// `lhs or rhs`
    Or(Box<Expr>, Box<Expr>),
    /// `lhs op rhs`
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    /// `lhs in rhs`
    In(Box<Expr>, Box<Expr>),
    /// `len(expr)`
    Len(Box<Expr>),
    /// A call to a registered predicate function.
    Call(String, Vec<Expr>),
}

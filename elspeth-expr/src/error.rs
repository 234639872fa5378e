// elspeth-expr/src/error.rs
// ============================================================================
// Module: DSL Errors
// Description: Parse- and evaluation-time errors for the gate predicate
//              language.
// Purpose: Give every rejection a byte-offset position so a config-time
//          `ConfigError` can point at the exact offending character.
// Dependencies: std::fmt
// ============================================================================

//! ## Overview
//! Parse errors and evaluation errors are kept separate: everything an
//! `EvalError` variant could report is something the parser already rejects
//! ahead of time for any row shape declared in the gate's projection. The
//! variants exist purely because a row at evaluation time can still disagree
//! with the shape the projection promised.

use std::fmt;

/// An error raised while lexing or parsing a gate predicate expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DslError {
    /// The lexer encountered a byte that starts no valid token.
    UnexpectedCharacter {
        /// The offending character.
        found: char,
        /// Byte offset of the offending character.
        position: usize,
    },
    /// A string literal was never closed.
    UnterminatedString {
        /// Byte offset where the string literal began.
        position: usize,
    },
    /// The parser expected one of a set of tokens but found another.
    UnexpectedToken {
        /// Human-readable description of what was expected.
        expected: &'static str,
        /// Human-readable description of what was found.
        found: String,
        /// Byte offset of the offending token.
        position: usize,
    },
    /// Input ended where a token was still expected.
    UnexpectedEof {
        /// Human-readable description of what was expected.
        expected: &'static str,
    },
    /// An identifier referenced an attribute outside the gate's declared
    /// projection.
    UnknownAttribute {
        /// The offending attribute path.
        path: String,
        /// Byte offset of the offending identifier.
        position: usize,
    },
    /// A function call referenced a name with no registered implementation.
    UnknownFunction {
        /// The offending function name.
        name: String,
        /// Byte offset of the offending identifier.
        position: usize,
    },
    /// Expression nesting exceeded `MAX_EXPR_NESTING`.
    NestingTooDeep {
        /// The configured limit that was exceeded.
        limit: usize,
    },
    /// Source length exceeded `MAX_EXPR_INPUT_BYTES`.
    InputTooLarge {
        /// The input's length, in bytes.
        len: usize,
        /// The configured limit that was exceeded.
        limit: usize,
    },
}

impl fmt::Display for DslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedCharacter { found, position } => {
                write!(f, "unexpected character '{found}' at byte {position}")
            }
            Self::UnterminatedString { position } => {
                write!(f, "unterminated string literal starting at byte {position}")
            }
            Self::UnexpectedToken { expected, found, position } => {
                write!(f, "expected {expected}, found {found} at byte {position}")
            }
            Self::UnexpectedEof { expected } => {
                write!(f, "expected {expected}, found end of input")
            }
            Self::UnknownAttribute { path, position } => {
                write!(f, "attribute `{path}` is not in the declared projection (at byte {position})")
            }
            Self::UnknownFunction { name, position } => {
                write!(f, "no registered function named `{name}` (at byte {position})")
            }
            Self::NestingTooDeep { limit } => {
                write!(f, "expression nesting exceeds the limit of {limit}")
            }
            Self::InputTooLarge { len, limit } => {
                write!(f, "expression source is {len} bytes, exceeding the limit of {limit}")
            }
        }
    }
}

impl std::error::Error for DslError {}

/// An error raised while evaluating an already-parsed expression against a
/// row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A comparison or membership test was attempted between incompatible
    /// JSON value kinds (e.g. a string compared numerically).
    TypeMismatch {
        /// Description of the offending operation.
        operation: &'static str,
    },
    /// A registered function was invoked with the wrong argument count.
    ArityMismatch {
        /// The function's name.
        name: String,
        /// The number of arguments expected.
        expected: usize,
        /// The number of arguments given.
        found: usize,
    },
    /// A registered function raised its own error during evaluation.
    FunctionFailed {
        /// The function's name.
        name: String,
        /// The function's error message.
        message: String,
    },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { operation } => write!(f, "type mismatch in {operation}"),
            Self::ArityMismatch { name, expected, found } => {
                write!(f, "function `{name}` expects {expected} argument(s), got {found}")
            }
            Self::FunctionFailed { name, message } => {
                write!(f, "function `{name}` failed: {message}")
            }
        }
    }
}

impl std::error::Error for EvalError {}

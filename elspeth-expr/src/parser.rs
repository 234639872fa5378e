// elspeth-expr/src/parser.rs
// ============================================================================
// Module: Parser
// Description: Recursive-descent parser producing an `Expr` AST, rejecting
//              anything outside the restricted grammar at parse time.
// Purpose: Make "reject unknown node kinds at parse time" (§4.3) the only
//          place attribute and function legality is checked.
// Dependencies: crate::{ast, error, lexer}
// ============================================================================

use std::collections::BTreeSet;

use serde_json::Value;

use crate::ast::CompareOp;
use crate::ast::Expr;
use crate::error::DslError;
use crate::lexer::Lexer;
use crate::lexer::SpannedToken;
use crate::lexer::Token;

/// Maximum nesting depth a parsed expression may reach. Guards the recursive
/// descent against stack overflow on adversarial configuration input.
pub const MAX_EXPR_NESTING: usize = 64;

/// Maximum length, in bytes, of expression source accepted by [`parse`].
pub const MAX_EXPR_INPUT_BYTES: usize = 8192;

/// Parses `source` into an [`Expr`], rejecting any attribute path not in
/// `allowed_attributes` and any function call not in `allowed_functions`.
///
/// # Errors
///
/// Returns [`DslError`] on any lexical, syntactic, or projection/registry
/// violation. Nothing about the row being evaluated later can turn a
/// successfully parsed expression invalid.
pub fn parse(
    source: &str,
    allowed_attributes: &BTreeSet<String>,
    allowed_functions: &BTreeSet<String>,
) -> Result<Expr, DslError> {
    if source.len() > MAX_EXPR_INPUT_BYTES {
        return Err(DslError::InputTooLarge { len: source.len(), limit: MAX_EXPR_INPUT_BYTES });
    }
    let tokens = Lexer::new(source).lex()?;
    let mut parser = Parser { tokens, pos: 0, depth: 0, allowed_attributes, allowed_functions };
    let expr = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<SpannedToken<'a>>,
    pos: usize,
    depth: usize,
    allowed_attributes: &'a BTreeSet<String>,
    allowed_functions: &'a BTreeSet<String>,
}

impl<'a> Parser<'a> {
    fn with_nesting<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, DslError>) -> Result<T, DslError> {
        self.depth += 1;
        if self.depth > MAX_EXPR_NESTING {
            return Err(DslError::NestingTooDeep { limit: MAX_EXPR_NESTING });
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn current(&self) -> SpannedToken<'a> {
        self.tokens[self.pos]
    }

    fn advance(&mut self) -> SpannedToken<'a> {
        let tok = self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_eof(&self) -> Result<(), DslError> {
        match self.current().token {
            Token::Eof => Ok(()),
            other => Err(DslError::UnexpectedToken {
                expected: "end of input",
                found: format!("{other:?}"),
                position: self.current().position,
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, DslError> {
        self.with_nesting(|p| {
            let mut lhs = p.parse_and()?;
            while matches!(p.current().token, Token::Or) {
                p.advance();
                let rhs = p.parse_and()?;
                lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, DslError> {
        self.with_nesting(|p| {
            let mut lhs = p.parse_unary()?;
            while matches!(p.current().token, Token::And) {
                p.advance();
                let rhs = p.parse_unary()?;
                lhs = Expr::And(Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, DslError> {
        self.with_nesting(|p| {
            if matches!(p.current().token, Token::Not) {
                p.advance();
                let inner = p.parse_unary()?;
                Ok(Expr::Not(Box::new(inner)))
            } else {
                p.parse_comparison()
            }
        })
    }

    fn parse_comparison(&mut self) -> Result<Expr, DslError> {
        self.with_nesting(|p| {
            let lhs = p.parse_primary()?;
            let op = match p.current().token {
                Token::Eq => Some(CompareOp::Eq),
                Token::Ne => Some(CompareOp::Ne),
                Token::Lt => Some(CompareOp::Lt),
                Token::Le => Some(CompareOp::Le),
                Token::Gt => Some(CompareOp::Gt),
                Token::Ge => Some(CompareOp::Ge),
                Token::In => {
                    p.advance();
                    let rhs = p.parse_primary()?;
                    return Ok(Expr::In(Box::new(lhs), Box::new(rhs)));
                }
                _ => None,
            };
            if let Some(op) = op {
                p.advance();
                let rhs = p.parse_primary()?;
                Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)))
            } else {
                Ok(lhs)
            }
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, DslError> {
        self.with_nesting(|p| {
            let spanned = p.current();
            match spanned.token {
                Token::LParen => {
                    p.advance();
                    let inner = p.parse_or()?;
                    p.expect(Token::RParen, "')'")?;
                    Ok(inner)
                }
                Token::LBracket => p.parse_array_literal(),
                Token::True => {
                    p.advance();
                    Ok(Expr::Literal(Value::Bool(true)))
                }
                Token::False => {
                    p.advance();
                    Ok(Expr::Literal(Value::Bool(false)))
                }
                Token::Null => {
                    p.advance();
                    Ok(Expr::Literal(Value::Null))
                }
                Token::Str(text) => {
                    p.advance();
                    Ok(Expr::Literal(Value::String(text.to_string())))
                }
                Token::Number(text) => {
                    p.advance();
                    p.parse_number_literal(text, spanned.position)
                }
                Token::Len => {
                    p.advance();
                    p.expect(Token::LParen, "'('")?;
                    let inner = p.parse_or()?;
                    p.expect(Token::RParen, "')'")?;
                    Ok(Expr::Len(Box::new(inner)))
                }
                Token::Ident(name) => p.parse_ident_or_call(name, spanned.position),
                other => Err(DslError::UnexpectedToken {
                    expected: "a literal, attribute, or '('",
                    found: format!("{other:?}"),
                    position: spanned.position,
                }),
            }
        })
    }

    fn parse_array_literal(&mut self) -> Result<Expr, DslError> {
        self.advance();
        let mut items = Vec::new();
        if !matches!(self.current().token, Token::RBracket) {
            loop {
                items.push(self.parse_or()?);
                if matches!(self.current().token, Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RBracket, "']'")?;
        Ok(Expr::Literal(Value::Array(
            items
                .into_iter()
                .map(|expr| match expr {
                    Expr::Literal(v) => v,
                    _ => Value::Null,
                })
                .collect(),
        )))
    }

    fn parse_number_literal(&self, text: &str, position: usize) -> Result<Expr, DslError> {
        let parsed: f64 = text.parse().map_err(|_| DslError::UnexpectedToken {
            expected: "a well-formed number",
            found: text.to_string(),
            position,
        })?;
        let value = serde_json::Number::from_f64(parsed)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        Ok(Expr::Literal(value))
    }

    fn parse_ident_or_call(&mut self, name: &str, position: usize) -> Result<Expr, DslError> {
        self.advance();
        if matches!(self.current().token, Token::LParen) {
            return self.parse_function_call(name, position);
        }
        let mut path = vec![name.to_string()];
        while matches!(self.current().token, Token::Dot) {
            self.advance();
            match self.current().token {
                Token::Ident(segment) => {
                    path.push(segment.to_string());
                    self.advance();
                }
                other => {
                    return Err(DslError::UnexpectedToken {
                        expected: "an attribute name",
                        found: format!("{other:?}"),
                        position: self.current().position,
                    });
                }
            }
        }
        let joined = path.join(".");
        if !self.allowed_attributes.contains(&joined) {
            return Err(DslError::UnknownAttribute { path: joined, position });
        }
        Ok(Expr::Attribute(path))
    }

    fn parse_function_call(&mut self, name: &str, position: usize) -> Result<Expr, DslError> {
        if !self.allowed_functions.contains(name) {
            return Err(DslError::UnknownFunction { name: name.to_string(), position });
        }
        self.advance();
        let mut args = Vec::new();
        if !matches!(self.current().token, Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if matches!(self.current().token, Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(Expr::Call(name.to_string(), args))
    }

    fn expect(&mut self, expected_token: Token<'a>, expected: &'static str) -> Result<(), DslError> {
        if self.current().token == expected_token {
            self.advance();
            Ok(())
        } else {
            Err(DslError::UnexpectedToken {
                expected,
                found: format!("{:?}", self.current().token),
                position: self.current().position,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::parse;
    use crate::ast::CompareOp;
    use crate::ast::Expr;
    use crate::error::DslError;

    fn attrs(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_simple_comparison() {
        let expr = parse("age >= 18", &attrs(&["age"]), &BTreeSet::new()).expect("parse");
        assert!(matches!(expr, Expr::Compare(_, CompareOp::Ge, _)));
    }

    #[test]
    fn parses_and_or_not_precedence() {
        let expr = parse(
            "not active and (tier == \"gold\" or tier == \"platinum\")",
            &attrs(&["active", "tier"]),
            &BTreeSet::new(),
        )
        .expect("parse");
        assert!(matches!(expr, Expr::And(_, _)));
    }

    #[test]
    fn rejects_unknown_attribute() {
        let err = parse("unknown_field == 1", &attrs(&["age"]), &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, DslError::UnknownAttribute { .. }));
    }

    #[test]
    fn rejects_unknown_function() {
        let err = parse("sneaky(1)", &BTreeSet::new(), &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, DslError::UnknownFunction { .. }));
    }

    #[test]
    fn rejects_deeply_nested_input() {
        let mut source = String::new();
        for _ in 0..(super::MAX_EXPR_NESTING + 5) {
            source.push('(');
        }
        source.push_str("true");
        for _ in 0..(super::MAX_EXPR_NESTING + 5) {
            source.push(')');
        }
        let err = parse(&source, &BTreeSet::new(), &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, DslError::NestingTooDeep { .. }));
    }

    #[test]
    fn parses_membership_and_len() {
        let expr = parse(
            "\"x\" in tags and len(tags) > 0",
            &attrs(&["tags"]),
            &BTreeSet::new(),
        )
        .expect("parse");
        assert!(matches!(expr, Expr::And(_, _)));
    }
}

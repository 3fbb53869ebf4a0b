//! Selector filter engine.
//!
//! Compiles SQL-92-like boolean expressions over notification attributes into
//! an immutable predicate tree, built once per subscription and evaluated per
//! record. The supported subset is what management subscribers actually use:
//!
//! - equality `=` and inequality `<>`
//! - `AND` / `OR` (case-insensitive), parentheses
//! - string literals in single quotes (`''` escapes a quote), integer and
//!   `TRUE`/`FALSE` literals, attribute identifiers
//!
//! Evaluation follows selector null semantics: a comparison involving an
//! attribute missing from the record is false (for `<>` too), as is a
//! comparison between values of different types. Evaluation is pure; the same
//! filter against the same record always yields the same result.

use crate::error::{BrokerError, Result};
use crate::notification::{AttrMap, AttrValue};

/// A compiled, immutable filter predicate.
///
/// An empty or blank source expression compiles to the always-true filter.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    source: String,
    predicate: Predicate,
}

#[derive(Debug, Clone)]
enum Predicate {
    True,
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
}

#[derive(Debug, Clone)]
enum Operand {
    Attribute(String),
    Literal(AttrValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
}

impl CompiledFilter {
    /// Compile a selector expression.
    ///
    /// Fails with [`BrokerError::FilterSyntax`] on malformed input: unbalanced
    /// quotes or parentheses, unknown operators, a missing right-hand side.
    pub fn compile(expression: &str) -> Result<Self> {
        if expression.trim().is_empty() {
            return Ok(Self {
                source: String::new(),
                predicate: Predicate::True,
            });
        }

        let tokens = lex(expression)?;
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(BrokerError::FilterSyntax(format!(
                "unexpected trailing input at token {}",
                parser.pos + 1
            )));
        }

        Ok(Self {
            source: expression.to_string(),
            predicate,
        })
    }

    /// Original expression this filter was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the predicate against an attribute map.
    pub fn matches(&self, attributes: &AttrMap) -> bool {
        eval(&self.predicate, attributes)
    }
}

fn eval(predicate: &Predicate, attributes: &AttrMap) -> bool {
    match predicate {
        Predicate::True => true,
        Predicate::And(a, b) => eval(a, attributes) && eval(b, attributes),
        Predicate::Or(a, b) => eval(a, attributes) || eval(b, attributes),
        Predicate::Compare { lhs, op, rhs } => {
            let (Some(left), Some(right)) = (resolve(lhs, attributes), resolve(rhs, attributes))
            else {
                // Missing attribute: the whole comparison is false, <> included
                return false;
            };
            match compare(left, right) {
                Some(equal) => match op {
                    CmpOp::Eq => equal,
                    CmpOp::Ne => !equal,
                },
                // Type mismatch never matches, it is not an error
                None => false,
            }
        }
    }
}

fn resolve<'a>(operand: &'a Operand, attributes: &'a AttrMap) -> Option<&'a AttrValue> {
    match operand {
        Operand::Attribute(name) => attributes.get(name).filter(|v| !v.is_null()),
        Operand::Literal(value) => Some(value),
    }
}

/// `Some(equal)` when the values are comparable, `None` on type mismatch.
fn compare(a: &AttrValue, b: &AttrValue) -> Option<bool> {
    match (a, b) {
        (AttrValue::Str(x), AttrValue::Str(y)) => Some(x == y),
        (AttrValue::Int(x), AttrValue::Int(y)) => Some(x == y),
        (AttrValue::Bool(x), AttrValue::Bool(y)) => Some(x == y),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Bool(bool),
    Eq,
    Ne,
    And,
    Or,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'>').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    return Err(BrokerError::FilterSyntax(
                        "unknown operator '<', expected '<>'".to_string(),
                    ));
                }
            }
            '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            // '' inside a literal is an escaped quote
                            if chars.next_if_eq(&'\'').is_some() {
                                literal.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(ch) => literal.push(ch),
                        None => {
                            return Err(BrokerError::FilterSyntax(
                                "unterminated string literal".to_string(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut number = String::new();
                number.push(c);
                chars.next();
                while let Some(d) = chars.next_if(|d| d.is_ascii_digit()) {
                    number.push(d);
                }
                let value = number.parse::<i64>().map_err(|_| {
                    BrokerError::FilterSyntax(format!("invalid integer literal '{}'", number))
                })?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut word = String::new();
                while let Some(ch) =
                    chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '.' || *ch == '$')
                {
                    word.push(ch);
                }
                match word.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "TRUE" => tokens.push(Token::Bool(true)),
                    "FALSE" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => {
                return Err(BrokerError::FilterSyntax(format!(
                    "unexpected character '{}'",
                    other
                )));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // or := and (OR and)*
    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // and := factor (AND factor)*
    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_factor()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_factor()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // factor := '(' or ')' | comparison
    fn parse_factor(&mut self) -> Result<Predicate> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.next();
            let inner = self.parse_or()?;
            match self.next() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(BrokerError::FilterSyntax(
                    "unbalanced parentheses".to_string(),
                )),
            }
        } else {
            self.parse_comparison()
        }
    }

    // comparison := operand ('=' | '<>') operand
    fn parse_comparison(&mut self) -> Result<Predicate> {
        let lhs = self.parse_operand()?;
        let op = match self.next() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(other) => {
                return Err(BrokerError::FilterSyntax(format!(
                    "expected '=' or '<>', found {:?}",
                    other
                )));
            }
            None => {
                return Err(BrokerError::FilterSyntax(
                    "expected comparison operator, found end of expression".to_string(),
                ));
            }
        };
        let rhs = self.parse_operand().map_err(|_| {
            BrokerError::FilterSyntax("missing right-hand side of comparison".to_string())
        })?;
        Ok(Predicate::Compare { lhs, op, rhs })
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Operand::Attribute(name)),
            Some(Token::Str(s)) => Ok(Operand::Literal(AttrValue::Str(s))),
            Some(Token::Int(i)) => Ok(Operand::Literal(AttrValue::Int(i))),
            Some(Token::Bool(b)) => Ok(Operand::Literal(AttrValue::Bool(b))),
            Some(other) => Err(BrokerError::FilterSyntax(format!(
                "expected attribute or literal, found {:?}",
                other
            ))),
            None => Err(BrokerError::FilterSyntax(
                "expected attribute or literal, found end of expression".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::keys;

    fn attrs(pairs: &[(&str, AttrValue)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_empty_expression_is_always_true() {
        let filter = CompiledFilter::compile("").unwrap();
        assert!(filter.matches(&AttrMap::new()));

        let filter = CompiledFilter::compile("   ").unwrap();
        assert!(filter.matches(&attrs(&[(keys::ADDRESS, "a".into())])));
    }

    #[test]
    fn test_string_equality() {
        let filter = CompiledFilter::compile("_ROUTING_NAME = 'orders'").unwrap();
        assert!(filter.matches(&attrs(&[(keys::ROUTING_NAME, "orders".into())])));
        assert!(!filter.matches(&attrs(&[(keys::ROUTING_NAME, "payments".into())])));
    }

    #[test]
    fn test_inequality_with_missing_attribute_is_false() {
        // JMS null semantics: <> against an absent attribute does not match
        let filter = CompiledFilter::compile("_ROUTING_NAME <> 'orders'").unwrap();
        assert!(!filter.matches(&AttrMap::new()));
        assert!(filter.matches(&attrs(&[(keys::ROUTING_NAME, "payments".into())])));
        assert!(!filter.matches(&attrs(&[(keys::ROUTING_NAME, "orders".into())])));
    }

    #[test]
    fn test_null_attribute_behaves_as_missing() {
        let filter = CompiledFilter::compile("_USER = 'admin'").unwrap();
        assert!(!filter.matches(&attrs(&[(keys::USER, AttrValue::Null)])));
    }

    #[test]
    fn test_and_or_combinators() {
        let filter =
            CompiledFilter::compile("_ROUTING_NAME = 'q1' AND _ADDRESS = 'a1'").unwrap();
        assert!(filter.matches(&attrs(&[
            (keys::ROUTING_NAME, "q1".into()),
            (keys::ADDRESS, "a1".into()),
        ])));
        assert!(!filter.matches(&attrs(&[
            (keys::ROUTING_NAME, "q1".into()),
            (keys::ADDRESS, "a2".into()),
        ])));

        let filter = CompiledFilter::compile("_ADDRESS = 'a1' OR _ADDRESS = 'a2'").unwrap();
        assert!(filter.matches(&attrs(&[(keys::ADDRESS, "a2".into())])));
        assert!(!filter.matches(&attrs(&[(keys::ADDRESS, "a3".into())])));
    }

    #[test]
    fn test_parentheses_and_precedence() {
        // AND binds tighter than OR
        let filter =
            CompiledFilter::compile("_ADDRESS = 'a' OR _ADDRESS = 'b' AND _USER = 'u'").unwrap();
        assert!(filter.matches(&attrs(&[(keys::ADDRESS, "a".into())])));
        assert!(!filter.matches(&attrs(&[(keys::ADDRESS, "b".into())])));

        let grouped =
            CompiledFilter::compile("(_ADDRESS = 'a' OR _ADDRESS = 'b') AND _USER = 'u'").unwrap();
        assert!(!grouped.matches(&attrs(&[(keys::ADDRESS, "a".into())])));
        assert!(grouped.matches(&attrs(&[
            (keys::ADDRESS, "a".into()),
            (keys::USER, "u".into()),
        ])));
    }

    #[test]
    fn test_integer_and_boolean_literals() {
        let filter = CompiledFilter::compile("_CONSUMER_COUNT = 1").unwrap();
        assert!(filter.matches(&attrs(&[(keys::CONSUMER_COUNT, 1i64.into())])));
        assert!(!filter.matches(&attrs(&[(keys::CONSUMER_COUNT, 2i64.into())])));

        let filter = CompiledFilter::compile("durable = TRUE").unwrap();
        assert!(filter.matches(&attrs(&[("durable", true.into())])));
    }

    #[test]
    fn test_type_mismatch_is_false_not_error() {
        let filter = CompiledFilter::compile("_CONSUMER_COUNT = '1'").unwrap();
        assert!(!filter.matches(&attrs(&[(keys::CONSUMER_COUNT, 1i64.into())])));
    }

    #[test]
    fn test_quote_escaping() {
        let filter = CompiledFilter::compile("_USER = 'o''brien'").unwrap();
        assert!(filter.matches(&attrs(&[(keys::USER, "o'brien".into())])));
    }

    #[test]
    fn test_syntax_errors() {
        for expr in [
            "_ROUTING_NAME = 'unterminated",
            "_ROUTING_NAME =",
            "_ROUTING_NAME < 'x'",
            "(_ROUTING_NAME = 'x'",
            "_ROUTING_NAME = 'x' extra garbage",
            "= 'x'",
        ] {
            let err = CompiledFilter::compile(expr).unwrap_err();
            assert!(
                matches!(err, BrokerError::FilterSyntax(_)),
                "expected syntax error for {:?}",
                expr
            );
        }
    }

    #[test]
    fn test_compile_is_deterministic() {
        let record = attrs(&[
            (keys::ROUTING_NAME, "q1".into()),
            (keys::ADDRESS, "a1".into()),
        ]);
        let expr = "_ROUTING_NAME = 'q1' AND _ADDRESS <> 'a2'";
        let first = CompiledFilter::compile(expr).unwrap();
        let second = CompiledFilter::compile(expr).unwrap();
        assert_eq!(first.matches(&record), second.matches(&record));
        assert!(first.matches(&record));
        assert_eq!(first.source(), second.source());
    }
}

use std::collections::HashMap;

use logos::Logos;
use thiserror::Error;

use crate::model::VariableCode;
use crate::span::{Span, Spanned};

/// Boolean guard over one row of a cube.
///
/// The rendered form is a parenthesized expression in the grammar of the generated filter
/// code:
///
/// ```text
/// expr    := or
/// or      := and ("or" and)*
/// and     := primary ("and" primary)*
/// primary := "True" | "(" expr ")" | BINDING "." VARIABLE "==" STRING
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// Accepts every row.
    True,

    /// Variable of the row equals the member code.
    Eq { variable: VariableCode, code: String },

    /// At least one operand holds. Has two or more operands.
    Or(Vec<Expression>),

    /// Every operand holds. Has two or more operands.
    And(Vec<Expression>),
}

/// Read access to the variables of a row, for [Expression::evaluate].
pub trait Row {
    fn value(&self, variable: &str) -> Option<&str>;
}

impl Row for HashMap<String, String> {
    fn value(&self, variable: &str) -> Option<&str> {
        self.get(variable).map(String::as_str)
    }
}

impl Row for HashMap<&str, &str> {
    fn value(&self, variable: &str) -> Option<&str> {
        self.get(variable).copied()
    }
}

impl Expression {
    pub fn equals(variable: VariableCode, code: impl Into<String>) -> Self {
        Expression::Eq {
            variable,
            code: code.into(),
        }
    }

    /// Disjunction without a redundant wrapper: a single operand is returned as is.
    /// No operands means nothing can match, which this builder has no use for, so the
    /// caller must provide at least one.
    pub fn any(mut operands: Vec<Expression>) -> Self {
        debug_assert!(!operands.is_empty(), "disjunction needs an operand");
        if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expression::Or(operands)
        }
    }

    /// Conjunction without a redundant wrapper. No operands is [Expression::True].
    pub fn all(mut operands: Vec<Expression>) -> Self {
        match operands.len() {
            0 => Expression::True,
            1 => operands.remove(0),
            _ => Expression::And(operands),
        }
    }

    /// Formats the expression as code, with `binding` as the name of the row.
    pub fn to_pretty_string(&self, binding: &str) -> String {
        let mut out = String::new();
        self.write_code(binding, &mut out);
        out
    }

    fn write_code(&self, binding: &str, out: &mut String) {
        match self {
            Expression::True => out.push_str("True"),
            Expression::Eq { variable, code } => {
                out.push('(');
                out.push_str(binding);
                out.push('.');
                out.push_str(variable);
                out.push_str(" == \"");
                push_escaped(code, out);
                out.push_str("\")");
            }
            Expression::Or(operands) => Self::write_joined(operands, " or ", binding, out),
            Expression::And(operands) => Self::write_joined(operands, " and ", binding, out),
        }
    }

    fn write_joined(operands: &[Expression], sep: &str, binding: &str, out: &mut String) {
        out.push('(');
        for (i, operand) in operands.iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            operand.write_code(binding, out);
        }
        out.push(')');
    }

    /// Whether the row satisfies the expression. A variable missing from the row never
    /// equals anything.
    pub fn evaluate(&self, row: &impl Row) -> bool {
        match self {
            Expression::True => true,
            Expression::Eq { variable, code } => row.value(variable) == Some(code.as_str()),
            Expression::Or(operands) => operands.iter().any(|e| e.evaluate(row)),
            Expression::And(operands) => operands.iter().all(|e| e.evaluate(row)),
        }
    }

    /// Number of equality tests in the expression.
    pub fn comparison_count(&self) -> usize {
        match self {
            Expression::True => 0,
            Expression::Eq { .. } => 1,
            Expression::Or(operands) | Expression::And(operands) => {
                operands.iter().map(Expression::comparison_count).sum()
            }
        }
    }

    /// Parse code in the grammar [to_pretty_string](Self::to_pretty_string) produces.
    /// Every comparison must be made on `binding`.
    pub fn parse(source: &str, binding: &str) -> Result<Self, ParseError> {
        let mut tokens = Vec::new();
        for (token, range) in Lex::lexer(source).spanned() {
            let span = Span::from(range);
            match token {
                Ok(token) => tokens.push(span.with(token)),
                Err(()) => {
                    return Err(ParseError::UnknownToken {
                        token: span.slice(source).unwrap_or_default().to_owned(),
                        span,
                    })
                }
            }
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            binding,
            end: Span::at(source.len() as _),
        };
        let expr = parser.parse_or()?;
        if let Some(extra) = parser.next() {
            return Err(ParseError::Trailing { span: extra.span() });
        }
        Ok(expr)
    }
}

/// Lexical element of a predicate.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Lex {
    #[token("True", priority = 100)]
    True,

    #[token("and", priority = 100)]
    And,

    #[token("or", priority = 100)]
    Or,

    #[regex("[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    #[regex(r#""([^"\\\x00-\x1F\x7F]|\\[^\x00-\x1F\x7F])*""#, lex_to_str_lit)]
    StrLit(String),

    #[token("(")]
    OpenParen,

    #[token(")")]
    CloseParen,

    #[token(".")]
    Dot,

    #[token("==")]
    EqEq,
}

/// Write `code` as the body of a string literal. Control characters never appear raw.
fn push_escaped(code: &str, out: &mut String) {
    for c in code.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\x7f' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

/// Strip the quotes and resolve backslash escapes. `None` for an unknown escape.
fn lex_to_str_lit(lex: &mut logos::Lexer<Lex>) -> Option<String> {
    let slice = lex.slice();
    let unquoted = &slice[1..slice.len() - 1];

    let mut out = String::with_capacity(unquoted.len());
    let mut chars = unquoted.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 {
                    return None;
                }
                let code = u8::from_str_radix(&hex, 16).ok()?;
                out.push(char::from(code));
            }
            c @ ('"' | '\\') => out.push(c),
            _ => return None,
        }
    }
    Some(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected end of input at {span}, expected {expected}")]
    UnexpectedEnd { expected: &'static str, span: Span },

    #[error("unknown token `{token}` at {span}")]
    UnknownToken { token: String, span: Span },

    #[error("unexpected token {found:?} at {span}, expected {expected}")]
    Unexpected {
        found: Lex,
        expected: &'static str,
        span: Span,
    },

    #[error("comparison on `{found}` at {span}, expected `{expected}`")]
    WrongBinding {
        found: String,
        expected: String,
        span: Span,
    },

    #[error("{0}")]
    InvalidVariable(#[from] crate::model::InvalidVariableCode),

    #[error("trailing input at {span}")]
    Trailing { span: Span },
}

struct Parser<'b> {
    tokens: Vec<Spanned<Lex>>,
    pos: usize,
    binding: &'b str,
    end: Span,
}

impl Parser<'_> {
    fn next(&mut self) -> Option<Spanned<Lex>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Advance if the next token is `expected`.
    fn probe(&mut self, expected: &Lex) -> bool {
        match self.tokens.get(self.pos) {
            Some(token) if **token == *expected => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_next(&mut self, expected: &'static str) -> Result<Spanned<Lex>, ParseError> {
        self.next().ok_or(ParseError::UnexpectedEnd {
            expected,
            span: self.end,
        })
    }

    fn expect(&mut self, token: Lex, expected: &'static str) -> Result<(), ParseError> {
        let (found, span) = self.expect_next(expected)?.split();
        if found == token {
            Ok(())
        } else {
            Err(ParseError::Unexpected {
                found,
                expected,
                span,
            })
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut operands = vec![self.parse_and()?];
        while self.probe(&Lex::Or) {
            operands.push(self.parse_and()?);
        }
        Ok(Expression::any(operands))
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut operands = vec![self.parse_primary()?];
        while self.probe(&Lex::And) {
            operands.push(self.parse_primary()?);
        }
        Ok(Expression::all(operands))
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        const EXPECTED: &str = "`True`, `(` or a comparison";

        let (token, span) = self.expect_next(EXPECTED)?.split();
        match token {
            Lex::True => Ok(Expression::True),
            Lex::OpenParen => {
                let inner = self.parse_or()?;
                self.expect(Lex::CloseParen, "`)`")?;
                Ok(inner)
            }
            Lex::Ident(binding) => {
                if binding != self.binding {
                    return Err(ParseError::WrongBinding {
                        found: binding,
                        expected: self.binding.to_owned(),
                        span,
                    });
                }
                self.parse_comparison()
            }
            found => Err(ParseError::Unexpected {
                found,
                expected: EXPECTED,
                span,
            }),
        }
    }

    /// Rest of a comparison after the binding.
    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        self.expect(Lex::Dot, "`.`")?;

        let (token, span) = self.expect_next("a variable code")?.split();
        let Lex::Ident(variable) = token else {
            return Err(ParseError::Unexpected {
                found: token,
                expected: "a variable code",
                span,
            });
        };
        let variable = VariableCode::new(variable)?;

        self.expect(Lex::EqEq, "`==`")?;

        let (token, span) = self.expect_next("a string literal")?.split();
        match token {
            Lex::StrLit(code) => Ok(Expression::equals(variable, code)),
            found => Err(ParseError::Unexpected {
                found,
                expected: "a string literal",
                span,
            }),
        }
    }
}

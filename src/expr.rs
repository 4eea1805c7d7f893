//! Propositional formulas and the parser for the string IR.
//!
//! Formulas travel between components as human-readable strings; this module
//! owns the only parse. The grammar, lowest precedence first:
//!
//! ```text
//! iff   := imp ( "<->" imp )*
//! imp   := or ( "->" imp )?          right associative
//! or    := and ( "||" and )*
//! and   := unary ( "&&" unary )*
//! unary := "!"* primary
//! primary := IDENT | "0" | "1" | "(" iff ")"
//! ```
//!
//! Identifiers are maximal words of `[A-Za-z0-9_.]` not starting with a
//! digit; the dot admits the in-file macro replacement symbols (`FOO.`).

use crate::error::Error;

/// A propositional expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(bool),
    Var(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Imp(Box<Expr>, Box<Expr>),
    Iff(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn not(e: Expr) -> Self {
        match e {
            Expr::Not(inner) => *inner,
            Expr::Const(b) => Expr::Const(!b),
            _ => Expr::Not(Box::new(e)),
        }
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Expr::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn imp(lhs: Expr, rhs: Expr) -> Self {
        Expr::Imp(Box::new(lhs), Box::new(rhs))
    }

    pub fn iff(lhs: Expr, rhs: Expr) -> Self {
        Expr::Iff(Box::new(lhs), Box::new(rhs))
    }

    /// Evaluate under an assignment; unassigned variables default to false.
    pub fn eval(&self, assignment: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Expr::Const(b) => *b,
            Expr::Var(name) => assignment(name),
            Expr::Not(e) => !e.eval(assignment),
            Expr::And(a, b) => a.eval(assignment) && b.eval(assignment),
            Expr::Or(a, b) => a.eval(assignment) || b.eval(assignment),
            Expr::Imp(a, b) => !a.eval(assignment) || b.eval(assignment),
            Expr::Iff(a, b) => a.eval(assignment) == b.eval(assignment),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Const(bool),
    Not,
    And,
    Or,
    Imp,
    Iff,
    LParen,
    RParen,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Formula { offset: self.pos, message: message.into() }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, Error> {
        let mut tokens = Vec::new();
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() {
            let start = self.pos;
            let c = bytes[self.pos] as char;
            match c {
                c if c.is_whitespace() => {
                    self.pos += 1;
                    continue;
                }
                '(' => {
                    self.pos += 1;
                    tokens.push((start, Token::LParen));
                }
                ')' => {
                    self.pos += 1;
                    tokens.push((start, Token::RParen));
                }
                '!' => {
                    self.pos += 1;
                    tokens.push((start, Token::Not));
                }
                '&' => {
                    self.expect_pair("&&")?;
                    tokens.push((start, Token::And));
                }
                '|' => {
                    self.expect_pair("||")?;
                    tokens.push((start, Token::Or));
                }
                '-' => {
                    self.expect_pair("->")?;
                    tokens.push((start, Token::Imp));
                }
                '<' => {
                    if !self.input[self.pos..].starts_with("<->") {
                        return Err(self.error("expected '<->'"));
                    }
                    self.pos += 3;
                    tokens.push((start, Token::Iff));
                }
                c if c.is_ascii_alphanumeric() || c == '_' => {
                    let word = self.take_word();
                    let token = match word {
                        "0" => Token::Const(false),
                        "1" => Token::Const(true),
                        w if w.starts_with(|c: char| c.is_ascii_digit()) => {
                            return Err(self.error(format!("unexpected number '{w}'")));
                        }
                        w => Token::Ident(w.to_string()),
                    };
                    tokens.push((start, token));
                }
                c => return Err(self.error(format!("unexpected character '{c}'"))),
            }
        }
        Ok(tokens)
    }

    fn expect_pair(&mut self, pair: &str) -> Result<(), Error> {
        if !self.input[self.pos..].starts_with(pair) {
            return Err(self.error(format!("expected '{pair}'")));
        }
        self.pos += 2;
        Ok(())
    }

    fn take_word(&mut self) -> &'a str {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() {
            let c = bytes[self.pos] as char;
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Formula { offset: self.offset(), message: message.into() }
    }

    fn parse_iff(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_imp()?;
        while self.peek() == Some(&Token::Iff) {
            self.advance();
            let rhs = self.parse_imp()?;
            lhs = Expr::iff(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_imp(&mut self) -> Result<Expr, Error> {
        let lhs = self.parse_or()?;
        if self.peek() == Some(&Token::Imp) {
            self.advance();
            let rhs = self.parse_imp()?;
            return Ok(Expr::imp(lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::or(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::and(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::not(inner));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::Const(b)) => Ok(Expr::Const(b)),
            Some(Token::LParen) => {
                let inner = self.parse_iff()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(token) => Err(self.error(format!("unexpected token {token:?}"))),
            None => Err(self.error("unexpected end of formula")),
        }
    }
}

/// Parse a formula string into an [`Expr`].
pub fn parse(input: &str) -> Result<Expr, Error> {
    let end = input.len();
    let tokens = Lexer::new(input).tokenize()?;
    if tokens.is_empty() {
        return Err(Error::Formula { offset: 0, message: "empty formula".into() });
    }
    let mut parser = Parser { tokens, pos: 0, end };
    let expr = parser.parse_iff()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing input after formula"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_atoms() {
        assert_eq!(parse("CONFIG_FOO").unwrap(), Expr::var("CONFIG_FOO"));
        assert_eq!(parse("1").unwrap(), Expr::Const(true));
        assert_eq!(parse("0").unwrap(), Expr::Const(false));
        assert_eq!(parse("FOO.").unwrap(), Expr::var("FOO."));
    }

    #[test]
    fn precedence_and_over_or() {
        // A || B && C parses as A || (B && C)
        let e = parse("A || B && C").unwrap();
        assert_eq!(e, Expr::or(Expr::var("A"), Expr::and(Expr::var("B"), Expr::var("C"))));
    }

    #[test]
    fn implication_is_right_associative() {
        let e = parse("A -> B -> C").unwrap();
        assert_eq!(e, Expr::imp(Expr::var("A"), Expr::imp(Expr::var("B"), Expr::var("C"))));
    }

    #[test]
    fn iff_binds_loosest() {
        let e = parse("A <-> B -> C").unwrap();
        assert_eq!(e, Expr::iff(Expr::var("A"), Expr::imp(Expr::var("B"), Expr::var("C"))));
    }

    #[test]
    fn double_negation_collapses() {
        assert_eq!(parse("!!A").unwrap(), Expr::var("A"));
        assert_eq!(parse("!A").unwrap(), Expr::not(Expr::var("A")));
    }

    #[test]
    fn parenthesized_groups() {
        let e = parse("( B2 <-> ( ( CONFIG_B || CONFIG_C ) && ( ! B1 ) ) )").unwrap();
        let expected = Expr::iff(
            Expr::var("B2"),
            Expr::and(
                Expr::or(Expr::var("CONFIG_B"), Expr::var("CONFIG_C")),
                Expr::not(Expr::var("B1")),
            ),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("A &&").is_err());
        assert!(parse("A & B").is_err());
        assert!(parse("(A").is_err());
        assert!(parse("A B").is_err());
        assert!(parse("42A").is_err());
    }

    #[test]
    fn evaluation_matches_semantics() {
        let e = parse("( A -> B ) && ( C <-> ! A )").unwrap();
        let a = |name: &str| name == "A" || name == "B";
        assert!(e.eval(&a));
        let b = |name: &str| name == "A";
        assert!(!e.eval(&b));
    }
}

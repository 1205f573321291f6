//! Recursive-descent evaluator for `length_field`/`condition`/
//! `discriminator_field` expressions (`spec.md` §4.2).
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or      := and  ('||' and)*
//! and     := eq   ('&&' eq)*
//! eq      := rel  (('=='|'!=') rel)?
//! rel     := add  (('<'|'<='|'>'|'>=') add)?
//! add     := mul  (('+'|'-') mul)*
//! mul     := unary(('*'|'/'|'%') unary)*
//! unary   := ('!'|'-'|'+')? primary
//! primary := NUMBER | BOOL | '(' or ')' | PATH
//! PATH    := name ('.' name | '[' NUMBER ']')*
//! ```
//!
//! The evaluator tokenizes once and walks a token slice (unlike
//! `original_source/expression_evaluator.py`, which re-splits the source
//! string at every precedence level); see the REDESIGN FLAG in `spec.md` §9
//! about not falling back to host-language evaluation — this grammar is the
//! full extent of what an expression can do.

use crate::document::{Document, Path, PathSeg};
use crate::errors::ExprError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(NumLit),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Or,
    And,
    EqEq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NumLit {
    Int(i64),
    Float(f64),
}

/// The result of evaluating an expression: integer, floating, or boolean,
/// per `spec.md` §4.2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ExprValue {
    pub fn as_i64(&self) -> Result<i64, ExprError> {
        match self {
            ExprValue::Int(i) => Ok(*i),
            ExprValue::Float(f) => Ok(*f as i64),
            ExprValue::Bool(b) => Ok(if *b { 1 } else { 0 }),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            ExprValue::Int(i) => *i != 0,
            ExprValue::Float(f) => *f != 0.0,
            ExprValue::Bool(b) => *b,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            ExprValue::Int(i) => *i as f64,
            ExprValue::Float(f) => *f,
            ExprValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, ExprValue::Float(_))
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            '[' => {
                out.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                out.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                out.push(Token::Dot);
                i += 1;
            }
            '+' => {
                out.push(Token::Plus);
                i += 1;
            }
            '-' => {
                out.push(Token::Minus);
                i += 1;
            }
            '*' => {
                out.push(Token::Star);
                i += 1;
            }
            '%' => {
                out.push(Token::Percent);
                i += 1;
            }
            '/' => {
                out.push(Token::Slash);
                i += 1;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                out.push(Token::Or);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                out.push(Token::And);
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                out.push(Token::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                out.push(Token::Ne);
                i += 2;
            }
            '!' => {
                out.push(Token::Bang);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                out.push(Token::Le);
                i += 2;
            }
            '<' => {
                out.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                out.push(Token::Ge);
                i += 2;
            }
            '>' => {
                out.push(Token::Gt);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '+' || chars[i] == '-')
                            && i > start
                            && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
                {
                    if chars[i] == '.' || chars[i] == 'e' || chars[i] == 'E' {
                        is_float = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let v: f64 = text
                        .parse()
                        .map_err(|_| ExprError::Syntax(format!("bad number literal '{text}'")))?;
                    out.push(Token::Number(NumLit::Float(v)));
                } else {
                    let v: i64 = text
                        .parse()
                        .map_err(|_| ExprError::Syntax(format!("bad number literal '{text}'")))?;
                    out.push(Token::Number(NumLit::Int(v)));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                out.push(Token::Ident(text));
            }
            other => return Err(ExprError::Syntax(format!("unexpected character '{other}'"))),
        }
    }

    Ok(out)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

enum Ast {
    Value(ExprValue),
    Path(Path),
    Unary(UnaryOp, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
}

#[derive(Clone, Copy)]
enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Clone, Copy)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Ast::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.parse_eq()?;
        while self.eat(&Token::And) {
            let right = self.parse_eq()?;
            left = Ast::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_eq(&mut self) -> Result<Ast, ExprError> {
        let left = self.parse_rel()?;
        if self.eat(&Token::EqEq) {
            let right = self.parse_rel()?;
            return Ok(Ast::Binary(BinOp::Eq, Box::new(left), Box::new(right)));
        }
        if self.eat(&Token::Ne) {
            let right = self.parse_rel()?;
            return Ok(Ast::Binary(BinOp::Ne, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_rel(&mut self) -> Result<Ast, ExprError> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Le) => Some(BinOp::Le),
            Some(Token::Ge) => Some(BinOp::Ge),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Gt) => Some(BinOp::Gt),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.parse_add()?;
            return Ok(Ast::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_mul()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, ExprError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Ast::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Ast::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                Ok(Ast::Unary(UnaryOp::Pos, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Ast, ExprError> {
        match self.advance().cloned() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(ExprError::Syntax("expected ')'".into()));
                }
                Ok(inner)
            }
            Some(Token::Number(NumLit::Int(v))) => Ok(Ast::Value(ExprValue::Int(v))),
            Some(Token::Number(NumLit::Float(v))) => Ok(Ast::Value(ExprValue::Float(v))),
            Some(Token::Ident(name)) => {
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Ast::Value(ExprValue::Bool(true)));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Ast::Value(ExprValue::Bool(false)));
                }
                let mut path = vec![PathSeg::Name(name)];
                loop {
                    if self.eat(&Token::Dot) {
                        match self.advance().cloned() {
                            Some(Token::Ident(n)) => path.push(PathSeg::Name(n)),
                            _ => return Err(ExprError::Syntax("expected identifier after '.'".into())),
                        }
                    } else if self.eat(&Token::LBracket) {
                        let idx = match self.advance().cloned() {
                            Some(Token::Number(NumLit::Int(v))) if v >= 0 => v as usize,
                            _ => return Err(ExprError::Syntax("expected non-negative integer index".into())),
                        };
                        if !self.eat(&Token::RBracket) {
                            return Err(ExprError::Syntax("expected ']'".into()));
                        }
                        path.push(PathSeg::Index(idx));
                    } else {
                        break;
                    }
                }
                Ok(Ast::Path(path))
            }
            other => Err(ExprError::Syntax(format!("unexpected token {other:?}"))),
        }
    }
}

fn eval_ast(ast: &Ast, doc: &Document) -> Result<ExprValue, ExprError> {
    match ast {
        Ast::Value(v) => Ok(*v),
        Ast::Path(path) => {
            let value = doc
                .get(path)
                .ok_or_else(|| ExprError::UnknownField(crate::document::path_to_string(path)))?;
            document_to_expr_value(value, path)
        }
        Ast::Unary(op, inner) => {
            let v = eval_ast(inner, doc)?;
            Ok(match op {
                UnaryOp::Not => ExprValue::Bool(!v.as_bool()),
                UnaryOp::Neg => negate(v),
                UnaryOp::Pos => v,
            })
        }
        Ast::Binary(op, l, r) => {
            let left = eval_ast(l, doc)?;
            match op {
                BinOp::Or => {
                    if left.as_bool() {
                        return Ok(ExprValue::Bool(true));
                    }
                    let right = eval_ast(r, doc)?;
                    Ok(ExprValue::Bool(right.as_bool()))
                }
                BinOp::And => {
                    if !left.as_bool() {
                        return Ok(ExprValue::Bool(false));
                    }
                    let right = eval_ast(r, doc)?;
                    Ok(ExprValue::Bool(right.as_bool()))
                }
                _ => {
                    let right = eval_ast(r, doc)?;
                    eval_binary(*op, left, right)
                }
            }
        }
    }
}

fn document_to_expr_value(doc: &Document, path: &Path) -> Result<ExprValue, ExprError> {
    match doc {
        Document::Int(i) => Ok(ExprValue::Int(*i)),
        Document::Float(f) => Ok(ExprValue::Float(*f)),
        _ => Err(ExprError::TypeMismatch(crate::document::path_to_string(path))),
    }
}

fn negate(v: ExprValue) -> ExprValue {
    match v {
        ExprValue::Int(i) => ExprValue::Int(-i),
        ExprValue::Float(f) => ExprValue::Float(-f),
        ExprValue::Bool(b) => ExprValue::Int(if b { -1 } else { 0 }),
    }
}

fn eval_binary(op: BinOp, left: ExprValue, right: ExprValue) -> Result<ExprValue, ExprError> {
    match op {
        BinOp::Eq => Ok(ExprValue::Bool(numeric_eq(left, right))),
        BinOp::Ne => Ok(ExprValue::Bool(!numeric_eq(left, right))),
        BinOp::Lt => Ok(ExprValue::Bool(left.as_f64() < right.as_f64())),
        BinOp::Le => Ok(ExprValue::Bool(left.as_f64() <= right.as_f64())),
        BinOp::Gt => Ok(ExprValue::Bool(left.as_f64() > right.as_f64())),
        BinOp::Ge => Ok(ExprValue::Bool(left.as_f64() >= right.as_f64())),
        BinOp::Add => Ok(arith(left, right, |a, b| a + b, |a, b| a + b)),
        BinOp::Sub => Ok(arith(left, right, |a, b| a - b, |a, b| a - b)),
        BinOp::Mul => Ok(arith(left, right, |a, b| a * b, |a, b| a * b)),
        BinOp::Div => {
            if right.as_f64() == 0.0 {
                return Err(ExprError::DivByZero);
            }
            if left.is_float() || right.is_float() {
                Ok(ExprValue::Float(left.as_f64() / right.as_f64()))
            } else {
                Ok(ExprValue::Int(left.as_i64()? / right.as_i64()?))
            }
        }
        BinOp::Rem => {
            if right.as_f64() == 0.0 {
                return Err(ExprError::DivByZero);
            }
            if left.is_float() || right.is_float() {
                Ok(ExprValue::Float(left.as_f64() % right.as_f64()))
            } else {
                Ok(ExprValue::Int(left.as_i64()? % right.as_i64()?))
            }
        }
        BinOp::Or | BinOp::And => unreachable!("short-circuited above"),
    }
}

fn numeric_eq(left: ExprValue, right: ExprValue) -> bool {
    if let (ExprValue::Bool(a), ExprValue::Bool(b)) = (left, right) {
        return a == b;
    }
    left.as_f64() == right.as_f64()
}

fn arith(left: ExprValue, right: ExprValue, f_op: fn(f64, f64) -> f64, i_op: fn(i64, i64) -> i64) -> ExprValue {
    if left.is_float() || right.is_float() {
        ExprValue::Float(f_op(left.as_f64(), right.as_f64()))
    } else {
        ExprValue::Int(i_op(left.as_f64() as i64, right.as_f64() as i64))
    }
}

/// A parsed expression, ready to be evaluated repeatedly against different
/// documents.
pub struct Expr {
    ast: Ast,
}

impl Expr {
    /// Parses `source` into an [`Expr`]. An empty string parses to the
    /// literal `true`, matching `spec.md` §4.2 ("A missing path fails...";
    /// the Python original treats an empty condition as always-true, which
    /// this crate keeps since `spec.md` describes `condition` as optional).
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Ok(Expr {
                ast: Ast::Value(ExprValue::Bool(true)),
            });
        }
        let tokens = tokenize(trimmed)?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let ast = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(ExprError::Syntax(format!("trailing tokens in '{source}'")));
        }
        Ok(Expr { ast })
    }

    pub fn eval(&self, doc: &Document) -> Result<ExprValue, ExprError> {
        eval_ast(&self.ast, doc)
    }

    /// Evaluates and coerces to an integer count, as required for
    /// `length_field` (`spec.md` §4.2: "integer results are required for
    /// length_field").
    pub fn eval_as_len(&self, doc: &Document) -> Result<usize, ExprError> {
        let v = self.eval(doc)?.as_i64()?;
        Ok(v.max(0) as usize)
    }

    /// Evaluates and coerces to a boolean, as required for `condition`.
    pub fn eval_as_bool(&self, doc: &Document) -> Result<bool, ExprError> {
        Ok(self.eval(doc)?.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx() -> Document {
        let mut header = BTreeMap::new();
        header.insert("version".to_string(), Document::Int(2));

        let mut root = BTreeMap::new();
        root.insert("field1".to_string(), Document::Int(10));
        root.insert("field2".to_string(), Document::Int(5));
        root.insert("header".to_string(), Document::Map(header));
        root.insert(
            "data".to_string(),
            Document::List(vec![
                Document::Int(1),
                Document::Int(2),
                Document::Int(3),
                Document::Int(4),
            ]),
        );
        root.insert("status".to_string(), Document::Int(0));
        Document::Map(root)
    }

    fn eval_bool(src: &str) -> bool {
        Expr::parse(src).unwrap().eval_as_bool(&ctx()).unwrap()
    }

    #[test]
    fn comparisons_and_arithmetic() {
        assert!(eval_bool("field1 > 5"));
        assert!(eval_bool("field1 + field2 > 10"));
        assert!(eval_bool("field1 * field2 == 50"));
        assert!(eval_bool("header.version >= 2"));
        assert!(eval_bool("data[0] == 1"));
    }

    #[test]
    fn logical_composition() {
        assert!(eval_bool("field1 > 5 && field2 < 10"));
        assert!(eval_bool("field1 > 20 || field2 < 10"));
        assert!(eval_bool("!(status == 0)") == false);
        assert!(eval_bool("(field1 + field2) * 2 > 25"));
        assert!(eval_bool("field1 % 3 == 1"));
    }

    #[test]
    fn unknown_field_errors() {
        let err = Expr::parse("nonexistent > 0").unwrap().eval(&ctx()).unwrap_err();
        assert_eq!(err, ExprError::UnknownField("nonexistent".into()));
    }

    #[test]
    fn division_by_zero_errors() {
        let err = Expr::parse("field1 / 0").unwrap().eval(&ctx()).unwrap_err();
        assert_eq!(err, ExprError::DivByZero);
    }

    #[test]
    fn empty_expression_is_true() {
        assert!(Expr::parse("").unwrap().eval_as_bool(&ctx()).unwrap());
    }

    #[test]
    fn length_field_coerces_to_usize() {
        let len = Expr::parse("field1 - field2").unwrap().eval_as_len(&ctx()).unwrap();
        assert_eq!(len, 5);
    }

    #[test]
    fn syntax_error_on_unbalanced_paren() {
        assert!(Expr::parse("field1 + (").is_err());
    }
}

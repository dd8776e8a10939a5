//! Restricted expression evaluator (spec C2).
//!
//! The grammar is deliberately small: member access (`.` and `[]`),
//! comparisons, logical `&&`/`||`/`!`, arithmetic `+ - * /`, and literals.
//! Expressions evaluate against exactly `{flow_input, results}` plus the
//! `true`/`false`/`null` literals — there are no functions, no loops, no
//! user-defined variables.
//!
//! `===` and `!==` are accepted as spellings of `==` and `!=`: they are
//! normalized away before parsing, matching how they're treated everywhere
//! else in the system.

use serde_json::Value;

use crate::value_utils::{is_truthy, number_as_f64};

/// Maximum recursion depth for nested expressions (`((((1))))` and friends).
const MAX_RECURSION_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("expression syntax error: {0}")]
    Syntax(String),

    #[error("unknown identifier '{0}' (only 'flow_input' and 'results' are in scope)")]
    UnknownIdentifier(String),

    #[error("expression recursion depth exceeded ({0})")]
    RecursionLimit(usize),

    #[error("cannot apply operator to these operand types: {0}")]
    TypeMismatch(String),
}

type Result<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Parses and evaluates `source` against `context` (which must expose
/// `flow_input` and `results` keys) in one call.
pub fn evaluate(source: &str, context: &Value) -> Result<Value> {
    let normalized = normalize_operators(source);
    let tokens = lex(&normalized)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    parser.expect_eof()?;
    eval_expr(&expr, context, 0)
}

/// Evaluates `source` and coerces the result to a boolean with the same
/// truthiness rules used throughout the engine.
pub fn evaluate_bool(source: &str, context: &Value) -> Result<bool> {
    evaluate(source, context).map(|v| is_truthy(&v))
}

fn normalize_operators(source: &str) -> String {
    source.replace("===", "==").replace("!==", "!=")
}

// --- Lexer -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    String(String),
    Ident(String),
    True,
    False,
    Null,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
}

fn lex(s: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Bang);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut j = i + 1;
                let mut lit = String::new();
                while j < chars.len() && chars[j] != quote {
                    lit.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(EvalError::Syntax("unterminated string literal".into()));
                }
                tokens.push(Token::String(lit));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let lit: String = chars[start..j].iter().collect();
                let num = lit
                    .parse::<f64>()
                    .map_err(|_| EvalError::Syntax(format!("invalid number literal '{lit}'")))?;
                tokens.push(Token::Number(num));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let word: String = chars[start..j].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
                i = j;
            }
            other => {
                return Err(EvalError::Syntax(format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

// --- Parser (precedence climbing) ------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_eof(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(EvalError::Syntax("trailing tokens after expression".into()))
        }
    }

    /// `min_bp` is the minimum binding power a binary operator must have to
    /// be consumed at this call level (precedence climbing).
    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some(op) = self.peek_binary_op() else {
                break;
            };
            let bp = binding_power(op);
            if bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_expr(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        match self.peek()? {
            Token::EqEq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            Token::AndAnd => Some(BinaryOp::And),
            Token::OrOr => Some(BinaryOp::Or),
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Bang) => {
                self.bump();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Minus) => {
                self.bump();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let Some(Token::Ident(name)) = self.bump() else {
                        return Err(EvalError::Syntax("expected identifier after '.'".into()));
                    };
                    expr = Expr::Member(Box::new(expr), name);
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let index = self.parse_expr(0)?;
                    match self.bump() {
                        Some(Token::RBracket) => {}
                        _ => return Err(EvalError::Syntax("expected ']'".into())),
                    }
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::String(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(EvalError::Syntax("expected ')'".into())),
                }
            }
            other => Err(EvalError::Syntax(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}

fn binding_power(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq | BinaryOp::NotEq => 3,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div => 6,
    }
}

// --- Evaluation --------------------------------------------------------------

fn eval_expr(expr: &Expr, context: &Value, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(EvalError::RecursionLimit(MAX_RECURSION_DEPTH));
    }

    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        Expr::Member(base, name) => {
            let base_val = eval_expr(base, context, depth + 1)?;
            Ok(base_val.get(name).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, index) => {
            let base_val = eval_expr(base, context, depth + 1)?;
            let index_val = eval_expr(index, context, depth + 1)?;
            Ok(index_into(&base_val, &index_val))
        }
        Expr::Not(inner) => {
            let v = eval_expr(inner, context, depth + 1)?;
            Ok(Value::Bool(!is_truthy(&v)))
        }
        Expr::Neg(inner) => {
            let v = eval_expr(inner, context, depth + 1)?;
            let n = number_as_f64(as_number(&v).ok_or_else(|| {
                EvalError::TypeMismatch(format!("cannot negate non-number {v}"))
            })?)
            .ok_or_else(|| EvalError::TypeMismatch(format!("cannot negate {v}")))?;
            Ok(json_number(-n))
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, context, depth),
    }
}

fn as_number(value: &Value) -> Option<&serde_json::Number> {
    match value {
        Value::Number(n) => Some(n),
        _ => None,
    }
}

fn index_into(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(_), Value::String(key)) => base.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, context: &Value, depth: usize) -> Result<Value> {
    // Short-circuit logical operators without evaluating the other side.
    if op == BinaryOp::And {
        let l = eval_expr(lhs, context, depth + 1)?;
        if !is_truthy(&l) {
            return Ok(Value::Bool(false));
        }
        let r = eval_expr(rhs, context, depth + 1)?;
        return Ok(Value::Bool(is_truthy(&r)));
    }
    if op == BinaryOp::Or {
        let l = eval_expr(lhs, context, depth + 1)?;
        if is_truthy(&l) {
            return Ok(Value::Bool(true));
        }
        let r = eval_expr(rhs, context, depth + 1)?;
        return Ok(Value::Bool(is_truthy(&r)));
    }

    let l = eval_expr(lhs, context, depth + 1)?;
    let r = eval_expr(rhs, context, depth + 1)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::NotEq => Ok(Value::Bool(l != r)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &l, &r),
        BinaryOp::Add => add(&l, &r),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, &l, &r),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let (Some(ln), Some(rn)) = (as_number(l), as_number(r)) else {
        return Err(EvalError::TypeMismatch(format!(
            "cannot compare {l} and {r}"
        )));
    };
    let (lf, rf) = (
        number_as_f64(ln).ok_or_else(|| EvalError::TypeMismatch(format!("bad number {l}")))?,
        number_as_f64(rn).ok_or_else(|| EvalError::TypeMismatch(format!("bad number {r}")))?,
    );
    let result = match op {
        BinaryOp::Lt => lf < rf,
        BinaryOp::Le => lf <= rf,
        BinaryOp::Gt => lf > rf,
        BinaryOp::Ge => lf >= rf,
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn add(l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        _ => arithmetic(BinaryOp::Add, l, r),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let (Some(ln), Some(rn)) = (as_number(l), as_number(r)) else {
        return Err(EvalError::TypeMismatch(format!(
            "cannot apply arithmetic to {l} and {r}"
        )));
    };
    let lf = number_as_f64(ln).ok_or_else(|| EvalError::TypeMismatch(format!("bad number {l}")))?;
    let rf = number_as_f64(rn).ok_or_else(|| EvalError::TypeMismatch(format!("bad number {r}")))?;
    let result = match op {
        BinaryOp::Add => lf + rf,
        BinaryOp::Sub => lf - rf,
        BinaryOp::Mul => lf * rf,
        BinaryOp::Div => lf / rf,
        _ => unreachable!(),
    };
    Ok(json_number(result))
}

fn json_number(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "flow_input": {"user_id": 42, "active": true, "name": "ada"},
            "results": {"fetch_user": {"status": "ok", "items": [1, 2, 3]}},
        })
    }

    #[test]
    fn member_access_and_comparison() {
        assert_eq!(
            evaluate("flow_input.user_id == 42", &ctx()).unwrap(),
            json!(true)
        );
        assert_eq!(
            evaluate("flow_input.user_id > 100", &ctx()).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn triple_equals_normalizes_to_double() {
        assert_eq!(
            evaluate("flow_input.name === \"ada\"", &ctx()).unwrap(),
            json!(true)
        );
        assert_eq!(
            evaluate("flow_input.name !== \"ada\"", &ctx()).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(
            evaluate("flow_input.active && flow_input.user_id == 42", &ctx()).unwrap(),
            json!(true)
        );
        assert_eq!(
            evaluate("!flow_input.active || false", &ctx()).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn index_into_arrays_and_objects() {
        assert_eq!(
            evaluate("results.fetch_user.items[1]", &ctx()).unwrap(),
            json!(2)
        );
        assert_eq!(
            evaluate("results[\"fetch_user\"].status", &ctx()).unwrap(),
            json!("ok")
        );
    }

    #[test]
    fn arithmetic_respects_precedence() {
        assert_eq!(evaluate("1 + 2 * 3", &ctx()).unwrap(), json!(7.0));
        assert_eq!(evaluate("(1 + 2) * 3", &ctx()).unwrap(), json!(9.0));
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let err = evaluate("nope.field", &ctx()).unwrap_err();
        assert!(matches!(err, EvalError::UnknownIdentifier(_)));
    }

    #[test]
    fn evaluate_bool_applies_truthiness() {
        assert!(evaluate_bool("results.fetch_user.items[0]", &ctx()).unwrap());
        assert!(!evaluate_bool("flow_input.user_id == 1", &ctx()).unwrap());
    }
}

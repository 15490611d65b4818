//! Template expressions.
//!
//! An [`Expr`] is a small integer/boolean expression written in infix form
//! inside a directive argument (`cond={image_index % columns == 0}`) and
//! compiled to a postfix op sequence. Evaluation runs the ops against a
//! plain integer stack and a caller-supplied [`Resolver`]; the stack is
//! empty again after every evaluation.
//!
//! Unknown variables are a diagnostic, not an error: a mistyped name in a
//! user-edited theme warns and resolves to 0 so the export can proceed.
//! Division and remainder by zero degrade the same way.
//!
//! The one pseudo-function, `available(attr)`, tests whether the current
//! item carries a non-empty metadata attribute. Its operand is part of the
//! grammar — the op carries the attribute name, so only integers ever live
//! on the evaluation stack.

use log::warn;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected character `{0}` in expression")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected {expected}, found `{found}`")]
    Unexpected {
        expected: &'static str,
        found: String,
    },
    #[error("integer literal out of range")]
    IntOutOfRange,
}

/// One postfix operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Push(i64),
    /// Look up an integer variable by name.
    Var(String),
    /// `available(attr)` — 1 when the named attribute has a value.
    Available(String),
    Neg,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// A compiled expression: a postfix op sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    ops: Vec<Op>,
}

/// Supplies variable values and attribute presence at evaluation time.
pub trait Resolver {
    /// Integer value of a variable, or `None` when the name is unknown.
    fn value_of(&self, name: &str) -> Option<i64>;
    /// Whether the named item attribute has a non-empty value.
    fn is_available(&self, attribute: &str) -> bool;
}

impl Expr {
    /// Parse an infix expression.
    pub fn parse(src: &str) -> Result<Expr, ExprError> {
        let toks = lex(src)?;
        let mut p = Parser {
            toks,
            pos: 0,
            ops: Vec::new(),
        };
        p.expression(0)?;
        if p.pos != p.toks.len() {
            return Err(ExprError::Unexpected {
                expected: "end of expression",
                found: p.describe_current(),
            });
        }
        Ok(Expr { ops: p.ops })
    }

    /// A constant expression. `Expr::literal(1)` is the always-true branch
    /// of a conditional.
    pub fn literal(value: i64) -> Expr {
        Expr {
            ops: vec![Op::Push(value)],
        }
    }

    pub(crate) fn from_ops(ops: Vec<Op>) -> Expr {
        Expr { ops }
    }

    /// Evaluate against a resolver. Pure: no state survives the call, and
    /// the internal stack is drained before returning.
    pub fn eval(&self, resolver: &dyn Resolver) -> i64 {
        let mut stack: Vec<i64> = Vec::with_capacity(8);
        for op in &self.ops {
            match op {
                Op::Push(v) => stack.push(*v),
                Op::Var(name) => {
                    let v = resolver.value_of(name).unwrap_or_else(|| {
                        warn!("unknown variable `{name}` in expression, using 0");
                        0
                    });
                    stack.push(v);
                }
                Op::Available(attr) => stack.push(resolver.is_available(attr) as i64),
                Op::Neg => {
                    let v = pop(&mut stack);
                    stack.push(v.wrapping_neg());
                }
                Op::Not => {
                    let v = pop(&mut stack);
                    stack.push((v == 0) as i64);
                }
                _ => {
                    let b = pop(&mut stack);
                    let a = pop(&mut stack);
                    stack.push(apply_binary(op, a, b));
                }
            }
        }
        let result = pop(&mut stack);
        if !stack.is_empty() {
            warn!("expression left {} values on the stack", stack.len());
        }
        result
    }

    /// Non-zero result counts as true.
    pub fn truthy(&self, resolver: &dyn Resolver) -> bool {
        self.eval(resolver) != 0
    }
}

fn pop(stack: &mut Vec<i64>) -> i64 {
    stack.pop().unwrap_or_else(|| {
        warn!("expression stack underflow, using 0");
        0
    })
}

fn apply_binary(op: &Op, a: i64, b: i64) -> i64 {
    match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Div => {
            if b == 0 {
                warn!("division by zero in expression, using 0");
                0
            } else {
                a.wrapping_div(b)
            }
        }
        Op::Rem => {
            if b == 0 {
                warn!("remainder by zero in expression, using 0");
                0
            } else {
                a.wrapping_rem(b)
            }
        }
        Op::Eq => (a == b) as i64,
        Op::Ne => (a != b) as i64,
        Op::Lt => (a < b) as i64,
        Op::Le => (a <= b) as i64,
        Op::Gt => (a > b) as i64,
        Op::Ge => (a >= b) as i64,
        Op::And => (a != 0 && b != 0) as i64,
        Op::Or => (a != 0 || b != 0) as i64,
        // unary and operand ops are handled before dispatch
        _ => unreachable!("not a binary op"),
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Int(i64),
    Ident(String),
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

fn lex(src: &str) -> Result<Vec<Tok>, ExprError> {
    let mut toks = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                toks.push(Tok::Percent);
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::EqEq);
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar('='));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::NotEq);
                    i += 2;
                } else {
                    toks.push(Tok::Bang);
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    toks.push(Tok::AndAnd);
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar('&'));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    toks.push(Tok::OrOr);
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar('|'));
                }
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let n: i64 = src[start..i].parse().map_err(|_| ExprError::IntOutOfRange)?;
                toks.push(Tok::Int(n));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                toks.push(Tok::Ident(src[start..i].to_string()));
            }
            _ => return Err(ExprError::UnexpectedChar(c)),
        }
    }
    Ok(toks)
}

// ============================================================================
// Parser — precedence climbing, emitting postfix ops
// ============================================================================

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    ops: Vec<Op>,
}

/// Binding power of a binary operator, or `None` for non-operators.
fn binding_power(tok: &Tok) -> Option<(u8, Op)> {
    Some(match tok {
        Tok::OrOr => (1, Op::Or),
        Tok::AndAnd => (2, Op::And),
        Tok::EqEq => (3, Op::Eq),
        Tok::NotEq => (3, Op::Ne),
        Tok::Lt => (4, Op::Lt),
        Tok::Le => (4, Op::Le),
        Tok::Gt => (4, Op::Gt),
        Tok::Ge => (4, Op::Ge),
        Tok::Plus => (5, Op::Add),
        Tok::Minus => (5, Op::Sub),
        Tok::Star => (6, Op::Mul),
        Tok::Slash => (6, Op::Div),
        Tok::Percent => (6, Op::Rem),
        _ => return None,
    })
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(t) => format!("{t:?}"),
            None => "end of expression".to_string(),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<(), ExprError> {
        self.unary()?;
        while let Some((bp, op)) = self.peek().and_then(binding_power) {
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            self.expression(bp + 1)?;
            self.ops.push(op);
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<(), ExprError> {
        match self.peek() {
            Some(Tok::Bang) => {
                self.pos += 1;
                self.unary()?;
                self.ops.push(Op::Not);
                Ok(())
            }
            Some(Tok::Minus) => {
                self.pos += 1;
                self.unary()?;
                self.ops.push(Op::Neg);
                Ok(())
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<(), ExprError> {
        match self.peek().cloned() {
            Some(Tok::Int(n)) => {
                self.pos += 1;
                self.ops.push(Op::Push(n));
                Ok(())
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                if name == "available" && self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    let attr = match self.peek().cloned() {
                        Some(Tok::Ident(a)) => a,
                        _ => {
                            return Err(ExprError::Unexpected {
                                expected: "attribute name",
                                found: self.describe_current(),
                            });
                        }
                    };
                    self.pos += 1;
                    if self.peek() != Some(&Tok::RParen) {
                        return Err(ExprError::Unexpected {
                            expected: "`)`",
                            found: self.describe_current(),
                        });
                    }
                    self.pos += 1;
                    self.ops.push(Op::Available(attr));
                } else {
                    self.ops.push(Op::Var(name));
                }
                Ok(())
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                self.expression(0)?;
                if self.peek() != Some(&Tok::RParen) {
                    return Err(ExprError::Unexpected {
                        expected: "`)`",
                        found: self.describe_current(),
                    });
                }
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(ExprError::Unexpected {
                expected: "value",
                found: self.describe_current(),
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

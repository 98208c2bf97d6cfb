//! Expression AST: parsing, evaluation and free-variable enumeration.
//!
//! The grammar is a small formula language: number/string/boolean
//! literals, identifiers (dotted segments allowed, matching flattened bind
//! keys), unary minus, `+ - * / % ^`, comparisons and function calls.
//! Function names are resolved against the registry while parsing, so a
//! cached node carries its functions with it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde_json::Value;

use crate::comparison::compare;
use crate::errors::{CalcError, Result};
use crate::functions::{number_value, Function, Registry};
use crate::memory::{Binding, Memory};
use crate::parser::Scanner;

/// Options consumed while parsing one expression.
pub struct ParseOptions<'a> {
    pub case_sensitive: bool,
    /// Alias name → canonical function name.
    pub aliases: &'a HashMap<String, String>,
    pub registry: &'a Registry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A function resolved at parse time.
#[derive(Clone)]
pub struct BoundFunction(pub Arc<dyn Function>);

impl fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundFunction({})", self.0.name())
    }
}

#[derive(Debug, Clone)]
pub enum Ast {
    Literal(Value),
    Identifier(String),
    Unary {
        op: UnaryOp,
        operand: Box<Ast>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    Call {
        func: BoundFunction,
        args: Vec<Ast>,
    },
}

/// Parse `input` into an AST. Trailing input is an error.
pub fn parse(input: &str, opts: &ParseOptions<'_>) -> Result<Ast> {
    let mut parser = ExprParser {
        scanner: Scanner::new(input),
        opts,
    };
    let node = parser.parse_comparison()?;
    parser.scanner.skip_ws();
    if !parser.scanner.eof() {
        return Err(CalcError::Parse(format!(
            "trailing input `{}`",
            parser.scanner.rest()
        )));
    }
    Ok(node)
}

struct ExprParser<'a, 'o> {
    scanner: Scanner<'a>,
    opts: &'o ParseOptions<'o>,
}

impl ExprParser<'_, '_> {
    fn parse_comparison(&mut self) -> Result<Ast> {
        let lhs = self.parse_additive()?;
        self.scanner.skip_ws();
        let op = if self.scanner.consume_str("==") {
            BinaryOp::Eq
        } else if self.scanner.consume_str("!=") {
            BinaryOp::Ne
        } else if self.scanner.consume_str("<=") {
            BinaryOp::Le
        } else if self.scanner.consume_str(">=") {
            BinaryOp::Ge
        } else if self.scanner.consume_char('<') {
            BinaryOp::Lt
        } else if self.scanner.consume_char('>') {
            BinaryOp::Gt
        } else {
            return Ok(lhs);
        };
        let rhs = self.parse_additive()?;
        Ok(Ast::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> Result<Ast> {
        let mut node = self.parse_multiplicative()?;
        loop {
            self.scanner.skip_ws();
            let op = if self.scanner.consume_char('+') {
                BinaryOp::Add
            } else if self.scanner.consume_char('-') {
                BinaryOp::Sub
            } else {
                return Ok(node);
            };
            let rhs = self.parse_multiplicative()?;
            node = Ast::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Ast> {
        let mut node = self.parse_unary()?;
        loop {
            self.scanner.skip_ws();
            let op = if self.scanner.consume_char('*') {
                BinaryOp::Mul
            } else if self.scanner.consume_char('/') {
                BinaryOp::Div
            } else if self.scanner.consume_char('%') {
                BinaryOp::Mod
            } else {
                return Ok(node);
            };
            let rhs = self.parse_unary()?;
            node = Ast::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Ast> {
        self.scanner.skip_ws();
        if self.scanner.consume_char('-') {
            let operand = self.parse_unary()?;
            return Ok(Ast::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Ast> {
        let base = self.parse_primary()?;
        self.scanner.skip_ws();
        if self.scanner.consume_char('^') {
            // Right-associative; the exponent may itself be signed.
            let exponent = self.parse_unary()?;
            return Ok(Ast::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Ast> {
        self.scanner.skip_ws();
        match self.scanner.peek_char() {
            Some('(') => {
                self.scanner.expect('(')?;
                let node = self.parse_comparison()?;
                self.scanner.skip_ws();
                self.scanner.expect(')')?;
                Ok(node)
            }
            Some('"') | Some('\'') => {
                Ok(Ast::Literal(Value::String(self.scanner.parse_quoted_string()?)))
            }
            Some(c) if c.is_ascii_digit() => {
                Ok(Ast::Literal(self.scanner.parse_number_literal()?))
            }
            Some(c) if c == '_' || c.is_ascii_alphabetic() => self.parse_name(),
            Some(c) => Err(CalcError::Parse(format!("unexpected `{c}`"))),
            None => Err(CalcError::Parse("unexpected end of expression".into())),
        }
    }

    fn parse_name(&mut self) -> Result<Ast> {
        let raw = self.scanner.parse_identifier()?;
        let name = if self.opts.case_sensitive {
            raw
        } else {
            raw.to_lowercase()
        };
        match name.as_str() {
            "true" => return Ok(Ast::Literal(Value::Bool(true))),
            "false" => return Ok(Ast::Literal(Value::Bool(false))),
            _ => {}
        }
        self.scanner.skip_ws();
        if self.scanner.consume_char('(') {
            let canonical = self.opts.aliases.get(&name).unwrap_or(&name);
            let func = self.opts.registry.get(canonical).ok_or_else(|| {
                CalcError::Parse(format!("unknown function `{canonical}`"))
            })?;
            let args = self.parse_args()?;
            self.scanner.expect(')')?;
            return Ok(Ast::Call {
                func: BoundFunction(func),
                args,
            });
        }
        Ok(Ast::Identifier(name))
    }

    fn parse_args(&mut self) -> Result<Vec<Ast>> {
        let mut out = Vec::new();
        self.scanner.skip_ws();
        if self.scanner.peek_char() == Some(')') {
            return Ok(out);
        }
        loop {
            out.push(self.parse_comparison()?);
            self.scanner.skip_ws();
            if self.scanner.consume_char(',') {
                continue;
            }
            return Ok(out);
        }
    }
}

impl Ast {
    /// Compute this node's value against the current bindings. A name bound
    /// to a formula node evaluates that node here, against the same
    /// bindings.
    pub fn value(&self, memory: &Memory) -> Result<Value> {
        match self {
            Ast::Literal(v) => Ok(v.clone()),
            Ast::Identifier(name) => match memory.get(name) {
                Some(Binding::Value(v)) => Ok(v.clone()),
                Some(Binding::Formula(node)) => node.value(memory),
                None => Err(CalcError::UnboundVariable {
                    names: vec![name.clone()],
                }),
            },
            Ast::Unary { op, operand } => {
                let v = operand.value(memory)?;
                match op {
                    UnaryOp::Neg => {
                        let n = v.as_f64().ok_or_else(|| {
                            CalcError::InvalidArgument(format!("cannot negate {v}"))
                        })?;
                        Ok(number_value(-n))
                    }
                }
            }
            Ast::Binary { op, lhs, rhs } => {
                let a = lhs.value(memory)?;
                let b = rhs.value(memory)?;
                binary_value(*op, &a, &b)
            }
            Ast::Call { func, args } => {
                if !func.0.arity().contains(&args.len()) {
                    return Err(CalcError::InvalidArgument(format!(
                        "wrong number of arguments for {}(): got {}",
                        func.0.name(),
                        args.len()
                    )));
                }
                let values: Vec<Value> = args
                    .iter()
                    .map(|arg| arg.value(memory))
                    .collect::<Result<_>>()?;
                func.0.call(&values)
            }
        }
    }

    /// All identifiers referenced by this node, in first-appearance order,
    /// deduplicated.
    pub fn free_variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out.into_iter().unique().collect()
    }

    /// The identifiers still unbound under `memory`, in first-appearance
    /// order, deduplicated. A name bound to a formula contributes that
    /// formula's own unbound identifiers in its place, transitively, so
    /// the result is what a caller must supply before evaluation can
    /// succeed.
    pub fn dependencies(&self, memory: &Memory) -> Vec<String> {
        let mut out = Vec::new();
        let mut visiting = Vec::new();
        self.collect_dependencies(memory, &mut visiting, &mut out);
        out.into_iter().unique().collect()
    }

    fn collect_dependencies(
        &self,
        memory: &Memory,
        visiting: &mut Vec<String>,
        out: &mut Vec<String>,
    ) {
        match self {
            Ast::Literal(_) => {}
            Ast::Identifier(name) => match memory.get(name) {
                Some(Binding::Value(_)) => {}
                Some(Binding::Formula(node)) => {
                    // Mutually recursive formulas would loop forever here.
                    if !visiting.iter().any(|n| n == name) {
                        visiting.push(name.clone());
                        node.collect_dependencies(memory, visiting, out);
                        visiting.pop();
                    }
                }
                None => out.push(name.clone()),
            },
            Ast::Unary { operand, .. } => operand.collect_dependencies(memory, visiting, out),
            Ast::Binary { lhs, rhs, .. } => {
                lhs.collect_dependencies(memory, visiting, out);
                rhs.collect_dependencies(memory, visiting, out);
            }
            Ast::Call { args, .. } => {
                for arg in args {
                    arg.collect_dependencies(memory, visiting, out);
                }
            }
        }
    }

    fn collect_identifiers(&self, out: &mut Vec<String>) {
        match self {
            Ast::Literal(_) => {}
            Ast::Identifier(name) => out.push(name.clone()),
            Ast::Unary { operand, .. } => operand.collect_identifiers(out),
            Ast::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Ast::Call { args, .. } => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
        }
    }
}

fn binary_value(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => match (a, b) {
            (Value::String(sa), Value::String(sb)) => {
                Ok(Value::String(format!("{sa}{sb}")))
            }
            _ => numeric(op, a, b),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
            numeric(op, a, b)
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(a, b))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(a, b))),
        BinaryOp::Lt => Ok(Value::Bool(compare(a, b)? == Ordering::Less)),
        BinaryOp::Le => Ok(Value::Bool(compare(a, b)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(compare(a, b)? == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(compare(a, b)? != Ordering::Less)),
    }
}

/// Numbers compare by numeric value (`1 == 1.0`); everything else by
/// structural equality.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            compare(a, b).map(|o| o == Ordering::Equal).unwrap_or(false)
        }
        _ => a == b,
    }
}

fn numeric(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    let (da, db) = match (a.as_f64(), b.as_f64()) {
        (Some(da), Some(db)) => (da, db),
        _ => {
            return Err(CalcError::InvalidArgument(format!(
                "operator expects numeric operands, got {a} and {b}"
            )))
        }
    };
    let out = match op {
        BinaryOp::Add => da + db,
        BinaryOp::Sub => da - db,
        BinaryOp::Mul => da * db,
        BinaryOp::Div => {
            if db == 0.0 {
                return Err(CalcError::Evaluation("division by zero".into()));
            }
            da / db
        }
        BinaryOp::Mod => {
            if db == 0.0 {
                return Err(CalcError::Evaluation("division by zero".into()));
            }
            da % db
        }
        BinaryOp::Pow => da.powf(db),
        _ => unreachable!("comparison handled above"),
    };
    Ok(number_value(out))
}

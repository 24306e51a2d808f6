//! Band-arithmetic expressions used as valid-pixel masks
//!
//! ```text
//! expr    := or ('?' expr ':' expr)?
//! or      := and (('||' | 'or') and)*
//! and     := cmp (('&&' | 'and') cmp)*
//! cmp     := sum (('==' | '!=' | '<' | '<=' | '>' | '>=') sum)?
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/') unary)*
//! unary   := ('-' | '!' | 'not') unary | primary
//! primary := number | 'true' | 'false' | 'NaN' | name | name '.' flag
//!          | func '(' expr ')' | '(' expr ')'
//! ```
//!
//! Booleans evaluate to 1 and 0; any non-zero, non-NaN value is true.

use crate::core::multilevel::{check_level, MultiLevelModel, MultiLevelSource, Raster};
use crate::product::{CodingSample, Product, SampleCoding};
use crate::types::{DataType, ReprojError, ReprojResult};
use ndarray::Array2;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    IsNan,
    IsInf,
    Abs,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Band(String),
    Flag { band: String, flag: String },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    const OPERATORS: [&str; 19] = [
        "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "(", ")", "?", ":", ".", ",",
    ];

    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{}'", literal))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected character '{}'", c))?;
            tokens.push(Token::Op(*op));
            i += op.len();
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
        self.pos += 1;
        token
    }

    fn accept_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn accept_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), String> {
        if self.accept_op(op) {
            Ok(())
        } else {
            Err(format!("expected '{}' at token {}", op, self.pos))
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        let condition = self.or()?;
        if self.accept_op("?") {
            let then = self.expression()?;
            self.expect_op(":")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise)));
        }
        Ok(condition)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        while self.accept_op("||") || self.accept_keyword("or") {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.comparison()?;
        while self.accept_op("&&") || self.accept_keyword("and") {
            let rhs = self.comparison()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.sum()?;
        let ops = [
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ];
        for (symbol, op) in ops {
            if self.accept_op(symbol) {
                let rhs = self.sum()?;
                return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn sum(&mut self) -> Result<Expr, String> {
        let mut lhs = self.product()?;
        loop {
            let op = if self.accept_op("+") {
                BinaryOp::Add
            } else if self.accept_op("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.accept_op("*") {
                BinaryOp::Mul
            } else if self.accept_op("/") {
                BinaryOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.accept_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.accept_op("!") || self.accept_keyword("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Expr::Number(v)),
            Some(Token::Op("(")) => {
                let inner = self.expression()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                match name.as_str() {
                    "true" => return Ok(Expr::Number(1.0)),
                    "false" => return Ok(Expr::Number(0.0)),
                    "NaN" => return Ok(Expr::Number(f64::NAN)),
                    _ => {}
                }
                if self.accept_op("(") {
                    let function = match name.as_str() {
                        "nan" => Function::IsNan,
                        "inf" => Function::IsInf,
                        "abs" => Function::Abs,
                        other => return Err(format!("unknown function '{}'", other)),
                    };
                    let arg = self.expression()?;
                    self.expect_op(")")?;
                    return Ok(Expr::Call(function, Box::new(arg)));
                }
                if self.accept_op(".") {
                    return match self.next() {
                        Some(Token::Ident(flag)) => Ok(Expr::Flag { band: name, flag }),
                        _ => Err(format!("expected flag name after '{}.'", name)),
                    };
                }
                Ok(Expr::Band(name))
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parse an expression, reporting failures as configuration errors
pub fn parse(text: &str) -> ReprojResult<Expr> {
    let invalid = |reason: String| ReprojError::InvalidExpression {
        expression: text.to_string(),
        reason,
    };
    let tokens = tokenize(text).map_err(invalid)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression().map_err(invalid)?;
    if parser.pos < parser.tokens.len() {
        return Err(invalid(format!("unexpected trailing input at token {}", parser.pos)));
    }
    Ok(expr)
}

fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn boolean(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    /// Names of all bands the expression reads
    pub fn referenced_bands(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_bands(&mut names);
        names
    }

    fn collect_bands(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Band(name) | Expr::Flag { band: name, .. } => {
                names.insert(name.clone());
            }
            Expr::Unary(_, e) | Expr::Call(_, e) => e.collect_bands(names),
            Expr::Binary(_, a, b) => {
                a.collect_bands(names);
                b.collect_bands(names);
            }
            Expr::Conditional(c, a, b) => {
                c.collect_bands(names);
                a.collect_bands(names);
                b.collect_bands(names);
            }
        }
    }
}

/// Expression with band names resolved to input slots
#[derive(Debug, Clone)]
enum Bound {
    Number(f64),
    Input(usize),
    Flag(usize, Arc<SampleCoding>, CodingSample),
    Unary(UnaryOp, Box<Bound>),
    Binary(BinaryOp, Box<Bound>, Box<Bound>),
    Call(Function, Box<Bound>),
    Conditional(Box<Bound>, Box<Bound>, Box<Bound>),
}

impl Bound {
    fn eval(&self, inputs: &[f64]) -> f64 {
        match self {
            Bound::Number(v) => *v,
            Bound::Input(i) => inputs[*i],
            Bound::Flag(i, coding, sample) => boolean(coding.test(inputs[*i], sample)),
            Bound::Unary(UnaryOp::Neg, e) => -e.eval(inputs),
            Bound::Unary(UnaryOp::Not, e) => boolean(!truthy(e.eval(inputs))),
            Bound::Call(Function::IsNan, e) => boolean(e.eval(inputs).is_nan()),
            Bound::Call(Function::IsInf, e) => boolean(e.eval(inputs).is_infinite()),
            Bound::Call(Function::Abs, e) => e.eval(inputs).abs(),
            Bound::Conditional(c, a, b) => {
                if truthy(c.eval(inputs)) {
                    a.eval(inputs)
                } else {
                    b.eval(inputs)
                }
            }
            Bound::Binary(op, a, b) => {
                let x = a.eval(inputs);
                match op {
                    BinaryOp::And => return boolean(truthy(x) && truthy(b.eval(inputs))),
                    BinaryOp::Or => return boolean(truthy(x) || truthy(b.eval(inputs))),
                    _ => {}
                }
                let y = b.eval(inputs);
                match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Eq => boolean(x == y),
                    BinaryOp::Ne => boolean(x != y),
                    BinaryOp::Lt => boolean(x < y),
                    BinaryOp::Le => boolean(x <= y),
                    BinaryOp::Gt => boolean(x > y),
                    BinaryOp::Ge => boolean(x >= y),
                    BinaryOp::And | BinaryOp::Or => 0.0,
                }
            }
        }
    }
}

/// Pyramid whose levels are an expression evaluated over the levels of product rasters
pub struct ExpressionLevelSource {
    expression: String,
    bound: Bound,
    inputs: Vec<Arc<dyn MultiLevelSource>>,
    model: MultiLevelModel,
    data_type: DataType,
}

impl ExpressionLevelSource {
    /// Compile `expression` against the rasters and codings of `product`.
    ///
    /// Unknown bands, flags on bands without a coding and unknown flag names are
    /// configuration errors.
    pub fn new(
        expression: &str,
        product: &Product,
        model: MultiLevelModel,
        data_type: DataType,
    ) -> ReprojResult<Self> {
        let expr = parse(expression)?;
        let mut names: Vec<String> = Vec::new();
        let mut inputs: Vec<Arc<dyn MultiLevelSource>> = Vec::new();
        let bound = Self::bind(expression, &expr, product, &mut names, &mut inputs)?;
        log::debug!("Compiled expression '{}' over {:?}", expression, names);
        Ok(Self {
            expression: expression.to_string(),
            bound,
            inputs,
            model,
            data_type,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn bind(
        text: &str,
        expr: &Expr,
        product: &Product,
        names: &mut Vec<String>,
        inputs: &mut Vec<Arc<dyn MultiLevelSource>>,
    ) -> ReprojResult<Bound> {
        let invalid = |reason: String| ReprojError::InvalidExpression {
            expression: text.to_string(),
            reason,
        };
        let mut slot = |name: &str| -> ReprojResult<usize> {
            if let Some(i) = names.iter().position(|n| n == name) {
                return Ok(i);
            }
            let raster = product
                .raster(name)
                .ok_or_else(|| invalid(format!("unknown band '{}'", name)))?;
            names.push(name.to_string());
            inputs.push(Arc::clone(raster.source()));
            Ok(names.len() - 1)
        };

        Ok(match expr {
            Expr::Number(v) => Bound::Number(*v),
            Expr::Band(name) => Bound::Input(slot(name)?),
            Expr::Flag { band, flag } => {
                let i = slot(band)?;
                let coding = product
                    .raster(band)
                    .and_then(|b| b.sample_coding.clone())
                    .ok_or_else(|| invalid(format!("band '{}' has no flag or index coding", band)))?;
                let sample = coding
                    .sample(flag)
                    .cloned()
                    .ok_or_else(|| invalid(format!("'{}' is not defined in coding '{}'", flag, coding.name)))?;
                Bound::Flag(i, coding, sample)
            }
            Expr::Unary(op, e) => Bound::Unary(*op, Box::new(Self::bind(text, e, product, names, inputs)?)),
            Expr::Call(f, e) => Bound::Call(*f, Box::new(Self::bind(text, e, product, names, inputs)?)),
            Expr::Binary(op, a, b) => Bound::Binary(
                *op,
                Box::new(Self::bind(text, a, product, names, inputs)?),
                Box::new(Self::bind(text, b, product, names, inputs)?),
            ),
            Expr::Conditional(c, a, b) => Bound::Conditional(
                Box::new(Self::bind(text, c, product, names, inputs)?),
                Box::new(Self::bind(text, a, product, names, inputs)?),
                Box::new(Self::bind(text, b, product, names, inputs)?),
            ),
        })
    }
}

impl MultiLevelSource for ExpressionLevelSource {
    fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn create_image(&self, level: usize) -> ReprojResult<Raster> {
        check_level(&self.model, level)?;
        let bounds = self.model.level_bounds(level)?;
        let rasters = self
            .inputs
            .iter()
            .map(|input| input.create_image(level))
            .collect::<ReprojResult<Vec<Raster>>>()?;
        if let Some(bad) = rasters.iter().find(|r| r.bounds != bounds) {
            return Err(ReprojError::Processing(format!(
                "expression '{}': input level {} covers {:?}, expected {:?}",
                self.expression, level, bad.bounds, bounds
            )));
        }

        let mut values = vec![0.0; rasters.len()];
        let data = Array2::from_shape_fn((bounds.height, bounds.width), |(r, c)| {
            for (slot, raster) in values.iter_mut().zip(&rasters) {
                *slot = raster.data[[r, c]];
            }
            self.data_type.coerce(self.bound.eval(&values))
        });
        Raster::new(bounds, data, self.data_type)
    }
}

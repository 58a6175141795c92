//! A minimal compiler/evaluator for the predicate language named as
//! "the external filter compiler". The core engine only needs a
//! compiled [`FilterExpr`] it can evaluate against a decoded record and
//! walk to build a Bloom-index predicate tree; this module gives
//! that collaborator a small, real implementation instead of a stub.

use std::net::IpAddr;

use crate::field::{self, FieldId};
use crate::record::{canonicalize_addr, FlowRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// An address literal. `mask` is `None` for a bare `a.b.c.d` literal and
    /// `Some(width)` for a `a.b.c.d/width` literal; the Bloom-index builder
    /// only turns `None`-mask equality tests into leaves.
    Addr { bytes: [u8; 16], mask: Option<u8> },
    Num(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Cmp { field: FieldId, op: CmpOp, value: Value },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unexpected end of filter expression")]
    UnexpectedEof,
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("expected token {expected:?}, got {got:?}")]
    Expected { expected: String, got: String },
    #[error("cannot parse literal {0:?}")]
    BadLiteral(String),
}

/// Compile a filter string. An empty/whitespace-only string compiles to
/// "no filter" (`None`), matching every record.
pub fn compile(src: &str) -> Result<Option<FilterExpr>, FilterError> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let tokens = tokenize(trimmed);
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(FilterError::Expected {
            expected: "end of expression".to_string(),
            got: parser.tokens[parser.pos].clone(),
        });
    }
    Ok(Some(expr))
}

fn tokenize(src: &str) -> Vec<String> {
    let mut spaced = String::with_capacity(src.len() * 2);
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => {
                spaced.push(' ');
                spaced.push(c);
                spaced.push(' ');
            }
            '=' | '!' | '<' | '>' => {
                spaced.push(' ');
                spaced.push(c);
                if matches!(chars.peek(), Some('=')) {
                    spaced.push(chars.next().unwrap());
                }
                spaced.push(' ');
            }
            _ => spaced.push(c),
        }
    }
    spaced.split_whitespace().map(str::to_string).collect()
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn bump(&mut self) -> Result<&'a str, FilterError> {
        let tok = self.tokens.get(self.pos).ok_or(FilterError::UnexpectedEof)?;
        self.pos += 1;
        Ok(tok.as_str())
    }

    fn parse_expr(&mut self) -> Result<FilterExpr, FilterError> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek().map(str::to_ascii_lowercase).as_deref() {
                Some("and") => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    lhs = FilterExpr::And(Box::new(lhs), Box::new(rhs));
                }
                Some("or") => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    lhs = FilterExpr::Or(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<FilterExpr, FilterError> {
        if self.peek() == Some("(") {
            self.pos += 1;
            let inner = self.parse_expr()?;
            let close = self.bump()?;
            if close != ")" {
                return Err(FilterError::Expected {
                    expected: ")".to_string(),
                    got: close.to_string(),
                });
            }
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr, FilterError> {
        let field = self.parse_field()?;
        let op = self.parse_op();
        let literal = self.bump()?;
        let value = parse_literal(literal, field)?;
        Ok(FilterExpr::Cmp { field, op, value })
    }

    fn parse_field(&mut self) -> Result<FieldId, FilterError> {
        let first = self.bump()?.to_ascii_lowercase();
        let alias_second = self.peek().map(str::to_ascii_lowercase);
        if let Some(second) = &alias_second {
            if let Some(id) = resolve_alias(&first, second) {
                self.pos += 1;
                return Ok(id);
            }
        }
        field::by_name(&first)
            .map(|f| f.id)
            .ok_or(FilterError::UnknownField(first))
    }

    fn parse_op(&mut self) -> CmpOp {
        match self.peek() {
            Some("==") => {
                self.pos += 1;
                CmpOp::Eq
            }
            Some("!=") => {
                self.pos += 1;
                CmpOp::Ne
            }
            Some("<") => {
                self.pos += 1;
                CmpOp::Lt
            }
            Some("<=") => {
                self.pos += 1;
                CmpOp::Le
            }
            Some(">") => {
                self.pos += 1;
                CmpOp::Gt
            }
            Some(">=") => {
                self.pos += 1;
                CmpOp::Ge
            }
            // "src port 53" shorthand: no operator token means equality.
            _ => CmpOp::Eq,
        }
    }
}

fn resolve_alias(first: &str, second: &str) -> Option<FieldId> {
    match (first, second) {
        ("src", "ip") => field::by_name("srcaddr").map(|f| f.id),
        ("dst", "ip") => field::by_name("dstaddr").map(|f| f.id),
        ("src", "port") => field::by_name("srcport").map(|f| f.id),
        ("dst", "port") => field::by_name("dstport").map(|f| f.id),
        _ => None,
    }
}

fn parse_literal(token: &str, field: FieldId) -> Result<Value, FilterError> {
    let entry = field::by_id(field).ok_or_else(|| FilterError::UnknownField(format!("{field:?}")))?;
    if entry.data_type.is_address() {
        let (addr_part, mask) = match token.split_once('/') {
            Some((a, m)) => (
                a,
                Some(m.parse::<u8>().map_err(|_| FilterError::BadLiteral(token.to_string()))?),
            ),
            None => (token, None),
        };
        let ip: IpAddr = addr_part
            .parse()
            .map_err(|_| FilterError::BadLiteral(token.to_string()))?;
        Ok(Value::Addr { bytes: canonicalize_addr(ip), mask })
    } else {
        let n: u64 = token
            .parse()
            .map_err(|_| FilterError::BadLiteral(token.to_string()))?;
        Ok(Value::Num(n))
    }
}

impl FilterExpr {
    pub fn evaluate(&self, record: &FlowRecord) -> bool {
        match self {
            FilterExpr::And(a, b) => a.evaluate(record) && b.evaluate(record),
            FilterExpr::Or(a, b) => a.evaluate(record) || b.evaluate(record),
            FilterExpr::Cmp { field, op, value } => evaluate_cmp(*field, *op, value, record),
        }
    }
}

fn field_num(field: FieldId, record: &FlowRecord) -> Option<u64> {
    match field::by_id(field)?.name {
        "srcport" => Some(record.srcport as u64),
        "dstport" => Some(record.dstport as u64),
        "proto" => Some(record.proto as u64),
        "tcpflags" => Some(record.tcpflags as u64),
        "packets" => Some(record.packets),
        "bytes" => Some(record.bytes),
        "first" => Some(record.first),
        "last" => Some(record.last),
        _ => None,
    }
}

fn field_addr(field: FieldId, record: &FlowRecord) -> Option<[u8; 16]> {
    match field::by_id(field)?.name {
        "srcaddr" => Some(record.srcaddr),
        "dstaddr" => Some(record.dstaddr),
        _ => None,
    }
}

fn apply_mask(bytes: [u8; 16], mask: u8) -> [u8; 16] {
    let mut out = bytes;
    let full_bytes = (mask / 8) as usize;
    let rem_bits = mask % 8;
    for b in out.iter_mut().skip(full_bytes.min(16)) {
        *b = 0;
    }
    if full_bytes < 16 && rem_bits > 0 {
        let keep_mask = 0xFFu8 << (8 - rem_bits);
        out[full_bytes] &= keep_mask;
    }
    out
}

fn evaluate_cmp(field: FieldId, op: CmpOp, value: &Value, record: &FlowRecord) -> bool {
    match value {
        Value::Addr { bytes, mask } => {
            let Some(actual) = field_addr(field, record) else { return false };
            let (lhs, rhs) = match mask {
                Some(m) => (apply_mask(actual, *m), apply_mask(*bytes, *m)),
                None => (actual, *bytes),
            };
            match op {
                CmpOp::Eq => lhs == rhs,
                CmpOp::Ne => lhs != rhs,
                _ => false,
            }
        }
        Value::Num(n) => {
            let Some(actual) = field_num(field, record) else { return false };
            match op {
                CmpOp::Eq => actual == *n,
                CmpOp::Ne => actual != *n,
                CmpOp::Lt => actual < *n,
                CmpOp::Le => actual <= *n,
                CmpOp::Gt => actual > *n,
                CmpOp::Ge => actual >= *n,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample() -> FlowRecord {
        FlowRecord {
            srcaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dstaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            srcport: 53,
            dstport: 12345,
            proto: 17,
            tcpflags: 0,
            packets: 5,
            bytes: 1000,
            first: 0,
            last: 1,
        }
    }

    #[test]
    fn src_port_shorthand_matches_equality() {
        let expr = compile("src port 53").unwrap().unwrap();
        assert!(expr.evaluate(&sample()));
        let expr = compile("src port 54").unwrap().unwrap();
        assert!(!expr.evaluate(&sample()));
    }

    #[test]
    fn dst_ip_equality_and_bytes_range_combine() {
        let expr = compile("dst ip == 10.0.0.2 and bytes > 500").unwrap().unwrap();
        assert!(expr.evaluate(&sample()));
    }

    #[test]
    fn empty_filter_compiles_to_none() {
        assert_eq!(compile("   ").unwrap(), None);
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Resolved values are cut to this many decimal digits before comparison so
/// that floating-point noise cannot flip a boundary test.
pub const COMPARE_DECIMALS: i32 = 10;

/// Truncate `value` toward zero at [`COMPARE_DECIMALS`] decimal digits.
/// Values too large to scale are returned unchanged.
pub fn truncate_decimals(value: f64) -> f64 {
    let scale = 10f64.powi(COMPARE_DECIMALS);
    let scaled = value * scale;
    if !scaled.is_finite() {
        return value;
    }
    scaled.trunc() / scale
}

/// Comparison operator of a condition expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    /// Compare two values after truncation.
    pub fn holds(self, a: f64, b: f64) -> bool {
        let (a, b) = (truncate_decimals(a), truncate_decimals(b));
        match self {
            Operator::Lt => a < b,
            Operator::Le => a <= b,
            Operator::Gt => a > b,
            Operator::Ge => a >= b,
            Operator::Eq => a == b,
            Operator::Ne => a != b,
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            other => Err(Error::InvalidOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        };
        f.write_str(s)
    }
}

/// A condition operand as it appears in a declaration: either a bare number
/// or a string (`"close"`, `"rsi.outReal"`, `"30"`, `"-2.5%"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOperand {
    Number(f64),
    Text(String),
}

impl From<&str> for RawOperand {
    fn from(s: &str) -> Self {
        RawOperand::Text(s.to_string())
    }
}

impl From<f64> for RawOperand {
    fn from(v: f64) -> Self {
        RawOperand::Number(v)
    }
}

/// A parsed operand reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(f64),
    /// `source` is `Some("candle")`, `Some(<analysis name>)`, or `None` for a
    /// bare field resolved by first match.
    Field {
        source: Option<String>,
        field: String,
    },
    /// Relative to the other operand's value one candle earlier.
    Percent(f64),
}

impl Operand {
    pub fn parse(raw: &RawOperand) -> Result<Self> {
        match raw {
            RawOperand::Number(v) if v.is_finite() => Ok(Operand::Literal(*v)),
            RawOperand::Number(v) => Err(Error::Config(format!("non-finite literal operand {v}"))),
            RawOperand::Text(s) => Self::parse_str(s),
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("empty operand".into()));
        }
        if let Some(pct) = s.strip_suffix('%') {
            return match pct.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Operand::Percent(v)),
                _ => Err(Error::Config(format!("malformed percentage operand '{s}'"))),
            };
        }
        if let Ok(v) = s.parse::<f64>() {
            if v.is_finite() {
                return Ok(Operand::Literal(v));
            }
        }
        match s.split_once('.') {
            Some((source, field)) if !source.is_empty() && !field.is_empty() => Ok(Operand::Field {
                source: Some(source.to_string()),
                field: field.to_string(),
            }),
            Some(_) => Err(Error::Config(format!("malformed field operand '{s}'"))),
            None => Ok(Operand::Field {
                source: None,
                field: s.to_string(),
            }),
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self, Operand::Field { .. })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Field { source: Some(s), field } => write!(f, "{s}.{field}"),
            Operand::Field { source: None, field } => f.write_str(field),
            Operand::Percent(v) => write!(f, "{v}%"),
        }
    }
}

/// `(operandA, operator, operandB)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub operator: Operator,
    pub right: Operand,
}

impl Condition {
    pub fn parse(left: &str, operator: &str, right: &RawOperand) -> Result<Self> {
        let left = Operand::parse_str(left)?;
        if matches!(left, Operand::Percent(_)) {
            return Err(Error::Config(format!(
                "percentage operand '{left}' is only allowed on the right-hand side"
            )));
        }
        Ok(Self {
            left,
            operator: operator.parse()?,
            right: Operand::parse(right)?,
        })
    }

    /// Field operands referenced by this condition.
    pub fn fields(&self) -> impl Iterator<Item = &Operand> {
        [&self.left, &self.right].into_iter().filter(|o| o.is_field())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.operator, self.right)
    }
}

//! Operand resolution against a candle series and a set of indicator results.
//!
//! A reference that cannot be resolved at a given position yields
//! [`Unresolved`]. The matcher treats that as "no match here", never as a
//! value of zero.

use std::fmt;
use std::str::FromStr;

use common::condition::truncate_decimals;
use common::{CandleField, CandleSeries, Condition, Error, IndicatorResult, Operand};

/// Source name that pins a field to the candle series.
pub const CANDLE_SOURCE: &str = "candle";

/// Why an operand had no value at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// Outside the indicator's aligned range, or past the end of the series.
    OutOfRange,
    /// Percentage operand at position 0.
    NoPrevious,
    /// No candle field or indicator output with that name.
    MissingField,
    /// The source holds `NaN` at that position.
    NotANumber,
    /// A percentage operand with nothing to be relative to.
    DanglingPercent,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unresolved::OutOfRange => "index outside aligned range",
            Unresolved::NoPrevious => "no previous candle for percentage operand",
            Unresolved::MissingField => "field not found",
            Unresolved::NotANumber => "value is not a number",
            Unresolved::DanglingPercent => "percentage operand without a base",
        };
        f.write_str(s)
    }
}

impl From<Unresolved> for Error {
    fn from(u: Unresolved) -> Self {
        Error::DataUnavailable {
            reason: u.to_string(),
        }
    }
}

/// A resolved operand value and the indicator anchor it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub value: f64,
    pub offset: Option<usize>,
}

impl Resolved {
    fn literal(value: f64) -> Self {
        Self {
            value: truncate_decimals(value),
            offset: None,
        }
    }
}

/// The data one pattern is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct DataSet<'a> {
    pub candles: &'a CandleSeries,
    /// Searched in order for bare field names.
    pub indicators: &'a [IndicatorResult],
}

impl<'a> DataSet<'a> {
    pub fn new(candles: &'a CandleSeries, indicators: &'a [IndicatorResult]) -> Self {
        Self { candles, indicators }
    }

    fn indicator(&self, name: &str) -> Option<&'a IndicatorResult> {
        self.indicators.iter().find(|i| i.name == name)
    }

    /// Whether the field named by `operand` exists anywhere, independent of
    /// position. Non-field operands always exist.
    pub fn provides(&self, operand: &Operand) -> bool {
        match operand {
            Operand::Field {
                source: Some(source),
                field,
            } if source == CANDLE_SOURCE => CandleField::from_str(field).is_ok(),
            Operand::Field {
                source: Some(source),
                field,
            } => self.indicator(source).is_some_and(|i| i.has_field(field)),
            Operand::Field {
                source: None,
                field,
            } => {
                CandleField::from_str(field).is_ok()
                    || self.indicators.iter().any(|i| i.has_field(field))
            }
            Operand::Literal(_) | Operand::Percent(_) => true,
        }
    }

    /// Resolve a literal or field operand at `index`.
    pub fn resolve(&self, operand: &Operand, index: usize) -> Result<Resolved, Unresolved> {
        match operand {
            Operand::Literal(v) => Ok(Resolved::literal(*v)),
            Operand::Percent(_) => Err(Unresolved::DanglingPercent),
            Operand::Field { source, field } => {
                let (value, offset) = match source.as_deref() {
                    Some(CANDLE_SOURCE) => (self.candle_value(field, index)?, None),
                    Some(name) => {
                        let ind = self.indicator(name).ok_or(Unresolved::MissingField)?;
                        (indicator_value(ind, field, index)?, Some(ind.anchor()))
                    }
                    None => match CandleField::from_str(field) {
                        Ok(_) => (self.candle_value(field, index)?, None),
                        Err(_) => {
                            let ind = self
                                .indicators
                                .iter()
                                .find(|i| i.has_field(field))
                                .ok_or(Unresolved::MissingField)?;
                            (indicator_value(ind, field, index)?, Some(ind.anchor()))
                        }
                    },
                };
                Ok(Resolved {
                    value: truncate_decimals(value),
                    offset,
                })
            }
        }
    }

    /// Resolve both sides of `condition` at `index`. A percentage right-hand
    /// side becomes the left operand's value one candle earlier, adjusted by
    /// that percentage.
    pub fn resolve_condition(
        &self,
        condition: &Condition,
        index: usize,
    ) -> Result<(Resolved, Resolved), Unresolved> {
        let left = self.resolve(&condition.left, index)?;
        let right = match condition.right {
            Operand::Percent(pct) => {
                let previous = index.checked_sub(1).ok_or(Unresolved::NoPrevious)?;
                let base = self.resolve(&condition.left, previous)?;
                Resolved {
                    value: truncate_decimals(base.value + base.value * (pct / 100.0)),
                    offset: base.offset,
                }
            }
            ref other => self.resolve(other, index)?,
        };
        Ok((left, right))
    }

    fn candle_value(&self, field: &str, index: usize) -> Result<f64, Unresolved> {
        let field = CandleField::from_str(field).map_err(|_| Unresolved::MissingField)?;
        if index >= self.candles.len() {
            return Err(Unresolved::OutOfRange);
        }
        self.candles
            .value(field, index)
            .ok_or(Unresolved::NotANumber)
    }
}

fn indicator_value(ind: &IndicatorResult, field: &str, index: usize) -> Result<f64, Unresolved> {
    let anchor = ind.anchor();
    if index < anchor || index >= anchor + ind.element_count {
        return Err(Unresolved::OutOfRange);
    }
    if !ind.has_field(field) {
        return Err(Unresolved::MissingField);
    }
    ind.value_at(field, index).ok_or(Unresolved::NotANumber)
}

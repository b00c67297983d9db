//! Indicator declarations and the per-run indicator pipeline.

use std::str::FromStr;

use tracing::debug;

use common::{
    CandleField, CandleSeries, Error, IndicatorParams, IndicatorProvider, IndicatorResult, Result,
};

use crate::resolver::CANDLE_SOURCE;

/// What an analysis reads.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisInput {
    Candle(CandleField),
    /// An output field of an analysis declared earlier in the same strategy.
    Analysis { name: String, field: String },
}

impl AnalysisInput {
    /// `"close"`, `"candle.close"` or `"<analysis>.<field>"`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().split_once('.') {
            None => Ok(AnalysisInput::Candle(CandleField::from_str(s.trim())?)),
            Some((CANDLE_SOURCE, field)) => Ok(AnalysisInput::Candle(CandleField::from_str(field)?)),
            Some((name, field)) if !name.is_empty() && !field.is_empty() => {
                Ok(AnalysisInput::Analysis {
                    name: name.to_string(),
                    field: field.to_string(),
                })
            }
            Some(_) => Err(Error::Config(format!("malformed analysis input '{s}'"))),
        }
    }
}

impl std::fmt::Display for AnalysisInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisInput::Candle(field) => write!(f, "{CANDLE_SOURCE}.{field:?}"),
            AnalysisInput::Analysis { name, field } => write!(f, "{name}.{field}"),
        }
    }
}

/// One declared indicator instance. `name` is its identity within the
/// strategy, so two instances of one kind with different parameters stay
/// distinguishable.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub name: String,
    pub kind: String,
    pub input: AnalysisInput,
    pub params: IndicatorParams,
}

impl Analysis {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, input: AnalysisInput) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            input,
            params: IndicatorParams::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Run `analyses` in declaration order against `candles`.
///
/// An analysis fed by another analysis is re-based to candle positions:
/// its anchor becomes the parent's anchor plus its own `begin_index`.
pub fn run_analyses(
    analyses: &[Analysis],
    candles: &CandleSeries,
    provider: &dyn IndicatorProvider,
) -> Result<Vec<IndicatorResult>> {
    let mut results: Vec<IndicatorResult> = Vec::with_capacity(analyses.len());

    for analysis in analyses {
        let (input, parent_anchor) = match &analysis.input {
            AnalysisInput::Candle(field) => (candles.column(*field), None),
            AnalysisInput::Analysis { name, field } => {
                let parent = results.iter().find(|r| &r.name == name).ok_or_else(|| {
                    Error::MissingAnalysis {
                        analysis: analysis.name.clone(),
                        input: analysis.input.to_string(),
                    }
                })?;
                let column = parent.outputs.get(field).ok_or_else(|| {
                    Error::Config(format!(
                        "analysis '{}' reads '{name}.{field}', but '{name}' has no output '{field}'",
                        analysis.name
                    ))
                })?;
                (column.clone(), Some(parent.anchor()))
            }
        };

        let output = provider.compute(&analysis.kind, &analysis.params, &input)?;
        let result = IndicatorResult::new(analysis.name.clone(), output);
        if let Some(anchor) = parent_anchor {
            result.rebase(anchor + result.begin_index);
        }
        debug!(
            analysis = %analysis.name,
            kind = %analysis.kind,
            anchor = result.anchor(),
            count = result.element_count,
            "Analysis computed"
        );
        results.push(result);
    }

    Ok(results)
}

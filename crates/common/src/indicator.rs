use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::Result;

/// Numeric parameters of one indicator declaration (`period`, `fast`, ...).
pub type IndicatorParams = BTreeMap<String, f64>;

/// Raw output of the indicator library.
///
/// `outputs[field][0]` belongs to input position `begin_index`; every output
/// array holds `element_count` values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorOutput {
    pub begin_index: usize,
    pub element_count: usize,
    pub outputs: BTreeMap<String, Vec<f64>>,
}

/// Indicator computation collaborator. Must be deterministic for identical
/// `(kind, params, input)`.
pub trait IndicatorProvider: Send + Sync {
    fn compute(&self, kind: &str, params: &IndicatorParams, input: &[f64]) -> Result<IndicatorOutput>;

    /// Whether `kind` is known. Used to reject declarations before any run.
    fn supports(&self, _kind: &str) -> bool {
        true
    }
}

/// Output of one analysis within one strategy run, aligned to the candle
/// series.
#[derive(Debug, Clone)]
pub struct IndicatorResult {
    /// Declared analysis name; operands address it as `<name>.<field>`.
    pub name: String,
    pub begin_index: usize,
    pub element_count: usize,
    pub outputs: BTreeMap<String, Vec<f64>>,
    start_index: OnceLock<usize>,
}

impl IndicatorResult {
    pub fn new(name: impl Into<String>, output: IndicatorOutput) -> Self {
        Self {
            name: name.into(),
            begin_index: output.begin_index,
            element_count: output.element_count,
            outputs: output.outputs,
            start_index: OnceLock::new(),
        }
    }

    /// Re-base an indicator computed on another indicator's output to
    /// absolute candle positions. Only the first call has an effect.
    pub fn rebase(&self, start_index: usize) -> usize {
        *self.start_index.get_or_init(|| start_index)
    }

    /// Candle position of `outputs[..][0]`.
    pub fn anchor(&self) -> usize {
        self.start_index.get().copied().unwrap_or(self.begin_index)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.outputs.contains_key(field)
    }

    /// Value of `field` at candle position `index`, if it lies inside
    /// `[anchor, anchor + element_count)` and is a number.
    pub fn value_at(&self, field: &str, index: usize) -> Option<f64> {
        let anchor = self.anchor();
        if index < anchor || index >= anchor + self.element_count {
            return None;
        }
        self.outputs
            .get(field)?
            .get(index - anchor)
            .copied()
            .filter(|v| !v.is_nan())
    }
}

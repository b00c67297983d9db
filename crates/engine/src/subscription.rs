//! Count-based aggregates that subscription conditions are evaluated against.

use common::{Condition, Operand, TimeframeSnapshot};

/// Scalars derived from the latest ticks of a subscription's timeframes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregate {
    /// Largest per-timeframe match count.
    pub high: usize,
    /// Smallest per-timeframe match count.
    pub low: usize,
    /// Sum of match counts over all timeframes.
    pub total: usize,
    /// Signals of the firing timeframe not seen before.
    pub new: usize,
}

impl Aggregate {
    /// Aggregate the given snapshots. A timeframe that has not ticked yet
    /// counts as zero matches.
    pub fn collect<'a>(snapshots: impl IntoIterator<Item = Option<&'a TimeframeSnapshot>>, new: usize) -> Self {
        let counts: Vec<usize> = snapshots
            .into_iter()
            .map(|s| s.map_or(0, |s| s.match_count))
            .collect();
        Self {
            high: counts.iter().copied().max().unwrap_or(0),
            low: counts.iter().copied().min().unwrap_or(0),
            total: counts.iter().sum(),
            new,
        }
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        let v = match name {
            "high" => self.high,
            "low" => self.low,
            "total" => self.total,
            "new" => self.new,
            _ => return None,
        };
        Some(v as f64)
    }

    fn value(&self, operand: &Operand) -> Option<f64> {
        match operand {
            Operand::Literal(v) => Some(*v),
            Operand::Field { source: None, field } => self.scalar(field),
            _ => None,
        }
    }

    /// Whether every condition holds. A condition naming something other
    /// than a scalar or a literal never holds.
    pub fn satisfies(&self, conditions: &[Condition]) -> bool {
        conditions.iter().all(|c| {
            match (self.value(&c.left), self.value(&c.right)) {
                (Some(a), Some(b)) => c.operator.holds(a, b),
                _ => false,
            }
        })
    }
}

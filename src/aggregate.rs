//! Aggregation operators: associative, commutative folds over `f64` with an
//! identity. Candidate aggregates are combined pointwise across the `M`
//! aggregate columns, so any row partitioning across threads merges to the
//! same totals (up to floating-point reduction order).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationOp {
    Sum,
    Min,
    Max,
}

impl AggregationOp {
    /// The fold identity: `combine(identity(), x) == x`.
    #[inline]
    pub fn identity(self) -> f64 {
        match self {
            AggregationOp::Sum => 0.0,
            AggregationOp::Min => f64::INFINITY,
            AggregationOp::Max => f64::NEG_INFINITY,
        }
    }

    #[inline(always)]
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            AggregationOp::Sum => a + b,
            AggregationOp::Min => a.min(b),
            AggregationOp::Max => a.max(b),
        }
    }

    /// Folds a whole column, yielding the global aggregate for that column.
    pub fn fold_column(self, column: &[f64]) -> f64 {
        column.iter().fold(self.identity(), |acc, &x| self.combine(acc, x))
    }

    /// Pointwise combine of a row's aggregate vector into an accumulator.
    #[inline]
    pub fn combine_assign(ops: &[AggregationOp], acc: &mut [f64], row: &[f64]) {
        debug_assert_eq!(ops.len(), acc.len());
        debug_assert_eq!(ops.len(), row.len());
        for (j, op) in ops.iter().enumerate() {
            acc[j] = op.combine(acc[j], row[j]);
        }
    }
}

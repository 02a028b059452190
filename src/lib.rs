//! # apriori-explain
//!
//! A multi-threaded, APriori-style explanation engine for tabular analytics.
//! Given rows of pre-encoded categorical attributes plus additive aggregate
//! columns (count, outlier count, ...), the engine finds every attribute
//! combination of arity 1-3 whose aggregates satisfy a conjunction of quality
//! metrics, and reports each with its aggregates and metric values.
//!
//! ## How it works
//!
//! Enumeration is level-wise: order-1 singletons first, then pairs, then
//! triples, with APriori pruning between orders (a combination is only
//! visited if every member survived the previous order). Each order forks one
//! worker per row shard; workers aggregate into private fixed-capacity
//! open-addressed tables keyed by candidate sets packed into a single `u64`
//! (three 21-bit fields), and the controller merges shard tables into one
//! canonical map before pruning. High-cardinality encodings (codes at or
//! above `2^21 - 1`) transparently switch to array-backed keys.
//!
//! ## Performance characteristics
//!
//! - The hot loop does one hash-table upsert per (row, column tuple) with no
//!   allocation: keys are packed words, values live inline in the table.
//! - Tables are sized once per order from the frontier bound and never
//!   rehash.
//! - Workers share nothing; the only synchronization is the per-order join.
//!
//! ## Example
//!
//! ```rust
//! use apriori_explain::{AggregationOp, Explainer, MinCountMetric, SupportMetric};
//!
//! // Three rows, two attribute columns; aggregates are (count, outlier_count).
//! let attributes = vec![vec![1, 3], vec![1, 4], vec![2, 3]];
//! let aggregates = vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 0.0]];
//!
//! let mut explainer = Explainer::builder(8)
//!     .aggregation_ops([AggregationOp::Sum, AggregationOp::Sum])
//!     .metric(SupportMetric::new(1), 0.5)
//!     .metric(MinCountMetric::new(0), 1.0)
//!     .max_order(2)
//!     .num_threads(2)
//!     .build()?;
//!
//! let explanation = explainer.explain(&attributes, &aggregates)?;
//! for result in &explanation.results {
//!     println!("{}: {:?}", result.set, result.metric_values);
//! }
//! # Ok::<(), apriori_explain::ExplainError>(())
//! ```

pub mod aggregate;
pub mod error;
pub mod explain;
pub mod intset;
pub mod metrics;
pub mod table;

// Internal: worker-side enumeration and the on-disk format.
mod persistence;
mod shard;

pub use aggregate::AggregationOp;
pub use error::ExplainError;
pub use explain::{Explainer, ExplainerBuilder, Explanation, ItemsetResult};
pub use intset::{IntSet, SetKey, MAX_PACKED_CODE, NO_SUPPORT};
pub use metrics::{Action, MinCountMetric, QualityMetric, RiskRatioMetric, SupportMetric};
pub use table::FixedAggregateTable;

#[cfg(test)]
mod tests {
    use super::*;

    fn outlier_explainer(cardinality: u32, t1: f64, t2: f64, max_order: usize) -> Explainer {
        Explainer::builder(cardinality)
            .aggregation_ops([AggregationOp::Sum, AggregationOp::Sum])
            .metric(SupportMetric::new(1), t1)
            .metric(MinCountMetric::new(0), t2)
            .max_order(max_order)
            .build()
            .unwrap()
    }

    #[test]
    fn test_basic_explanation() {
        let attributes = vec![vec![1, 3], vec![1, 4], vec![2, 3]];
        let aggregates = vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 0.0]];

        let mut explainer = outlier_explainer(8, 0.5, 1.0, 2);
        let explanation = explainer.explain(&attributes, &aggregates).unwrap();

        let mut sets: Vec<IntSet> = explanation.results.iter().map(|r| r.set).collect();
        sets.sort();
        let mut expected = vec![
            IntSet::single(1),
            IntSet::single(3),
            IntSet::single(4),
            IntSet::pair(1, 3),
            IntSet::pair(1, 4),
        ];
        expected.sort();
        assert_eq!(sets, expected);
    }

    #[test]
    fn test_results_carry_metric_values() {
        let attributes = vec![vec![6], vec![6]];
        let aggregates = vec![vec![1.0, 1.0], vec![1.0, 0.0]];

        let mut explainer = outlier_explainer(10, 0.0, 1.0, 1);
        let explanation = explainer.explain(&attributes, &aggregates).unwrap();

        assert_eq!(explanation.len(), 1);
        assert_eq!(explanation.metric_names, vec!["support", "min_count"]);
        let result = &explanation.results[0];
        assert_eq!(result.aggregates, vec![2.0, 1.0]);
        assert_eq!(result.metric_values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_explainer_is_reusable() {
        let mut explainer = outlier_explainer(10, 0.0, 1.0, 1);
        let attributes = vec![vec![5]];
        let aggregates = vec![vec![1.0], vec![1.0]];

        let first = explainer.explain(&attributes, &aggregates).unwrap();
        let second = explainer.explain(&attributes, &aggregates).unwrap();
        assert_eq!(first, second);
    }
}

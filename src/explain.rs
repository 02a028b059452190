//! Level-wise explanation controller.
//!
//! Drives candidate enumeration order by order: fork a worker per row shard,
//! join, merge the per-thread tables into one canonical map, evaluate every
//! metric, and carry the surviving frontier into the next order. All
//! per-invocation state lives inside [`Explainer::explain`] and is dropped on
//! return.

use std::panic::{self, AssertUnwindSafe};

use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationOp;
use crate::error::ExplainError;
use crate::intset::{IntSet, SetKey, MAX_PACKED_CODE, NO_SUPPORT};
use crate::metrics::{Action, QualityMetric};
use crate::shard::{aggregate_shard, ShardedData};

/// One reported subgroup: its attribute codes, accumulated aggregates, and
/// the value of every configured metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsetResult {
    pub set: IntSet,
    pub aggregates: Vec<f64>,
    pub metric_values: Vec<f64>,
}

/// The full result of one [`Explainer::explain`] call. Result order is
/// unspecified; consumers sort for presentation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Explanation {
    pub metric_names: Vec<String>,
    pub results: Vec<ItemsetResult>,
}

impl Explanation {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results holding exactly `order` attributes.
    pub fn of_order(&self, order: usize) -> impl Iterator<Item = &ItemsetResult> {
        self.results.iter().filter(move |r| r.set.order() == order)
    }
}

/// Builder for [`Explainer`] instances.
pub struct ExplainerBuilder {
    cardinality: u32,
    ops: Vec<AggregationOp>,
    metrics: Vec<Box<dyn QualityMetric>>,
    thresholds: Vec<f64>,
    max_order: usize,
    num_threads: usize,
    fail_workers: bool,
}

impl ExplainerBuilder {
    pub fn new(cardinality: u32) -> Self {
        ExplainerBuilder {
            cardinality,
            ops: Vec::new(),
            metrics: Vec::new(),
            thresholds: Vec::new(),
            max_order: 3,
            num_threads: 1,
            fail_workers: false,
        }
    }

    /// One aggregation operator per aggregate column, in column order.
    pub fn aggregation_ops(mut self, ops: impl IntoIterator<Item = AggregationOp>) -> Self {
        self.ops = ops.into_iter().collect();
        self
    }

    /// Adds a quality metric with its threshold. Candidates must satisfy every
    /// configured metric to be reported.
    pub fn metric(mut self, metric: impl QualityMetric + 'static, threshold: f64) -> Self {
        self.metrics.push(Box::new(metric));
        self.thresholds.push(threshold);
        self
    }

    /// Largest subgroup arity to enumerate, 1 through 3.
    pub fn max_order(mut self, max_order: usize) -> Self {
        self.max_order = max_order;
        self
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Makes every enumeration worker panic. Only exposed so tests can
    /// observe worker-failure propagation; do not use externally.
    #[doc(hidden)]
    pub fn fail_workers_for_testing(mut self) -> Self {
        self.fail_workers = true;
        self
    }

    pub fn build(self) -> Result<Explainer, ExplainError> {
        if !(1..=3).contains(&self.max_order) {
            return Err(ExplainError::UnsupportedOrder {
                order: self.max_order,
            });
        }
        if self.ops.is_empty() {
            return Err(ExplainError::InvalidConfig(
                "at least one aggregation op is required",
            ));
        }
        if self.metrics.is_empty() {
            return Err(ExplainError::InvalidConfig(
                "at least one quality metric is required",
            ));
        }
        if self.num_threads == 0 {
            return Err(ExplainError::InvalidConfig(
                "num_threads must be at least 1",
            ));
        }
        Ok(Explainer {
            cardinality: self.cardinality,
            ops: self.ops,
            metrics: self.metrics,
            thresholds: self.thresholds,
            max_order: self.max_order,
            num_threads: self.num_threads,
            fail_workers: self.fail_workers,
        })
    }
}

/// The level-wise enumeration engine. Configure once, call
/// [`explain`](Explainer::explain) per dataset.
pub struct Explainer {
    cardinality: u32,
    ops: Vec<AggregationOp>,
    metrics: Vec<Box<dyn QualityMetric>>,
    thresholds: Vec<f64>,
    max_order: usize,
    num_threads: usize,
    fail_workers: bool,
}

impl Explainer {
    pub fn builder(cardinality: u32) -> ExplainerBuilder {
        ExplainerBuilder::new(cardinality)
    }

    /// Finds every subgroup of arity up to the configured order whose
    /// aggregates satisfy all quality metrics.
    ///
    /// `attributes` is row-major (`R x C`, codes in `[0, cardinality)`, with
    /// code [`NO_SUPPORT`] marking filtered cells); `aggregates` is
    /// column-major (`M x R`), one column per configured aggregation op.
    pub fn explain(
        &mut self,
        attributes: &[Vec<u32>],
        aggregates: &[Vec<f64>],
    ) -> Result<Explanation, ExplainError> {
        self.validate(attributes, aggregates)?;

        // Global aggregates seed the metrics with their relative baselines.
        let global = self
            .ops
            .iter()
            .zip(aggregates)
            .map(|(op, column)| op.fold_column(column))
            .collect_vec();
        for metric in &mut self.metrics {
            metric.initialize(&global);
        }

        let data = ShardedData::new(attributes, aggregates, self.num_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| ExplainError::WorkerFailure(e.to_string()))?;

        let saved = if self.cardinality < MAX_PACKED_CODE {
            self.run_orders::<u64>(&data, &pool)?
        } else {
            warn!(
                "cardinality {} exceeds the packed-key limit {}; using array keys",
                self.cardinality, MAX_PACKED_CODE
            );
            self.run_orders::<IntSet>(&data, &pool)?
        };

        let results = saved
            .into_iter()
            .map(|(set, aggregates)| {
                let metric_values = self
                    .metrics
                    .iter()
                    .map(|m| m.value(&aggregates))
                    .collect();
                ItemsetResult {
                    set,
                    aggregates,
                    metric_values,
                }
            })
            .collect();

        Ok(Explanation {
            metric_names: self.metrics.iter().map(|m| m.name().to_owned()).collect_vec(),
            results,
        })
    }

    fn validate(
        &self,
        attributes: &[Vec<u32>],
        aggregates: &[Vec<f64>],
    ) -> Result<(), ExplainError> {
        let num_rows = attributes.len();
        let num_columns = attributes.first().map_or(0, Vec::len);
        for row in attributes {
            if row.len() != num_columns {
                return Err(ExplainError::DimensionMismatch {
                    what: "attribute row",
                    expected: num_columns,
                    actual: row.len(),
                });
            }
        }
        if aggregates.len() != self.ops.len() {
            return Err(ExplainError::DimensionMismatch {
                what: "aggregate columns",
                expected: self.ops.len(),
                actual: aggregates.len(),
            });
        }
        for column in aggregates {
            if column.len() != num_rows {
                return Err(ExplainError::DimensionMismatch {
                    what: "aggregate column length",
                    expected: num_rows,
                    actual: column.len(),
                });
            }
        }
        Ok(())
    }

    /// Runs every order with one key representation, returning the saved
    /// (reportable) candidates across all orders.
    fn run_orders<K: SetKey>(
        &self,
        data: &ShardedData,
        pool: &rayon::ThreadPool,
    ) -> Result<Vec<(IntSet, Vec<f64>)>, ExplainError> {
        let cardinality = self.cardinality as usize;
        let mut saved: Vec<(IntSet, Vec<f64>)> = Vec::new();
        let mut single_next: Vec<bool> = Vec::new();
        let mut pair_next: FxHashSet<IntSet> = FxHashSet::default();
        // Frontier singleton count, for sizing the next order's tables.
        let mut frontier_singles = 0usize;

        for order in 1..=self.max_order {
            let frontier_bound = match order {
                1 => cardinality,
                2 => frontier_singles.saturating_mul(frontier_singles),
                _ => frontier_singles
                    .saturating_mul(frontier_singles)
                    .saturating_mul(frontier_singles),
            };
            if order > 1 && frontier_singles == 0 {
                debug!("order {}: empty singleton frontier, stopping early", order);
                break;
            }

            let filter = (order > 1).then_some(single_next.as_slice());
            let merged = self.enumerate_and_merge::<K>(data, pool, order, filter, frontier_bound)?;

            let mut kept = 0usize;
            let mut to_next = 0usize;
            for (set, aggregates) in merged {
                let mut action = Action::Keep;
                for (metric, &threshold) in self.metrics.iter().zip(&self.thresholds) {
                    action = action.join(metric.action(&aggregates, threshold));
                    if action == Action::Prune {
                        break;
                    }
                }
                if order == 1 && set.first() == NO_SUPPORT {
                    action = Action::Prune;
                }
                if action == Action::Prune {
                    continue;
                }

                // Keep and Next both stay in the frontier: a reportable
                // candidate's refinements may be reportable too.
                to_next += 1;
                match order {
                    1 => {
                        let code = set.first() as usize;
                        if code >= cardinality {
                            // Encoder contract violation, caught before the
                            // singleton filter is indexed by it.
                            return Err(ExplainError::DimensionMismatch {
                                what: "attribute code",
                                expected: cardinality,
                                actual: code,
                            });
                        }
                        if single_next.is_empty() {
                            single_next = vec![false; cardinality];
                        }
                        single_next[code] = true;
                        frontier_singles += 1;
                    }
                    2 => {
                        pair_next.insert(set);
                    }
                    _ => {}
                }

                if action == Action::Keep {
                    // An order-3 candidate is reportable only if all three of
                    // its pair subsets survived order 2; that containment is
                    // only checkable here, after the order-2 frontier closed.
                    if order == 3
                        && !set
                            .pair_subsets()
                            .iter()
                            .all(|pair| pair_next.contains(pair))
                    {
                        continue;
                    }
                    kept += 1;
                    saved.push((set, aggregates));
                }
            }
            debug!(
                "order {}: kept {}, frontier {}",
                order, kept, to_next
            );
        }
        Ok(saved)
    }

    /// Forks one worker per shard, joins them, and folds their tables into a
    /// single canonically-keyed map. Shards are merged in shard order, so a
    /// run with a fixed thread count is reproducible.
    fn enumerate_and_merge<K: SetKey>(
        &self,
        data: &ShardedData,
        pool: &rayon::ThreadPool,
        order: usize,
        single_next: Option<&[bool]>,
        frontier_bound: usize,
    ) -> Result<FxHashMap<IntSet, Vec<f64>>, ExplainError> {
        let tables = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| {
                data.shards
                    .par_iter()
                    .map(|shard| {
                        if self.fail_workers {
                            // Test-only fail point, armed via the builder.
                            panic!("injected worker failure in shard at row {}", shard.start);
                        }
                        aggregate_shard::<K>(
                            shard,
                            data,
                            &self.ops,
                            order,
                            single_next,
                            frontier_bound,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
        }))
        .map_err(|cause| {
            let message = cause
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| cause.downcast_ref::<&str>().copied())
                .unwrap_or("worker panicked");
            ExplainError::WorkerFailure(message.to_owned())
        })??;

        let total: usize = tables.iter().map(|t| t.len()).sum();
        let mut merged: FxHashMap<IntSet, Vec<f64>> =
            FxHashMap::with_capacity_and_hasher(total, Default::default());
        for table in &tables {
            for (key, values) in table.iter() {
                merged
                    .entry(key.to_set())
                    .and_modify(|acc| AggregationOp::combine_assign(&self.ops, acc, values))
                    .or_insert_with(|| values.to_vec());
            }
        }
        debug!(
            "order {}: merged {} shard tables ({} entries) into {} candidates",
            order,
            tables.len(),
            total,
            merged.len()
        );
        Ok(merged)
    }
}

//! Row-sharded candidate enumeration.
//!
//! The controller splits the row space into contiguous shards, one per worker.
//! Each shard holds its own column-major copy of the attribute matrix so the
//! inner loops scan a column at unit stride, and every worker aggregates into
//! a private fixed-capacity table; nothing is shared until the merge.

use log::trace;

use crate::aggregate::AggregationOp;
use crate::error::ExplainError;
use crate::intset::{SetKey, NO_SUPPORT};
use crate::table::FixedAggregateTable;

/// One worker's slice of the dataset: rows `[start, start + rows)`,
/// transposed column-major.
pub(crate) struct Shard {
    pub start: usize,
    pub rows: usize,
    /// `columns[c][local_row]` = attribute code.
    pub columns: Vec<Vec<u32>>,
}

/// The per-invocation data layout: sharded attribute transpose plus a
/// row-major copy of the aggregate columns for constant-stride row access.
pub(crate) struct ShardedData {
    pub shards: Vec<Shard>,
    /// `rows * width`, row-major.
    row_aggregates: Vec<f64>,
    pub num_columns: usize,
    pub width: usize,
}

impl ShardedData {
    pub fn new(attributes: &[Vec<u32>], aggregates: &[Vec<f64>], num_shards: usize) -> Self {
        let num_rows = attributes.len();
        let num_columns = attributes.first().map_or(0, Vec::len);
        let width = aggregates.len();

        let mut row_aggregates = vec![0.0; num_rows * width];
        for (j, column) in aggregates.iter().enumerate() {
            for (r, &v) in column.iter().enumerate() {
                row_aggregates[r * width + j] = v;
            }
        }

        let num_shards = num_shards.min(num_rows).max(1);
        let mut shards = Vec::with_capacity(num_shards);
        for s in 0..num_shards {
            let start = s * num_rows / num_shards;
            let end = (s + 1) * num_rows / num_shards;
            let columns = (0..num_columns)
                .map(|c| attributes[start..end].iter().map(|row| row[c]).collect())
                .collect();
            shards.push(Shard {
                start,
                rows: end - start,
                columns,
            });
        }

        ShardedData {
            shards,
            row_aggregates,
            num_columns,
            width,
        }
    }

    #[inline(always)]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.row_aggregates[r * self.width..][..self.width]
    }
}

/// Binomial coefficient, saturating; bounds the number of column tuples.
fn choose(n: usize, k: usize) -> usize {
    match k {
        1 => n,
        2 => n.saturating_mul(n.saturating_sub(1)) / 2,
        3 => n
            .saturating_mul(n.saturating_sub(1))
            .saturating_mul(n.saturating_sub(2))
            / 6,
        _ => 0,
    }
}

/// Enumerates all order-`order` candidates in one shard and aggregates them
/// into a private table.
///
/// Filters applied before any key is built: a cell holding `NO_SUPPORT` never
/// contributes, and for orders above 1 every member must be a singleton that
/// survived order-1 pruning (`single_next`). The order-2 subset check for
/// triples is deliberately absent here; the controller applies it after the
/// merge, once the order-2 frontier is known.
pub(crate) fn aggregate_shard<K: SetKey>(
    shard: &Shard,
    data: &ShardedData,
    ops: &[AggregationOp],
    order: usize,
    single_next: Option<&[bool]>,
    frontier_bound: usize,
) -> Result<FixedAggregateTable<K>, ExplainError> {
    let tuple_bound = shard.rows.saturating_mul(choose(data.num_columns, order));
    let expected = frontier_bound.min(tuple_bound);
    let mut table = FixedAggregateTable::new(expected, data.width);

    match order {
        1 => order_one(shard, data, ops, &mut table)?,
        2 => {
            let next = single_next.expect("order 2 requires the singleton frontier");
            order_two(shard, data, ops, next, &mut table)?;
        }
        3 => {
            let next = single_next.expect("order 3 requires the singleton frontier");
            order_three(shard, data, ops, next, &mut table)?;
        }
        _ => return Err(ExplainError::UnsupportedOrder { order }),
    }

    trace!(
        "shard at row {}: {} order-{} candidates from {} rows",
        shard.start,
        table.len(),
        order,
        shard.rows
    );
    Ok(table)
}

/// Out-of-range codes read as "not in the frontier"; anything in range was
/// either marked at order 1 or pruned.
#[inline(always)]
fn in_frontier(single_next: &[bool], code: u32) -> bool {
    single_next.get(code as usize).copied().unwrap_or(false)
}

fn order_one<K: SetKey>(
    shard: &Shard,
    data: &ShardedData,
    ops: &[AggregationOp],
    table: &mut FixedAggregateTable<K>,
) -> Result<(), ExplainError> {
    for column in &shard.columns {
        for (local, &code) in column.iter().enumerate() {
            if code == NO_SUPPORT {
                continue;
            }
            let row = data.row(shard.start + local);
            table.combine(K::single(code), row, ops)?;
        }
    }
    Ok(())
}

fn order_two<K: SetKey>(
    shard: &Shard,
    data: &ShardedData,
    ops: &[AggregationOp],
    single_next: &[bool],
    table: &mut FixedAggregateTable<K>,
) -> Result<(), ExplainError> {
    let cols = shard.columns.len();
    for c1 in 0..cols {
        for c2 in c1 + 1..cols {
            let (first, second) = (&shard.columns[c1], &shard.columns[c2]);
            for local in 0..shard.rows {
                let a = first[local];
                let b = second[local];
                if a == NO_SUPPORT || b == NO_SUPPORT {
                    continue;
                }
                if !in_frontier(single_next, a) || !in_frontier(single_next, b) {
                    continue;
                }
                let row = data.row(shard.start + local);
                table.combine(K::pair(a, b), row, ops)?;
            }
        }
    }
    Ok(())
}

fn order_three<K: SetKey>(
    shard: &Shard,
    data: &ShardedData,
    ops: &[AggregationOp],
    single_next: &[bool],
    table: &mut FixedAggregateTable<K>,
) -> Result<(), ExplainError> {
    let cols = shard.columns.len();
    for c1 in 0..cols {
        for c2 in c1 + 1..cols {
            for c3 in c2 + 1..cols {
                let (first, second, third) = (
                    &shard.columns[c1],
                    &shard.columns[c2],
                    &shard.columns[c3],
                );
                for local in 0..shard.rows {
                    let a = first[local];
                    let b = second[local];
                    let c = third[local];
                    if a == NO_SUPPORT || b == NO_SUPPORT || c == NO_SUPPORT {
                        continue;
                    }
                    if !in_frontier(single_next, a)
                        || !in_frontier(single_next, b)
                        || !in_frontier(single_next, c)
                    {
                        continue;
                    }
                    let row = data.row(shard.start + local);
                    table.combine(K::triple(a, b, c), row, ops)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intset::IntSet;

    const OPS: [AggregationOp; 2] = [AggregationOp::Sum, AggregationOp::Sum];

    fn sample_data(num_shards: usize) -> ShardedData {
        // Rows: (1,7), (1,8), (2,7), (2,8); count column plus outlier column.
        let attributes = vec![vec![1, 7], vec![1, 8], vec![2, 7], vec![2, 8]];
        let aggregates = vec![vec![1.0; 4], vec![1.0, 0.0, 0.0, 0.0]];
        ShardedData::new(&attributes, &aggregates, num_shards)
    }

    #[test]
    fn transpose_is_column_major_per_shard() {
        let data = sample_data(2);
        assert_eq!(data.shards.len(), 2);
        assert_eq!(data.shards[0].columns[0], vec![1, 1]);
        assert_eq!(data.shards[0].columns[1], vec![7, 8]);
        assert_eq!(data.shards[1].start, 2);
        assert_eq!(data.shards[1].columns[0], vec![2, 2]);
        assert_eq!(data.row(0), &[1.0, 1.0]);
        assert_eq!(data.row(3), &[1.0, 0.0]);
    }

    #[test]
    fn order_one_aggregates_each_cell() {
        let data = sample_data(1);
        let table: FixedAggregateTable<u64> =
            aggregate_shard(&data.shards[0], &data, &OPS, 1, None, 100).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(1), Some(&[2.0, 1.0][..]));
        assert_eq!(table.get(7), Some(&[2.0, 1.0][..]));
        assert_eq!(table.get(2), Some(&[2.0, 0.0][..]));
        assert_eq!(table.get(8), Some(&[2.0, 0.0][..]));
    }

    #[test]
    fn order_two_respects_singleton_frontier() {
        let data = sample_data(1);
        // Only codes 1 and 7 survived order 1.
        let mut single_next = vec![false; 10];
        single_next[1] = true;
        single_next[7] = true;

        let table: FixedAggregateTable<IntSet> =
            aggregate_shard(&data.shards[0], &data, &OPS, 2, Some(&single_next), 100).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(IntSet::pair(1, 7)), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn no_support_cells_skip_only_their_tuples() {
        // Second column of the first row is NO_SUPPORT; its singleton from the
        // first column must still aggregate.
        let attributes = vec![vec![3, NO_SUPPORT], vec![3, 4]];
        let aggregates = vec![vec![1.0, 1.0]];
        let data = ShardedData::new(&attributes, &aggregates, 1);

        let ones: FixedAggregateTable<u64> =
            aggregate_shard(&data.shards[0], &data, &OPS[..1], 1, None, 100).unwrap();
        assert_eq!(ones.get(3), Some(&[2.0][..]));
        assert_eq!(ones.get(4), Some(&[1.0][..]));
        assert_eq!(ones.get(NO_SUPPORT as u64), None);

        let single_next = vec![true; 10];
        let pairs: FixedAggregateTable<u64> =
            aggregate_shard(&data.shards[0], &data, &OPS[..1], 2, Some(&single_next), 100)
                .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs.get(crate::intset::pack_pair(3, 4)), Some(&[1.0][..]));
    }

    #[test]
    fn order_three_covers_column_triples() {
        let attributes = vec![vec![1, 2, 3], vec![1, 2, 3], vec![1, 2, 4]];
        let aggregates = vec![vec![1.0; 3]];
        let data = ShardedData::new(&attributes, &aggregates, 1);
        let single_next = vec![true; 8];

        let table: FixedAggregateTable<u64> =
            aggregate_shard(&data.shards[0], &data, &OPS[..1], 3, Some(&single_next), 100)
                .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(crate::intset::pack_triple(1, 2, 3)),
            Some(&[2.0][..])
        );
        assert_eq!(
            table.get(crate::intset::pack_triple(1, 2, 4)),
            Some(&[1.0][..])
        );
    }

    #[test]
    fn shard_bounds_cover_all_rows_exactly_once() {
        for num_rows in [1usize, 5, 16, 17] {
            for num_shards in [1usize, 2, 3, 8] {
                let attributes: Vec<Vec<u32>> = (0..num_rows).map(|_| vec![1]).collect();
                let aggregates = vec![vec![1.0; num_rows]];
                let data = ShardedData::new(&attributes, &aggregates, num_shards);
                let total: usize = data.shards.iter().map(|s| s.rows).sum();
                assert_eq!(total, num_rows);
                for pair in data.shards.windows(2) {
                    assert_eq!(pair[0].start + pair[0].rows, pair[1].start);
                }
            }
        }
    }
}

//! Fixed-capacity open-addressed aggregation table.
//!
//! The enumeration hot loop does one lookup-or-insert per (row, column tuple),
//! so the table trades generality for predictability: capacity is fixed at
//! construction (no rehashing, ever), keys and values live in two contiguous
//! arrays, and probing is linear over a power-of-two slot count. A reserved
//! key word marks empty slots; that word can never collide with a real
//! candidate because `NO_SUPPORT` cells are filtered out before insertion.

use crate::aggregate::AggregationOp;
use crate::error::ExplainError;
use crate::intset::SetKey;

pub struct FixedAggregateTable<K: SetKey> {
    keys: Vec<K>,
    /// `capacity * width` inline aggregate values, one stripe per slot.
    values: Vec<f64>,
    mask: usize,
    width: usize,
    len: usize,
}

impl<K: SetKey> FixedAggregateTable<K> {
    /// Sizes the table for `expected` distinct keys with bounded load factor:
    /// the slot count is the next power of two at or above four times that,
    /// and at least 16.
    pub fn new(expected: usize, width: usize) -> Self {
        let capacity = expected
            .saturating_mul(4)
            .max(16)
            .checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1));
        FixedAggregateTable {
            keys: vec![K::EMPTY; capacity],
            values: vec![0.0; capacity * width],
            mask: capacity - 1,
            width,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Looks up the aggregate vector stored for `key`. The reserved empty
    /// word is never stored, so looking it up yields `None`.
    pub fn get(&self, key: K) -> Option<&[f64]> {
        if key == K::EMPTY {
            return None;
        }
        let mut slot = key.slot_hash() as usize & self.mask;
        // Bounded sweep so a lookup in a completely full table terminates.
        for _ in 0..=self.mask {
            let stored = self.keys[slot];
            if stored == key {
                return Some(&self.values[slot * self.width..][..self.width]);
            }
            if stored == K::EMPTY {
                return None;
            }
            slot = (slot + 1) & self.mask;
        }
        None
    }

    /// Stores a copy of `value` under `key`, overwriting any previous value.
    pub fn put(&mut self, key: K, value: &[f64]) -> Result<(), ExplainError> {
        debug_assert_eq!(value.len(), self.width);
        let slot = self.find_slot(key)?;
        if self.keys[slot] == K::EMPTY {
            self.keys[slot] = key;
            self.len += 1;
        }
        self.values[slot * self.width..][..self.width].copy_from_slice(value);
        Ok(())
    }

    /// The hot path: folds a row's aggregate vector into the entry for `key`,
    /// inserting a copy of the row on first sight.
    #[inline]
    pub fn combine(
        &mut self,
        key: K,
        row: &[f64],
        ops: &[AggregationOp],
    ) -> Result<(), ExplainError> {
        debug_assert_eq!(row.len(), self.width);
        let slot = self.find_slot(key)?;
        let stripe = &mut self.values[slot * self.width..][..self.width];
        if self.keys[slot] == K::EMPTY {
            self.keys[slot] = key;
            self.len += 1;
            stripe.copy_from_slice(row);
        } else {
            AggregationOp::combine_assign(ops, stripe, row);
        }
        Ok(())
    }

    /// Linear probe to the slot holding `key`, or the empty slot where it
    /// belongs. A full sweep without either is a sizing bug.
    #[inline(always)]
    fn find_slot(&self, key: K) -> Result<usize, ExplainError> {
        debug_assert!(key != K::EMPTY);
        let mut slot = key.slot_hash() as usize & self.mask;
        let mut probes = 0usize;
        loop {
            let stored = self.keys[slot];
            if stored == key || stored == K::EMPTY {
                return Ok(slot);
            }
            probes += 1;
            if probes > self.mask {
                return Err(ExplainError::CapacityExceeded {
                    capacity: self.keys.len(),
                });
            }
            slot = (slot + 1) & self.mask;
        }
    }

    /// Iterates occupied slots in slot order (deterministic for a fixed
    /// insertion sequence).
    pub fn iter(&self) -> impl Iterator<Item = (K, &[f64])> + '_ {
        self.keys
            .iter()
            .enumerate()
            .filter(|(_, &k)| k != K::EMPTY)
            .map(move |(slot, &k)| (k, &self.values[slot * self.width..][..self.width]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intset::IntSet;

    const OPS: [AggregationOp; 2] = [AggregationOp::Sum, AggregationOp::Sum];

    #[test]
    fn combine_inserts_then_folds() {
        let mut table: FixedAggregateTable<u64> = FixedAggregateTable::new(8, 2);
        table.combine(5, &[1.0, 1.0], &OPS).unwrap();
        table.combine(5, &[2.0, 0.0], &OPS).unwrap();
        table.combine(9, &[1.0, 0.0], &OPS).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(5), Some(&[3.0, 1.0][..]));
        assert_eq!(table.get(9), Some(&[1.0, 0.0][..]));
        assert_eq!(table.get(7), None);
    }

    #[test]
    fn put_copies_and_overwrites() {
        let mut table: FixedAggregateTable<u64> = FixedAggregateTable::new(4, 1);
        let value = [2.5];
        table.put(3, &value).unwrap();
        table.put(3, &[4.0]).unwrap();
        assert_eq!(table.get(3), Some(&[4.0][..]));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn array_keys_work_identically() {
        let mut table: FixedAggregateTable<IntSet> = FixedAggregateTable::new(8, 1);
        table
            .combine(IntSet::pair(4, 2), &[1.0], &OPS[..1])
            .unwrap();
        table
            .combine(IntSet::pair(2, 4), &[1.0], &OPS[..1])
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(IntSet::pair(2, 4)), Some(&[2.0][..]));
    }

    #[test]
    fn probing_survives_a_full_table() {
        // Fill every slot of a minimum-capacity table; lookups must still
        // terminate, for present and absent keys alike.
        let mut table: FixedAggregateTable<u64> = FixedAggregateTable::new(1, 1);
        let capacity = table.capacity() as u64;
        for key in 1..=capacity {
            table.combine(key, &[key as f64], &OPS[..1]).unwrap();
        }
        assert_eq!(table.len(), table.capacity());
        for key in 1..=capacity {
            assert_eq!(table.get(key), Some(&[key as f64][..]));
        }
        assert_eq!(table.get(capacity + 1), None);
    }

    #[test]
    fn overflowing_fixed_capacity_fails() {
        let mut table: FixedAggregateTable<u64> = FixedAggregateTable::new(1, 1);
        let capacity = table.capacity() as u64;
        let mut result = Ok(());
        for key in 1..=capacity + 1 {
            result = table.combine(key, &[1.0], &OPS[..1]);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(
            result,
            Err(ExplainError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn iter_yields_all_entries() {
        let mut table: FixedAggregateTable<u64> = FixedAggregateTable::new(8, 1);
        for key in [11u64, 22, 33] {
            table.combine(key, &[1.0], &OPS[..1]).unwrap();
        }
        let mut keys: Vec<u64> = table.iter().map(|(k, _)| k).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![11, 22, 33]);
    }
}

//! Approximate membership summary.
//!
//! One bloom filter per tracked column, sized at build time from the number of
//! distinct values the column held. Equality predicates whose literal hashes to
//! an unset bit cannot match.

use crate::codec::{encode_len, read_u32, read_u64, BinarySection, JsonSection};
use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use crate::predicate::FilterResult;
use crate::value::{ColumnId, Value};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Per-column bloom filters of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipSummary {
    /// False positive rate the filters were sized for.
    false_positive_rate: f64,
    columns: BTreeMap<ColumnId, BloomFilter>,
}

impl MembershipSummary {
    /// Test whether `value` may occur in `column`.
    ///
    /// Untracked columns always answer `MayMatch`.
    pub fn may_contain(&self, column: ColumnId, value: &Value) -> FilterResult {
        match self.columns.get(&column) {
            Some(filter) if !filter.may_contain(&value.key_bytes()) => FilterResult::CannotMatch,
            _ => FilterResult::MayMatch,
        }
    }

    /// False positive rate the filters were sized for.
    pub fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    /// Returns true if `column` has a bloom filter.
    pub fn tracks(&self, column: ColumnId) -> bool {
        self.columns.contains_key(&column)
    }

    /// Number of summarised columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Total size of all bit arrays in bytes.
    pub fn memory_usage(&self) -> usize {
        self.columns.values().map(BloomFilter::size).sum()
    }

    fn check_rate(&self) -> std::result::Result<(), String> {
        if self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0 {
            Ok(())
        } else {
            Err(format!("Invalid false positive rate: {}", self.false_positive_rate))
        }
    }
}

/// Accumulates distinct values per column, then sizes one bloom filter each.
#[derive(Debug)]
pub struct MembershipSummaryBuilder {
    false_positive_rate: f64,
    min_bloom_bits: usize,
    keys: BTreeMap<ColumnId, HashSet<Vec<u8>>>,
}

impl MembershipSummaryBuilder {
    /// Create a builder targeting `false_positive_rate`.
    pub fn new(false_positive_rate: f64, min_bloom_bits: usize) -> Self {
        Self {
            false_positive_rate,
            min_bloom_bits,
            keys: BTreeMap::new(),
        }
    }

    /// Record that `column` holds `value`.
    pub fn observe(&mut self, column: ColumnId, value: &Value) {
        self.keys.entry(column).or_default().insert(value.key_bytes());
    }

    /// Number of distinct values observed for `column`.
    pub fn distinct_values(&self, column: ColumnId) -> usize {
        self.keys.get(&column).map_or(0, HashSet::len)
    }

    /// Build the summary.
    pub fn finish(self) -> MembershipSummary {
        let columns = self
            .keys
            .into_iter()
            .map(|(column, keys)| {
                let mut filter =
                    BloomFilter::new(keys.len(), self.false_positive_rate, self.min_bloom_bits);
                for key in &keys {
                    filter.add(key);
                }
                (column, filter)
            })
            .collect();

        MembershipSummary {
            false_positive_rate: self.false_positive_rate,
            columns,
        }
    }
}

impl BinarySection for MembershipSummary {
    const NAME: &'static str = "membership summary";

    fn body_len(&self) -> usize {
        8 + 4 + self.columns.values().map(|filter| 8 + filter.encoded_len()).sum::<usize>()
    }

    /// Format: [fp_rate: f64][column_count: u32]([column: u64][bloom filter])*
    fn encode_body(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u64_le(self.false_positive_rate.to_bits());
        buf.put_u32_le(encode_len(self.columns.len(), "membership column count")?);
        for (column, filter) in &self.columns {
            buf.put_u64_le(*column);
            filter.encode_into(buf);
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> Result<Self> {
        let false_positive_rate = f64::from_bits(read_u64(buf, "false positive rate")?);
        let count = read_u32(buf, "membership column count")?;

        let mut columns = BTreeMap::new();
        for _ in 0..count {
            let column = read_u64(buf, "membership column id")?;
            let filter = BloomFilter::decode_from(buf)?;
            if columns.insert(column, filter).is_some() {
                return Err(Error::corruption(format!("Duplicate membership column {}", column)));
            }
        }

        let summary = MembershipSummary {
            false_positive_rate,
            columns,
        };
        summary.check_rate().map_err(Error::corruption)?;
        Ok(summary)
    }
}

impl JsonSection for MembershipSummary {
    const JSON_TAG: &'static str = "membership_summary";

    fn validate(&self) -> Result<()> {
        self.check_rate().map_err(Error::missing_or_corrupt)?;
        for filter in self.columns.values() {
            filter.validate()?;
        }
        Ok(())
    }
}

//! Min/max range summary.
//!
//! For every tracked column the summary records the smallest and largest
//! observed value. A range predicate whose interval does not intersect
//! `[min, max]` cannot match any row of the block.

use crate::codec::{encode_len, read_u32, read_u64, BinarySection, JsonSection};
use crate::error::{Error, Result};
use crate::predicate::{FilterResult, ValueRange};
use crate::value::{ColumnId, Value, ValueKind};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Observed bounds of one column. `min <= max` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRange {
    /// Smallest observed value
    pub min: Value,
    /// Largest observed value
    pub max: Value,
}

/// Per-column min/max summary of a block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeSummary {
    columns: BTreeMap<ColumnId, ColumnRange>,
    /// Columns that received values of more than one kind while building.
    /// They are dropped from `columns` and ignored from then on.
    #[serde(skip)]
    mixed_kinds: BTreeSet<ColumnId>,
}

impl RangeSummary {
    /// Create an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Widen the bounds of `column` to include `value`.
    pub fn observe(&mut self, column: ColumnId, value: &Value) {
        if self.mixed_kinds.contains(&column) {
            return;
        }

        match self.columns.get_mut(&column) {
            None => {
                let range = ColumnRange {
                    min: value.clone(),
                    max: value.clone(),
                };
                self.columns.insert(column, range);
            }
            Some(range) => match (value.compare(&range.min), value.compare(&range.max)) {
                (Some(below), Some(above)) => {
                    if below == Ordering::Less {
                        range.min = value.clone();
                    }
                    if above == Ordering::Greater {
                        range.max = value.clone();
                    }
                }
                _ => {
                    log::warn!(
                        "Column {} holds values of mixed kinds, dropping its range summary",
                        column
                    );
                    self.columns.remove(&column);
                    self.mixed_kinds.insert(column);
                }
            },
        }
    }

    /// Bounds recorded for `column`, if any.
    pub fn column_range(&self, column: ColumnId) -> Option<&ColumnRange> {
        self.columns.get(&column)
    }

    /// Kind of the values recorded for `column`, if any.
    pub fn column_kind(&self, column: ColumnId) -> Option<ValueKind> {
        self.columns.get(&column).map(|range| range.min.kind())
    }

    /// Number of summarised columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if no column is summarised.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Test whether `predicate_range` can intersect the recorded bounds of `column`.
    pub fn overlaps(&self, column: ColumnId, predicate_range: &ValueRange) -> FilterResult {
        let Some(range) = self.columns.get(&column) else {
            return FilterResult::MayMatch;
        };

        if Self::is_empty_range(predicate_range)
            || Self::entirely_above(range, &predicate_range.low)
            || Self::entirely_below(range, &predicate_range.high)
        {
            FilterResult::CannotMatch
        } else {
            FilterResult::MayMatch
        }
    }

    /// The block's max is below the predicate's lower bound.
    fn entirely_above(range: &ColumnRange, low: &Bound<Value>) -> bool {
        match low {
            Bound::Included(v) => range.max.compare(v) == Some(Ordering::Less),
            Bound::Excluded(v) => {
                matches!(range.max.compare(v), Some(Ordering::Less | Ordering::Equal))
            }
            Bound::Unbounded => false,
        }
    }

    /// The block's min is above the predicate's upper bound.
    fn entirely_below(range: &ColumnRange, high: &Bound<Value>) -> bool {
        match high {
            Bound::Included(v) => range.min.compare(v) == Some(Ordering::Greater),
            Bound::Excluded(v) => {
                matches!(range.min.compare(v), Some(Ordering::Greater | Ordering::Equal))
            }
            Bound::Unbounded => false,
        }
    }

    /// `low > high`, or `low == high` with an excluded end.
    fn is_empty_range(range: &ValueRange) -> bool {
        let (low, low_inclusive) = match &range.low {
            Bound::Included(v) => (v, true),
            Bound::Excluded(v) => (v, false),
            Bound::Unbounded => return false,
        };
        let (high, high_inclusive) = match &range.high {
            Bound::Included(v) => (v, true),
            Bound::Excluded(v) => (v, false),
            Bound::Unbounded => return false,
        };
        match low.compare(high) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => !(low_inclusive && high_inclusive),
            _ => false,
        }
    }

    fn check_bounds(&self) -> std::result::Result<(), String> {
        for (column, range) in &self.columns {
            match range.min.compare(&range.max) {
                Some(Ordering::Less | Ordering::Equal) => {}
                Some(Ordering::Greater) => {
                    return Err(format!("Column {} has min greater than max", column));
                }
                None => return Err(format!("Column {} has bounds of different kinds", column)),
            }
        }
        Ok(())
    }
}

impl BinarySection for RangeSummary {
    const NAME: &'static str = "range summary";

    fn body_len(&self) -> usize {
        4 + self
            .columns
            .values()
            .map(|range| 8 + range.min.encoded_len() + range.max.encoded_len())
            .sum::<usize>()
    }

    /// Format: [column_count: u32]([column: u64][min: value][max: value])*
    fn encode_body(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32_le(encode_len(self.columns.len(), "range column count")?);
        for (column, range) in &self.columns {
            buf.put_u64_le(*column);
            range.min.encode_into(buf)?;
            range.max.encode_into(buf)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> Result<Self> {
        let count = read_u32(buf, "range column count")?;
        let mut summary = RangeSummary::new();
        for _ in 0..count {
            let column = read_u64(buf, "range column id")?;
            let min = Value::decode_from(buf)?;
            let max = Value::decode_from(buf)?;
            if summary.columns.insert(column, ColumnRange { min, max }).is_some() {
                return Err(Error::corruption(format!("Duplicate range column {}", column)));
            }
        }
        summary.check_bounds().map_err(Error::corruption)?;
        Ok(summary)
    }
}

impl JsonSection for RangeSummary {
    const JSON_TAG: &'static str = "range_summary";

    fn validate(&self) -> Result<()> {
        self.check_bounds().map_err(Error::missing_or_corrupt)
    }
}

//! Build task body: scans a block's values into both summaries.

use crate::config::FilterOptions;
use crate::filter::{MembershipSummary, MembershipSummaryBuilder, RangeSummary};
use crate::value::{ColumnId, Value};
use std::collections::BTreeSet;

/// Accumulates `(column, value)` observations for one block.
///
/// Usage:
/// ```
/// use roughdb::{FilterOptions, RoughFilterBuilder, Value};
///
/// let mut builder = RoughFilterBuilder::new(&FilterOptions::default());
/// builder.observe(1, &Value::Int(10));
/// builder.observe(1, &Value::Int(20));
/// let (membership, range) = builder.finish();
/// assert_eq!(range.num_columns(), 1);
/// assert_eq!(membership.num_columns(), 1);
/// ```
#[derive(Debug)]
pub struct RoughFilterBuilder {
    options: FilterOptions,
    membership: MembershipSummaryBuilder,
    range: RangeSummary,
    tracked: BTreeSet<ColumnId>,
    skipped: BTreeSet<ColumnId>,
    num_observed: u64,
}

impl RoughFilterBuilder {
    /// Create a builder using `options`.
    pub fn new(options: &FilterOptions) -> Self {
        Self {
            options: options.clone(),
            membership: MembershipSummaryBuilder::new(
                options.false_positive_rate,
                options.min_bloom_bits,
            ),
            range: RangeSummary::new(),
            tracked: BTreeSet::new(),
            skipped: BTreeSet::new(),
            num_observed: 0,
        }
    }

    /// Observe one value of `column`.
    pub fn observe(&mut self, column: ColumnId, value: &Value) {
        if !self.admit(column) {
            return;
        }
        self.membership.observe(column, value);
        self.range.observe(column, value);
        self.num_observed += 1;
    }

    /// Observe every value of one row.
    pub fn observe_row<'a, I>(&mut self, row: I)
    where
        I: IntoIterator<Item = (ColumnId, &'a Value)>,
    {
        for (column, value) in row {
            self.observe(column, value);
        }
    }

    /// Number of values fed into the summaries.
    pub fn num_observed(&self) -> u64 {
        self.num_observed
    }

    /// Finish the build.
    pub fn finish(self) -> (MembershipSummary, RangeSummary) {
        if !self.skipped.is_empty() {
            log::debug!(
                "Rough filter tracked {} columns, skipped {:?}",
                self.tracked.len(),
                self.skipped
            );
        }
        (self.membership.finish(), self.range)
    }

    fn admit(&mut self, column: ColumnId) -> bool {
        if self.tracked.contains(&column) {
            return true;
        }
        if !self.options.tracks(column) {
            return false;
        }
        if self.tracked.len() >= self.options.max_tracked_columns {
            self.skipped.insert(column);
            return false;
        }
        self.tracked.insert(column);
        true
    }
}

//! Configuration options for building rough filters.

use crate::value::ColumnId;

/// Default bloom filter false positive rate.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Options controlling how a rough filter is built.
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Target false positive rate of each per-column bloom filter.
    /// Default: 0.01 (1%)
    pub false_positive_rate: f64,

    /// Lower bound on the bit count of a per-column bloom filter.
    /// Default: 64
    pub min_bloom_bits: usize,

    /// Maximum number of columns tracked by one filter. Columns beyond the
    /// limit (in first-observed order) are not summarised and never prune.
    /// Default: 256
    pub max_tracked_columns: usize,

    /// If set, only these columns are summarised.
    /// Default: None (all observed columns)
    pub track_columns: Option<Vec<ColumnId>>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            min_bloom_bits: 64,
            max_tracked_columns: 256,
            track_columns: None,
        }
    }
}

impl FilterOptions {
    /// Creates a new FilterOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bloom filter false positive rate.
    pub fn false_positive_rate(mut self, rate: f64) -> Self {
        self.false_positive_rate = rate;
        self
    }

    /// Sets the minimum number of bits per bloom filter.
    pub fn min_bloom_bits(mut self, bits: usize) -> Self {
        self.min_bloom_bits = bits;
        self
    }

    /// Sets the maximum number of tracked columns.
    pub fn max_tracked_columns(mut self, value: usize) -> Self {
        self.max_tracked_columns = value;
        self
    }

    /// Restricts summarisation to the given columns.
    pub fn track_columns(mut self, columns: impl IntoIterator<Item = ColumnId>) -> Self {
        self.track_columns = Some(columns.into_iter().collect());
        self
    }

    /// Returns true if `column` may be summarised under these options.
    pub fn tracks(&self, column: ColumnId) -> bool {
        match &self.track_columns {
            Some(columns) => columns.contains(&column),
            None => true,
        }
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(crate::Error::invalid_argument(
                "false_positive_rate must be between 0 and 1",
            ));
        }
        if self.min_bloom_bits == 0 {
            return Err(crate::Error::invalid_argument("min_bloom_bits must be > 0"));
        }
        if self.max_tracked_columns == 0 {
            return Err(crate::Error::invalid_argument("max_tracked_columns must be > 0"));
        }
        Ok(())
    }
}

//! Summary structures that make up a rough filter.
//!
//! - [`RangeSummary`]: per-column min/max, answers range predicates.
//! - [`MembershipSummary`]: per-column bloom filters, answers equality predicates.

pub mod bloom;
pub mod membership;
pub mod range;

pub use bloom::BloomFilter;
pub use membership::{MembershipSummary, MembershipSummaryBuilder};
pub use range::{ColumnRange, RangeSummary};

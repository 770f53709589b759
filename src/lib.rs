//! # RoughDb - Fast Rough Filters for Column-Store Blocks
//!
//! RoughDb maintains a small, approximate summary per immutable storage block
//! so a query executor can skip blocks that provably hold no matching row,
//! without reading their column data.
//!
//! ## Architecture
//!
//! - **RangeSummary**: per-column min/max, prunes range predicates
//! - **MembershipSummary**: per-column bloom filters, prunes equality predicates
//! - **FastRoughFilter**: one per block; build-once latch, lock-free publish,
//!   predicate evaluation
//! - **RoughFilterCodec**: exact binary record and checkpoint JSON field group
//! - **FilterCatalog**: block registry, pruning over many blocks, checkpoint
//!   documents
//! - **Filter segment**: append-only file of checksummed binary records
//!
//! A filter only ever errs towards "may match": unbuilt, partially recovered
//! or corrupted filters cost a scan, never a wrong result.
//!
//! ## Example Usage
//!
//! ```rust
//! use roughdb::{FastRoughFilter, FilterOptions, FilterResult, Predicate, Value};
//!
//! # fn main() -> Result<(), roughdb::Error> {
//! const AGE: u64 = 1;
//!
//! let filter = FastRoughFilter::new();
//! let rows = [10, 14, 20].into_iter().map(|age| (AGE, Value::Int(age)));
//! filter.build(42, &FilterOptions::default(), rows)?;
//!
//! assert_eq!(filter.evaluate(&Predicate::gt(AGE, 25)), FilterResult::CannotMatch);
//! assert_eq!(filter.evaluate(&Predicate::gt(AGE, 15)), FilterResult::MayMatch);
//!
//! // Persist and restore.
//! let bytes = filter.serialize_to_bytes()?;
//! let restored = FastRoughFilter::from_bytes(&bytes)?;
//! assert_eq!(restored.build_time(), Some(42));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod builder;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod predicate;
pub mod rough_filter;
pub mod segment;
pub mod value;

// Re-exports
pub use builder::RoughFilterBuilder;
pub use catalog::{BlockId, FilterCatalog, RecoveryReport};
pub use codec::{JsonLoadOutcome, RoughFilterCodec};
pub use config::FilterOptions;
pub use error::{Error, Result};
pub use filter::{MembershipSummary, MembershipSummaryBuilder, RangeSummary};
pub use predicate::{CompareOp, FilterResult, Predicate, ValueRange};
pub use rough_filter::{BuiltFilter, FastRoughFilter, Timestamp, UNCOMMITTED_TS};
pub use segment::{FilterSegmentReader, FilterSegmentWriter, SegmentRecovery};
pub use value::{ColumnId, Value, ValueKind};

//! FastRoughFilter: the per-block pruning filter.
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted --request_build_start(ts)--> Started(ts) --install_build_result--> Built
//!      \                                                                        ^
//!       `------------- deserialize_from_bytes / load_from_json ----------------'
//! ```
//!
//! The build latch is one atomic word holding [`UNCOMMITTED_TS`] until a build
//! is claimed. The built summaries live in a write-once cell, so readers see
//! either no summaries or the complete, immutable pair. Neither path takes a
//! lock.

use crate::builder::RoughFilterBuilder;
use crate::codec::{JsonLoadOutcome, RoughFilterCodec};
use crate::config::FilterOptions;
use crate::error::{Error, Result};
use crate::filter::{MembershipSummary, RangeSummary};
use crate::predicate::{FilterResult, Predicate, ValueRange};
use crate::value::{ColumnId, Value};
use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Transaction timestamp type.
pub type Timestamp = u64;

/// Build time of a filter whose build has not started.
pub const UNCOMMITTED_TS: Timestamp = u64::MAX;

/// The immutable result of a build: both summaries plus the build timestamp.
#[derive(Debug, Clone)]
pub struct BuiltFilter {
    build_time: Timestamp,
    membership: MembershipSummary,
    range: RangeSummary,
}

impl BuiltFilter {
    /// Bundle the summaries produced by one build.
    pub fn new(build_time: Timestamp, membership: MembershipSummary, range: RangeSummary) -> Self {
        Self {
            build_time,
            membership,
            range,
        }
    }

    /// Timestamp of the build that produced the summaries.
    pub fn build_time(&self) -> Timestamp {
        self.build_time
    }

    /// The membership summary.
    pub fn membership(&self) -> &MembershipSummary {
        &self.membership
    }

    /// The range summary.
    pub fn range(&self) -> &RangeSummary {
        &self.range
    }

    /// Evaluate a predicate against the summaries.
    pub fn evaluate(&self, predicate: &Predicate) -> FilterResult {
        match predicate {
            Predicate::Eq { column, value } => self.evaluate_eq(*column, value),
            Predicate::Compare { column, op, value } => {
                self.range.overlaps(*column, &ValueRange::from_compare(*op, value.clone()))
            }
            Predicate::Between { column, low, high } => {
                self.range.overlaps(*column, &ValueRange::between(low.clone(), high.clone()))
            }
            Predicate::InList { column, values } => values
                .iter()
                .map(|value| self.evaluate_eq(*column, value))
                .fold(FilterResult::CannotMatch, FilterResult::or),
            Predicate::And(children) => children
                .iter()
                .map(|child| self.evaluate(child))
                .fold(FilterResult::MayMatch, FilterResult::and),
            Predicate::Or(children) => children
                .iter()
                .map(|child| self.evaluate(child))
                .fold(FilterResult::CannotMatch, FilterResult::or),
            Predicate::Not(_) | Predicate::Unsupported => FilterResult::MayMatch,
        }
    }

    fn evaluate_eq(&self, column: ColumnId, value: &Value) -> FilterResult {
        let by_range = self.range.overlaps(column, &ValueRange::point(value.clone()));
        if by_range.can_skip() {
            return by_range;
        }
        // Bloom keys embed the value kind; only trust them for the column's own kind.
        if self.range.column_kind(column) == Some(value.kind()) {
            self.membership.may_contain(column, value)
        } else {
            FilterResult::MayMatch
        }
    }
}

/// Rough filter of one storage block.
///
/// Shared between the build task and any number of readers, typically as
/// `Arc<FastRoughFilter>`.
#[derive(Debug)]
pub struct FastRoughFilter {
    build_start: AtomicU64,
    built: OnceLock<BuiltFilter>,
}

impl Default for FastRoughFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FastRoughFilter {
    /// Create an unbuilt filter.
    pub fn new() -> Self {
        Self {
            build_start: AtomicU64::new(UNCOMMITTED_TS),
            built: OnceLock::new(),
        }
    }

    /// Create a filter from a binary record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let filter = Self::new();
        filter.deserialize_from_bytes(bytes)?;
        Ok(filter)
    }

    /// Claim the right to build this filter.
    ///
    /// Exactly one call per instance succeeds. Later calls fail with
    /// [`Error::AlreadyStarted`] carrying the first caller's timestamp.
    pub fn request_build_start(&self, build_time: Timestamp) -> Result<()> {
        if build_time == UNCOMMITTED_TS {
            return Err(Error::invalid_argument("build time must not be UNCOMMITTED_TS"));
        }

        self.build_start
            .compare_exchange(UNCOMMITTED_TS, build_time, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|existing| {
                log::error!(
                    "Rough filter build already started at {}, rejected second start at {}",
                    existing,
                    build_time
                );
                Error::AlreadyStarted { build_time: existing }
            })
    }

    /// Returns true once a build has been claimed or a filter has been loaded.
    pub fn has_build_started(&self) -> bool {
        self.build_start.load(Ordering::Acquire) != UNCOMMITTED_TS
    }

    /// Build time of the filter, if a build was claimed or loaded.
    pub fn build_time(&self) -> Option<Timestamp> {
        match self.build_start.load(Ordering::Acquire) {
            UNCOMMITTED_TS => None,
            ts => Some(ts),
        }
    }

    /// Publish the summaries computed by the build task.
    ///
    /// Must follow a successful [`request_build_start`](Self::request_build_start)
    /// and may be called once.
    pub fn install_build_result(
        &self,
        membership: MembershipSummary,
        range: RangeSummary,
    ) -> Result<()> {
        let build_time = self.build_time().ok_or_else(|| {
            Error::invalid_state("install_build_result called before request_build_start")
        })?;
        self.publish(BuiltFilter::new(build_time, membership, range))?;
        log::debug!("Rough filter built at {}", build_time);
        Ok(())
    }

    /// Claim, compute and install the filter from `(column, value)` pairs.
    pub fn build<I>(&self, build_time: Timestamp, options: &FilterOptions, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (ColumnId, Value)>,
    {
        options.validate()?;
        self.request_build_start(build_time)?;

        let mut builder = RoughFilterBuilder::new(options);
        for (column, value) in values {
            builder.observe(column, &value);
        }
        let (membership, range) = builder.finish();
        self.install_build_result(membership, range)
    }

    /// Returns true if both summaries are installed.
    pub fn has_filter(&self) -> bool {
        self.built.get().is_some()
    }

    /// The installed summaries, if any.
    pub fn built(&self) -> Option<&BuiltFilter> {
        self.built.get()
    }

    /// Decide whether the block may hold rows matching `predicate`.
    ///
    /// Unbuilt filters never prune.
    pub fn evaluate(&self, predicate: &Predicate) -> FilterResult {
        match self.built.get() {
            Some(built) => built.evaluate(predicate),
            None => FilterResult::MayMatch,
        }
    }

    /// Encode the filter as a binary record.
    pub fn serialize_to_bytes(&self) -> Result<Bytes> {
        RoughFilterCodec::encode_binary(self)
    }

    /// Install a filter decoded from a binary record.
    ///
    /// Decoding into a built instance is a caller bug and fails with
    /// [`Error::AlreadyBuilt`]. Corrupt records fail with
    /// [`Error::Corruption`] and leave the instance untouched.
    pub fn deserialize_from_bytes(&self, bytes: &[u8]) -> Result<()> {
        if self.has_filter() {
            return Err(Error::AlreadyBuilt);
        }
        let built = RoughFilterCodec::decode_binary(bytes)?;
        self.install_loaded(built)
    }

    /// Write this filter's field group into a checkpoint entry.
    pub fn save_to_json(&self, entry: &mut Map<String, JsonValue>) -> Result<()> {
        RoughFilterCodec::encode_json(self, entry)
    }

    /// Restore this filter from a checkpoint entry.
    ///
    /// Only [`JsonLoadOutcome::Loaded`] installs anything. On
    /// [`JsonLoadOutcome::PartiallyLoaded`] the instance stays unbuilt and
    /// unclaimed, so it never prunes and may be rebuilt.
    pub fn load_from_json(&self, entry: &Map<String, JsonValue>) -> Result<JsonLoadOutcome> {
        if self.has_filter() {
            return Err(Error::AlreadyBuilt);
        }
        match RoughFilterCodec::decode_json(entry) {
            (JsonLoadOutcome::Loaded, Some(built)) => {
                self.install_loaded(built)?;
                Ok(JsonLoadOutcome::Loaded)
            }
            (JsonLoadOutcome::Loaded, None) => {
                Err(Error::invalid_state("checkpoint decoder reported a load without data"))
            }
            (outcome, _) => Ok(outcome),
        }
    }

    fn install_loaded(&self, built: BuiltFilter) -> Result<()> {
        let build_time = built.build_time();
        self.build_start
            .compare_exchange(UNCOMMITTED_TS, build_time, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|existing| Error::AlreadyStarted { build_time: existing })?;
        self.publish(built)
    }

    fn publish(&self, built: BuiltFilter) -> Result<()> {
        self.built.set(built).map_err(|_| Error::AlreadyBuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGE: ColumnId = 1;
    const NAME: ColumnId = 2;

    fn people() -> Vec<(ColumnId, Value)> {
        let mut rows = Vec::new();
        for (age, name) in [(10, "ann"), (20, "bob"), (15, "cid"), (12, "dee")] {
            rows.push((AGE, Value::Int(age)));
            rows.push((NAME, Value::from(name)));
        }
        rows
    }

    fn built() -> FastRoughFilter {
        let filter = FastRoughFilter::new();
        filter.build(100, &FilterOptions::default(), people()).unwrap();
        filter
    }

    #[test]
    fn test_request_build_start_once() {
        let filter = FastRoughFilter::new();
        assert!(!filter.has_build_started());
        assert_eq!(filter.build_time(), None);

        filter.request_build_start(5).unwrap();
        assert!(filter.has_build_started());

        let err = filter.request_build_start(6).unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted { build_time: 5 }));
        assert_eq!(filter.build_time(), Some(5));
    }

    #[test]
    fn test_request_build_start_rejects_sentinel() {
        let filter = FastRoughFilter::new();
        assert!(matches!(
            filter.request_build_start(UNCOMMITTED_TS),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!filter.has_build_started());
    }

    #[test]
    fn test_install_requires_start() {
        let filter = FastRoughFilter::new();
        let result = filter.install_build_result(
            crate::filter::MembershipSummaryBuilder::new(0.01, 64).finish(),
            RangeSummary::new(),
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert!(!filter.has_filter());
    }

    #[test]
    fn test_install_twice_fails() {
        let filter = built();
        let result = filter.install_build_result(
            crate::filter::MembershipSummaryBuilder::new(0.01, 64).finish(),
            RangeSummary::new(),
        );
        assert!(matches!(result, Err(Error::AlreadyBuilt)));
    }

    #[test]
    fn test_unbuilt_never_prunes() {
        let filter = FastRoughFilter::new();
        filter.request_build_start(1).unwrap();
        assert!(!filter.has_filter());
        assert_eq!(filter.evaluate(&Predicate::gt(AGE, 1000)), FilterResult::MayMatch);
        assert_eq!(filter.evaluate(&Predicate::eq(NAME, "zed")), FilterResult::MayMatch);
    }

    #[test]
    fn test_evaluate_range_predicates() {
        let filter = built();
        assert_eq!(filter.evaluate(&Predicate::gt(AGE, 25)), FilterResult::CannotMatch);
        assert_eq!(filter.evaluate(&Predicate::gt(AGE, 15)), FilterResult::MayMatch);
        assert_eq!(filter.evaluate(&Predicate::lt(AGE, 10)), FilterResult::CannotMatch);
        assert_eq!(filter.evaluate(&Predicate::between(AGE, 21, 30)), FilterResult::CannotMatch);
    }

    #[test]
    fn test_evaluate_equality() {
        let filter = built();
        assert_eq!(filter.evaluate(&Predicate::eq(AGE, 15)), FilterResult::MayMatch);
        assert_eq!(filter.evaluate(&Predicate::eq(AGE, 99)), FilterResult::CannotMatch);
        assert_eq!(filter.evaluate(&Predicate::eq(NAME, "bob")), FilterResult::MayMatch);
        // Outside [ann, dee] lexicographically.
        assert_eq!(filter.evaluate(&Predicate::eq(NAME, "zed")), FilterResult::CannotMatch);
        // Kind mismatch is never pruned.
        assert_eq!(filter.evaluate(&Predicate::eq(AGE, "15")), FilterResult::MayMatch);
    }

    #[test]
    fn test_evaluate_compound() {
        let filter = built();
        let impossible = Predicate::gt(AGE, 25);
        let possible = Predicate::eq(NAME, "ann");

        assert_eq!(
            filter.evaluate(&impossible.clone().and(possible.clone())),
            FilterResult::CannotMatch
        );
        assert_eq!(
            filter.evaluate(&impossible.clone().or(possible.clone())),
            FilterResult::MayMatch
        );
        assert_eq!(
            filter.evaluate(&impossible.clone().or(Predicate::lt(AGE, 5))),
            FilterResult::CannotMatch
        );
        assert_eq!(filter.evaluate(&Predicate::not(impossible)), FilterResult::MayMatch);
        assert_eq!(filter.evaluate(&Predicate::Unsupported), FilterResult::MayMatch);
    }

    #[test]
    fn test_evaluate_in_list() {
        let filter = built();
        assert_eq!(
            filter.evaluate(&Predicate::in_list(AGE, [1, 2, 99])),
            FilterResult::CannotMatch
        );
        assert_eq!(filter.evaluate(&Predicate::in_list(AGE, [1, 20])), FilterResult::MayMatch);
        assert_eq!(
            filter.evaluate(&Predicate::in_list(AGE, Vec::<i64>::new())),
            FilterResult::CannotMatch
        );
    }

    #[test]
    fn test_evaluate_empty_and_nested_compounds() {
        let filter = built();
        assert_eq!(filter.evaluate(&Predicate::And(Vec::new())), FilterResult::MayMatch);
        assert_eq!(filter.evaluate(&Predicate::Or(Vec::new())), FilterResult::CannotMatch);

        // (age > 25 OR name = 'zed') AND age = 15
        let nested = Predicate::gt(AGE, 25)
            .or(Predicate::eq(NAME, "zed"))
            .and(Predicate::eq(AGE, 15));
        assert_eq!(filter.evaluate(&nested), FilterResult::CannotMatch);

        // (age > 25 OR name = 'bob') AND age = 15
        let nested = Predicate::gt(AGE, 25)
            .or(Predicate::eq(NAME, "bob"))
            .and(Predicate::eq(AGE, 15));
        assert_eq!(filter.evaluate(&nested), FilterResult::MayMatch);
    }

    #[test]
    fn test_unknown_column_may_match() {
        let filter = built();
        assert_eq!(filter.evaluate(&Predicate::eq(42, 1)), FilterResult::MayMatch);
        assert_eq!(filter.evaluate(&Predicate::gt(42, 1)), FilterResult::MayMatch);
    }

    #[test]
    fn test_binary_roundtrip_preserves_decisions() {
        let filter = built();
        let bytes = filter.serialize_to_bytes().unwrap();
        let restored = FastRoughFilter::from_bytes(&bytes).unwrap();

        assert!(restored.has_filter());
        assert!(restored.has_build_started());
        assert_eq!(restored.build_time(), Some(100));

        let predicates = [
            Predicate::gt(AGE, 25),
            Predicate::gt(AGE, 15),
            Predicate::eq(AGE, 99),
            Predicate::eq(NAME, "cid"),
            Predicate::eq(NAME, "zed"),
        ];
        for p in &predicates {
            assert_eq!(filter.evaluate(p), restored.evaluate(p), "predicate {:?}", p);
        }
    }

    #[test]
    fn test_deserialize_into_built_fails() {
        let filter = built();
        let bytes = filter.serialize_to_bytes().unwrap();
        assert!(matches!(filter.deserialize_from_bytes(&bytes), Err(Error::AlreadyBuilt)));
    }

    #[test]
    fn test_deserialize_corrupt_leaves_filter_unbuilt() {
        let bytes = built().serialize_to_bytes().unwrap();
        let filter = FastRoughFilter::new();
        let result = filter.deserialize_from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(Error::Corruption(_))));
        assert!(!filter.has_filter());
        assert!(!filter.has_build_started());
    }

    #[test]
    fn test_json_load_outcomes() {
        let mut entry = Map::new();
        built().save_to_json(&mut entry).unwrap();

        let loaded = FastRoughFilter::new();
        assert_eq!(loaded.load_from_json(&entry).unwrap(), JsonLoadOutcome::Loaded);
        assert!(loaded.has_filter());
        assert_eq!(loaded.build_time(), Some(100));
        assert!(matches!(loaded.load_from_json(&entry), Err(Error::AlreadyBuilt)));

        let absent = FastRoughFilter::new();
        assert_eq!(absent.load_from_json(&Map::new()).unwrap(), JsonLoadOutcome::Absent);
        assert!(!absent.has_filter());

        let mut partial_entry = entry.clone();
        partial_entry.remove("membership_summary");
        let partial = FastRoughFilter::new();
        assert_eq!(
            partial.load_from_json(&partial_entry).unwrap(),
            JsonLoadOutcome::PartiallyLoaded
        );
        assert!(!partial.has_filter());
        assert!(!partial.has_build_started());
        assert_eq!(partial.evaluate(&Predicate::gt(AGE, 25)), FilterResult::MayMatch);
    }
}

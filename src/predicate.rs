//! Predicate descriptors consumed by rough filter evaluation.
//!
//! Predicates are produced by the bound-query layer. Each leaf names a column
//! and carries literal operands; compound shapes combine leaves.

use crate::value::{ColumnId, Value};
use std::ops::Bound;

/// Outcome of a rough filter test.
///
/// `CannotMatch` is a proof that no row of the block satisfies the predicate.
/// `MayMatch` carries no information and is always a safe answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// The block provably holds no matching row and can be skipped.
    CannotMatch,
    /// The block has to be scanned.
    MayMatch,
}

impl FilterResult {
    /// Conjunction: one impossible branch makes the whole conjunction impossible.
    pub fn and(self, other: FilterResult) -> FilterResult {
        match (self, other) {
            (FilterResult::CannotMatch, _) | (_, FilterResult::CannotMatch) => {
                FilterResult::CannotMatch
            }
            _ => FilterResult::MayMatch,
        }
    }

    /// Disjunction: impossible only when every branch is impossible.
    pub fn or(self, other: FilterResult) -> FilterResult {
        match (self, other) {
            (FilterResult::CannotMatch, FilterResult::CannotMatch) => FilterResult::CannotMatch,
            _ => FilterResult::MayMatch,
        }
    }

    /// Returns true if the block can be skipped.
    pub fn can_skip(self) -> bool {
        self == FilterResult::CannotMatch
    }
}

/// Comparison operators of a range predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `column < value`
    Lt,
    /// `column <= value`
    Le,
    /// `column > value`
    Gt,
    /// `column >= value`
    Ge,
}

/// A possibly half-open range of values requested by a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    /// Lower bound
    pub low: Bound<Value>,
    /// Upper bound
    pub high: Bound<Value>,
}

impl ValueRange {
    /// The range selected by `column <op> value`.
    pub fn from_compare(op: CompareOp, value: Value) -> Self {
        let (low, high) = match op {
            CompareOp::Lt => (Bound::Unbounded, Bound::Excluded(value)),
            CompareOp::Le => (Bound::Unbounded, Bound::Included(value)),
            CompareOp::Gt => (Bound::Excluded(value), Bound::Unbounded),
            CompareOp::Ge => (Bound::Included(value), Bound::Unbounded),
        };
        Self { low, high }
    }

    /// The inclusive range `[low, high]`.
    pub fn between(low: Value, high: Value) -> Self {
        Self {
            low: Bound::Included(low),
            high: Bound::Included(high),
        }
    }

    /// The single-value range `[value, value]`.
    pub fn point(value: Value) -> Self {
        Self::between(value.clone(), value)
    }
}

/// A predicate over the columns of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`
    Eq {
        /// Target column
        column: ColumnId,
        /// Literal operand
        value: Value,
    },
    /// `column <op> value`
    Compare {
        /// Target column
        column: ColumnId,
        /// Comparison operator
        op: CompareOp,
        /// Literal operand
        value: Value,
    },
    /// `column BETWEEN low AND high` (inclusive)
    Between {
        /// Target column
        column: ColumnId,
        /// Inclusive lower bound
        low: Value,
        /// Inclusive upper bound
        high: Value,
    },
    /// `column IN (values...)`
    InList {
        /// Target column
        column: ColumnId,
        /// Candidate literals
        values: Vec<Value>,
    },
    /// Conjunction of sub-predicates
    And(Vec<Predicate>),
    /// Disjunction of sub-predicates
    Or(Vec<Predicate>),
    /// Negation. Approximate summaries cannot prove a negation impossible.
    Not(Box<Predicate>),
    /// A shape the binder could not express here (function calls, LIKE, ...)
    Unsupported,
}

impl Predicate {
    /// `column = value`
    pub fn eq(column: ColumnId, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            column,
            value: value.into(),
        }
    }

    /// `column < value`
    pub fn lt(column: ColumnId, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column,
            op: CompareOp::Lt,
            value: value.into(),
        }
    }

    /// `column <= value`
    pub fn le(column: ColumnId, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column,
            op: CompareOp::Le,
            value: value.into(),
        }
    }

    /// `column > value`
    pub fn gt(column: ColumnId, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column,
            op: CompareOp::Gt,
            value: value.into(),
        }
    }

    /// `column >= value`
    pub fn ge(column: ColumnId, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column,
            op: CompareOp::Ge,
            value: value.into(),
        }
    }

    /// `column BETWEEN low AND high`
    pub fn between(column: ColumnId, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Predicate::Between {
            column,
            low: low.into(),
            high: high.into(),
        }
    }

    /// `column IN (values...)`
    pub fn in_list<V: Into<Value>>(column: ColumnId, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::InList {
            column,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `NOT predicate`
    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Returns the conjunction of `self` and `other`, flattening nested ANDs.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Returns the disjunction of `self` and `other`, flattening nested ORs.
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), right) => {
                left.push(right);
                Predicate::Or(left)
            }
            (left, right) => Predicate::Or(vec![left, right]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_result_and() {
        use FilterResult::*;
        assert_eq!(CannotMatch.and(MayMatch), CannotMatch);
        assert_eq!(MayMatch.and(CannotMatch), CannotMatch);
        assert_eq!(MayMatch.and(MayMatch), MayMatch);
    }

    #[test]
    fn test_filter_result_or() {
        use FilterResult::*;
        assert_eq!(CannotMatch.or(MayMatch), MayMatch);
        assert_eq!(CannotMatch.or(CannotMatch), CannotMatch);
        assert!(CannotMatch.can_skip());
        assert!(!MayMatch.can_skip());
    }

    #[test]
    fn test_range_from_compare() {
        let range = ValueRange::from_compare(CompareOp::Gt, Value::Int(5));
        assert_eq!(range.low, Bound::Excluded(Value::Int(5)));
        assert_eq!(range.high, Bound::Unbounded);
    }

    #[test]
    fn test_predicate_builders_flatten() {
        let p = Predicate::eq(1, 1).and(Predicate::eq(2, 2)).and(Predicate::eq(3, 3));
        match p {
            Predicate::And(children) => assert_eq!(children.len(), 3),
            other => panic!("unexpected predicate: {:?}", other),
        }

        let p = Predicate::gt(1, 1).or(Predicate::lt(1, 0)).or(Predicate::eq(1, 5));
        match p {
            Predicate::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("unexpected predicate: {:?}", other),
        }
    }
}

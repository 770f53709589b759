// Binary Record Tests for RoughDb
// These tests verify the exact record layout and that malformed records are
// rejected without touching the target filter.

use roughdb::{Error, FastRoughFilter, FilterOptions, FilterResult, Predicate, Value};

const AGE: u64 = 1;
const NAME: u64 = 2;
const SCORE: u64 = 3;

fn mixed_filter() -> FastRoughFilter {
    let filter = FastRoughFilter::new();
    let rows = [(10, "ann", 1.5), (14, "bob", -0.0), (20, "cid", 9.25)];
    let values = rows.iter().flat_map(|(age, name, score)| {
        [
            (AGE, Value::Int(*age)),
            (NAME, Value::from(*name)),
            (SCORE, Value::Float(*score)),
        ]
    });
    filter.build(0x0102_0304_0506_0708, &FilterOptions::default(), values).unwrap();
    filter
}

/// Test the fixed header fields of a binary record
#[test]
fn test_record_header_layout() {
    let bytes = mixed_filter().serialize_to_bytes().unwrap();

    let total = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    assert_eq!(total as usize, bytes.len());
    let build_time = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
    assert_eq!(build_time, 0x0102_0304_0506_0708);

    // The membership blob follows the header and is self-delimiting.
    let membership_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    let range_start = 12 + 4 + membership_len;
    let range_len = u32::from_le_bytes(bytes[range_start..range_start + 4].try_into().unwrap());
    assert_eq!(range_start + 4 + range_len as usize, bytes.len());
}

/// Test that a decoded record answers every predicate like the original
#[test]
fn test_decoded_filter_matches_original() {
    let filter = mixed_filter();
    let restored = FastRoughFilter::from_bytes(&filter.serialize_to_bytes().unwrap()).unwrap();
    assert_eq!(restored.build_time(), filter.build_time());

    let predicates = [
        Predicate::gt(AGE, 25),
        Predicate::between(AGE, 12, 15),
        Predicate::eq(NAME, "bob"),
        Predicate::eq(NAME, "zed"),
        Predicate::eq(SCORE, 0.0),
        Predicate::lt(SCORE, -1.0),
        Predicate::eq(AGE, "ten"),
    ];
    for predicate in &predicates {
        assert_eq!(restored.evaluate(predicate), filter.evaluate(predicate), "{:?}", predicate);
    }

    assert_eq!(restored.evaluate(&Predicate::gt(AGE, 25)), FilterResult::CannotMatch);
    assert_eq!(restored.evaluate(&Predicate::eq(NAME, "zed")), FilterResult::CannotMatch);
    // -0.0 and 0.0 are the same value.
    assert_eq!(restored.evaluate(&Predicate::eq(SCORE, 0.0)), FilterResult::MayMatch);
    // Comparing across kinds never prunes.
    assert_eq!(restored.evaluate(&Predicate::eq(AGE, "ten")), FilterResult::MayMatch);
}

/// Test that every proper prefix of a record is rejected
#[test]
fn test_truncated_records_rejected() {
    let bytes = mixed_filter().serialize_to_bytes().unwrap();
    for len in 0..bytes.len() {
        let target = FastRoughFilter::new();
        let result = target.deserialize_from_bytes(&bytes[..len]);
        assert!(matches!(result, Err(Error::Corruption(_))), "prefix of {} bytes", len);
        assert!(!target.has_filter());
        assert!(!target.has_build_started());
    }
}

/// Test that a record with trailing garbage is rejected
#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = mixed_filter().serialize_to_bytes().unwrap().to_vec();
    bytes.extend_from_slice(&[0xAA, 0xBB]);
    assert!(matches!(FastRoughFilter::from_bytes(&bytes), Err(Error::Corruption(_))));

    // Patching the total length to cover the garbage moves the error into the range blob.
    let total = bytes.len() as u32;
    bytes[0..4].copy_from_slice(&total.to_le_bytes());
    assert!(matches!(FastRoughFilter::from_bytes(&bytes), Err(Error::Corruption(_))));
}

/// Test that a corrupted inner length is rejected
#[test]
fn test_corrupted_section_length_rejected() {
    let mut bytes = mixed_filter().serialize_to_bytes().unwrap().to_vec();
    let membership_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    bytes[12..16].copy_from_slice(&(membership_len + 1).to_le_bytes());
    assert!(matches!(FastRoughFilter::from_bytes(&bytes), Err(Error::Corruption(_))));
}

/// Test serialization preconditions
#[test]
fn test_serialize_preconditions() {
    let filter = FastRoughFilter::new();
    assert!(matches!(filter.serialize_to_bytes(), Err(Error::NoDataToSerialize)));

    // Claimed but not yet installed is still nothing to serialize.
    filter.request_build_start(5).unwrap();
    assert!(matches!(filter.serialize_to_bytes(), Err(Error::NoDataToSerialize)));
}

/// Test decoding into filters that already hold state
#[test]
fn test_decode_into_used_instance() {
    let bytes = mixed_filter().serialize_to_bytes().unwrap();

    let built = mixed_filter();
    assert!(matches!(built.deserialize_from_bytes(&bytes), Err(Error::AlreadyBuilt)));

    let claimed = FastRoughFilter::new();
    claimed.request_build_start(77).unwrap();
    assert!(matches!(
        claimed.deserialize_from_bytes(&bytes),
        Err(Error::AlreadyStarted { build_time: 77 })
    ));
    assert!(!claimed.has_filter());
}

/// Test a filter over a block with no tracked values
#[test]
fn test_empty_block_roundtrip() {
    let filter = FastRoughFilter::new();
    filter.build(1, &FilterOptions::default(), std::iter::empty()).unwrap();
    assert_eq!(filter.evaluate(&Predicate::eq(AGE, 1)), FilterResult::MayMatch);

    let restored = FastRoughFilter::from_bytes(&filter.serialize_to_bytes().unwrap()).unwrap();
    assert!(restored.has_filter());
    assert_eq!(restored.evaluate(&Predicate::eq(AGE, 1)), FilterResult::MayMatch);
}

//! Persistence formats of a rough filter.
//!
//! ## Binary record
//!
//! ```text
//! [total_length: u32]      // whole record, including this field
//! [build_time: u64]
//! [membership blob]        // [blob_len: u32][body]
//! [range blob]             // [blob_len: u32][body]
//! ```
//!
//! All integers are little-endian. Each blob is framed by [`BinarySection`], so
//! `total_length` and the end-of-record check follow from the sections' own sizes.
//!
//! ## Checkpoint JSON field group
//!
//! ```text
//! "build_time": u64,
//! "membership_summary": { ... },
//! "range_summary": { ... }
//! ```
//!
//! A missing `build_time` means nothing was ever persisted for the block.

use crate::error::{Error, Result};
use crate::filter::{MembershipSummary, RangeSummary};
use crate::rough_filter::{BuiltFilter, FastRoughFilter, UNCOMMITTED_TS};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// JSON key holding the build timestamp.
pub const JSON_TAG_BUILD_TIME: &str = "build_time";

/// Size of `total_length` plus `build_time`.
pub const RECORD_HEADER_LEN: usize = 4 + 8;

/// A component with a self-delimiting binary form.
///
/// Implementors only describe their body; the `[blob_len: u32]` prefix and
/// the check that decoding consumed exactly `blob_len` bytes are derived here.
pub trait BinarySection: Sized {
    /// Name used in corruption messages.
    const NAME: &'static str;

    /// Length of the body written by `encode_body`.
    fn body_len(&self) -> usize;

    /// Write the body.
    fn encode_body(&self, buf: &mut BytesMut) -> Result<()>;

    /// Read the body. `buf` holds exactly the body bytes.
    fn decode_body(buf: &mut &[u8]) -> Result<Self>;

    /// Full encoded size including the length prefix.
    ///
    /// Fails with [`Error::InvalidArgument`] if the blob does not fit the
    /// `u32` length field.
    fn serialized_size(&self) -> Result<u32> {
        let size = self.body_len().checked_add(4).unwrap_or(usize::MAX);
        encode_len(size, Self::NAME)
    }

    /// Write `[blob_len][body]`. Nothing is written if the size check fails.
    fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let start = buf.len();
        let size = self.serialized_size()?;
        buf.put_u32_le(size);
        self.encode_body(buf)?;
        assert_eq!(
            buf.len() - start,
            size as usize,
            "BUG: {} wrote a different size than it declared",
            Self::NAME
        );
        Ok(())
    }

    /// Read `[blob_len][body]`, advancing `buf` past the blob.
    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let size = read_u32(buf, Self::NAME)? as usize;
        if size < 4 {
            return Err(Error::corruption(format!("{} length {} is too small", Self::NAME, size)));
        }
        let mut body = take_slice(buf, size - 4, Self::NAME)?;
        let section = Self::decode_body(&mut body)?;
        if !body.is_empty() {
            return Err(Error::corruption(format!(
                "{} has {} unread trailing bytes",
                Self::NAME,
                body.len()
            )));
        }
        Ok(section)
    }
}

/// A component persisted as one named field group of a checkpoint entry.
pub trait JsonSection: Serialize + DeserializeOwned {
    /// Key of the field group inside the entry.
    const JSON_TAG: &'static str;

    /// Check invariants serde cannot express.
    fn validate(&self) -> Result<()>;

    /// Serialize into a JSON value.
    fn to_json(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize and validate.
    fn from_json(json: &JsonValue) -> Result<Self> {
        let section: Self = serde_json::from_value(json.clone()).map_err(|e| {
            Error::missing_or_corrupt(format!("{}: {}", Self::JSON_TAG, e))
        })?;
        section.validate()?;
        Ok(section)
    }
}

/// Result of loading a rough filter from a checkpoint entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonLoadOutcome {
    /// The entry carries no rough filter. Normal for never-built blocks.
    Absent,
    /// Both summaries were restored and installed.
    Loaded,
    /// A build time was present but at least one summary could not be
    /// restored. Nothing was installed.
    PartiallyLoaded,
}

/// Encoder and decoder for both persistence formats.
pub struct RoughFilterCodec;

impl RoughFilterCodec {
    /// Encode a built filter as a binary record.
    pub fn encode_binary(filter: &FastRoughFilter) -> Result<Bytes> {
        let built = filter.built().ok_or(Error::NoDataToSerialize)?;
        Self::encode_built(built)
    }

    fn encode_built(built: &BuiltFilter) -> Result<Bytes> {
        let membership_bytes = built.membership().serialized_size()?;
        let range_bytes = built.range().serialized_size()?;
        let total_length = (RECORD_HEADER_LEN as u32)
            .checked_add(membership_bytes)
            .and_then(|len| len.checked_add(range_bytes))
            .ok_or_else(|| Error::invalid_argument("Rough filter record exceeds 4 GiB"))?;

        let mut buf = BytesMut::with_capacity(total_length as usize);
        buf.put_u32_le(total_length);
        buf.put_u64_le(built.build_time());
        built.membership().encode_into(&mut buf)?;
        built.range().encode_into(&mut buf)?;

        assert_eq!(
            buf.len(),
            total_length as usize,
            "BUG: rough filter record size does not match its declared length"
        );
        Ok(buf.freeze())
    }

    /// Decode a binary record.
    ///
    /// Fails with [`Error::Corruption`] unless the declared length equals the
    /// buffer length and decoding consumes the buffer exactly.
    pub fn decode_binary(bytes: &[u8]) -> Result<BuiltFilter> {
        let mut cursor = bytes;
        let total_length = read_u32(&mut cursor, "record length")?;
        if total_length as usize != bytes.len() {
            return Err(Error::corruption(format!(
                "Rough filter record length mismatch: declared {}, got {}",
                total_length,
                bytes.len()
            )));
        }

        let build_time = read_u64(&mut cursor, "build time")?;
        if build_time == UNCOMMITTED_TS {
            return Err(Error::corruption("Rough filter record has no build time"));
        }

        let membership = MembershipSummary::decode_from(&mut cursor)?;
        let range = RangeSummary::decode_from(&mut cursor)?;

        if !cursor.is_empty() {
            return Err(Error::corruption(format!(
                "Rough filter record has {} unread trailing bytes",
                cursor.len()
            )));
        }

        Ok(BuiltFilter::new(build_time, membership, range))
    }

    /// Write the filter's field group into a checkpoint entry.
    pub fn encode_json(filter: &FastRoughFilter, entry: &mut Map<String, JsonValue>) -> Result<()> {
        let built = filter.built().ok_or(Error::NoDataToSerialize)?;
        entry.insert(JSON_TAG_BUILD_TIME.to_string(), JsonValue::from(built.build_time()));
        entry.insert(MembershipSummary::JSON_TAG.to_string(), built.membership().to_json()?);
        entry.insert(RangeSummary::JSON_TAG.to_string(), built.range().to_json()?);
        Ok(())
    }

    /// Read the filter's field group from a checkpoint entry.
    ///
    /// Returns the built filter only for [`JsonLoadOutcome::Loaded`].
    pub fn decode_json(entry: &Map<String, JsonValue>) -> (JsonLoadOutcome, Option<BuiltFilter>) {
        let Some(build_time) = entry.get(JSON_TAG_BUILD_TIME) else {
            log::trace!("No rough filter data in checkpoint entry");
            return (JsonLoadOutcome::Absent, None);
        };

        let build_time = match build_time.as_u64() {
            Some(ts) if ts != UNCOMMITTED_TS => Some(ts),
            _ => {
                log::error!("Invalid rough filter build time in checkpoint: {}", build_time);
                None
            }
        };
        let membership = Self::load_section::<MembershipSummary>(entry);
        let range = Self::load_section::<RangeSummary>(entry);

        match (build_time, membership, range) {
            (Some(build_time), Some(membership), Some(range)) => {
                (JsonLoadOutcome::Loaded, Some(BuiltFilter::new(build_time, membership, range)))
            }
            _ => (JsonLoadOutcome::PartiallyLoaded, None),
        }
    }

    fn load_section<T: JsonSection>(entry: &Map<String, JsonValue>) -> Option<T> {
        let loaded = entry
            .get(T::JSON_TAG)
            .ok_or_else(|| Error::missing_or_corrupt(format!("{} field missing", T::JSON_TAG)))
            .and_then(T::from_json);

        match loaded {
            Ok(section) => Some(section),
            Err(e) => {
                log::error!("Cannot load {} from checkpoint entry: {}", T::JSON_TAG, e);
                None
            }
        }
    }
}

/// Convert a length to its `u32` wire form.
pub(crate) fn encode_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::invalid_argument(format!("{} too large to encode: {} bytes", what, len))
    })
}

/// Split `n` bytes off the front of `buf`.
pub(crate) fn take_slice<'a>(buf: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::corruption(format!(
            "Truncated {}: need {} bytes, {} left",
            what,
            n,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

pub(crate) fn read_bytes(buf: &mut &[u8], n: usize, what: &str) -> Result<Vec<u8>> {
    take_slice(buf, n, what).map(<[u8]>::to_vec)
}

pub(crate) fn read_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    ensure_remaining(*buf, 1, what)?;
    Ok(buf.get_u8())
}

pub(crate) fn read_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    ensure_remaining(*buf, 4, what)?;
    Ok(buf.get_u32_le())
}

pub(crate) fn read_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    ensure_remaining(*buf, 8, what)?;
    Ok(buf.get_u64_le())
}

fn ensure_remaining(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.len() < n {
        return Err(Error::corruption(format!(
            "Truncated {}: need {} bytes, {} left",
            what,
            n,
            buf.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::MembershipSummaryBuilder;
    use crate::value::Value;

    fn built_filter() -> FastRoughFilter {
        let mut membership = MembershipSummaryBuilder::new(0.01, 64);
        let mut range = RangeSummary::new();
        for i in 0..100i64 {
            membership.observe(1, &Value::Int(i));
            range.observe(1, &Value::Int(i));
            let name = Value::from(format!("user{}", i));
            membership.observe(2, &name);
            range.observe(2, &name);
        }

        let filter = FastRoughFilter::new();
        filter.request_build_start(77).unwrap();
        filter.install_build_result(membership.finish(), range).unwrap();
        filter
    }

    struct Oversized;

    impl BinarySection for Oversized {
        const NAME: &'static str = "oversized section";

        fn body_len(&self) -> usize {
            u32::MAX as usize
        }

        fn encode_body(&self, _buf: &mut BytesMut) -> Result<()> {
            unreachable!("size check runs before the body is written")
        }

        fn decode_body(_buf: &mut &[u8]) -> Result<Self> {
            Ok(Oversized)
        }
    }

    #[test]
    fn test_oversized_section_rejected() {
        assert!(matches!(Oversized.serialized_size(), Err(Error::InvalidArgument(_))));

        let mut buf = BytesMut::new();
        assert!(matches!(Oversized.encode_into(&mut buf), Err(Error::InvalidArgument(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_len_limits() {
        assert_eq!(encode_len(0, "empty").unwrap(), 0);
        assert_eq!(encode_len(u32::MAX as usize, "largest").unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            encode_len(u32::MAX as usize + 1, "too large"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_binary_layout_header() {
        let filter = built_filter();
        let bytes = RoughFilterCodec::encode_binary(&filter).unwrap();

        let total = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let build_time = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
        assert_eq!(total as usize, bytes.len());
        assert_eq!(build_time, 77);
    }

    #[test]
    fn test_binary_roundtrip() {
        let filter = built_filter();
        let bytes = RoughFilterCodec::encode_binary(&filter).unwrap();
        let decoded = RoughFilterCodec::decode_binary(&bytes).unwrap();

        let original = filter.built().unwrap();
        assert_eq!(decoded.build_time(), 77);
        assert_eq!(decoded.membership(), original.membership());
        assert_eq!(decoded.range(), original.range());
    }

    #[test]
    fn test_encode_unbuilt_fails() {
        let filter = FastRoughFilter::new();
        assert!(matches!(
            RoughFilterCodec::encode_binary(&filter),
            Err(Error::NoDataToSerialize)
        ));
        let mut entry = Map::new();
        assert!(matches!(
            RoughFilterCodec::encode_json(&filter, &mut entry),
            Err(Error::NoDataToSerialize)
        ));
        assert!(entry.is_empty());
    }

    #[test]
    fn test_decode_truncated_record() {
        let bytes = RoughFilterCodec::encode_binary(&built_filter()).unwrap();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            RoughFilterCodec::decode_binary(truncated),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_decode_corrupted_length() {
        let mut bytes = RoughFilterCodec::encode_binary(&built_filter()).unwrap().to_vec();
        let wrong = (bytes.len() as u32 + 8).to_le_bytes();
        bytes[0..4].copy_from_slice(&wrong);
        assert!(matches!(RoughFilterCodec::decode_binary(&bytes), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        // Declared length matches the padded buffer, but the blobs end early.
        let mut bytes = RoughFilterCodec::encode_binary(&built_filter()).unwrap().to_vec();
        bytes.extend_from_slice(&[0, 0, 0]);
        let len = (bytes.len() as u32).to_le_bytes();
        bytes[0..4].copy_from_slice(&len);
        assert!(matches!(RoughFilterCodec::decode_binary(&bytes), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_decode_empty_and_short_buffers() {
        assert!(matches!(RoughFilterCodec::decode_binary(&[]), Err(Error::Corruption(_))));
        assert!(matches!(
            RoughFilterCodec::decode_binary(&[12, 0, 0, 0, 1, 0]),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_json_absent() {
        let entry = Map::new();
        let (outcome, built) = RoughFilterCodec::decode_json(&entry);
        assert_eq!(outcome, JsonLoadOutcome::Absent);
        assert!(built.is_none());
    }

    #[test]
    fn test_json_loaded() {
        let mut entry = Map::new();
        RoughFilterCodec::encode_json(&built_filter(), &mut entry).unwrap();
        assert!(entry.contains_key(JSON_TAG_BUILD_TIME));
        assert!(entry.contains_key("membership_summary"));
        assert!(entry.contains_key("range_summary"));

        let (outcome, built) = RoughFilterCodec::decode_json(&entry);
        assert_eq!(outcome, JsonLoadOutcome::Loaded);
        assert_eq!(built.unwrap().build_time(), 77);
    }

    #[test]
    fn test_json_partial() {
        let mut entry = Map::new();
        RoughFilterCodec::encode_json(&built_filter(), &mut entry).unwrap();

        let mut missing_range = entry.clone();
        missing_range.remove("range_summary");
        let (outcome, built) = RoughFilterCodec::decode_json(&missing_range);
        assert_eq!(outcome, JsonLoadOutcome::PartiallyLoaded);
        assert!(built.is_none());

        let mut garbled = entry.clone();
        garbled.insert("membership_summary".to_string(), JsonValue::from("garbage"));
        let (outcome, _) = RoughFilterCodec::decode_json(&garbled);
        assert_eq!(outcome, JsonLoadOutcome::PartiallyLoaded);

        let mut bad_time = entry;
        bad_time.insert(JSON_TAG_BUILD_TIME.to_string(), JsonValue::from("yesterday"));
        let (outcome, _) = RoughFilterCodec::decode_json(&bad_time);
        assert_eq!(outcome, JsonLoadOutcome::PartiallyLoaded);
    }
}

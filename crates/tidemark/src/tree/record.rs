//! Fixed-width binary records stored in sorted-tree blocks.
//!
//! Keys and values are type parameters of the tree, constrained by a small
//! capability set: a fixed encoded size, encode into a slice, decode from a
//! slice, and (for keys) a total order. Concrete shapes for the historian
//! workload are provided below; other widths plug in the same way.
//!
//! All multi-byte integers use little-endian encoding.

/// A fixed-width binary record.
///
/// `encode` and `decode` operate on exactly [`Record::SIZE`] bytes; callers
/// always hand in slices of that length.
pub trait Record: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encodes the record into `buf`, which is exactly `SIZE` bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes a record from `buf`, which is exactly `SIZE` bytes long.
    fn decode(buf: &[u8]) -> Self;
}

/// A record usable as a tree key: totally ordered in addition to the
/// [`Record`] capabilities. The byte encoding does not need to preserve
/// order; comparisons always go through the decoded value.
pub trait Key: Record + Ord {}

impl<T: Record + Ord> Key for T {}

/// The ordering key of a historian sample: `(timestamp, point_id)`.
///
/// Keys are unique per sample; inserting an existing key is refused rather
/// than overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleKey {
    /// Sample timestamp.
    pub timestamp: u64,
    /// Identifier of the measured point.
    pub point_id: u64,
}

impl SampleKey {
    /// Creates a new sample key.
    pub fn new(timestamp: u64, point_id: u64) -> Self {
        Self {
            timestamp,
            point_id,
        }
    }
}

impl Record for SampleKey {
    const SIZE: usize = 16;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.point_id.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            timestamp: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            point_id: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// The payload of a historian sample: quality flags plus the measured value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleValue {
    /// Quality/state flags for the sample.
    pub flags: u64,
    /// The measured value.
    pub value: f64,
}

impl SampleValue {
    /// Creates a new sample value.
    pub fn new(flags: u64, value: f64) -> Self {
        Self { flags, value }
    }
}

impl Record for SampleValue {
    const SIZE: usize = 16;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.value.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            flags: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            value: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_key_roundtrip() {
        let key = SampleKey::new(1_700_000_000_000, 42);
        let mut buf = [0u8; SampleKey::SIZE];
        key.encode(&mut buf);
        assert_eq!(SampleKey::decode(&buf), key);
    }

    #[test]
    fn test_sample_value_roundtrip() {
        let value = SampleValue::new(0b1010, 230.17);
        let mut buf = [0u8; SampleValue::SIZE];
        value.encode(&mut buf);
        assert_eq!(SampleValue::decode(&buf), value);
    }

    #[test]
    fn test_key_order_is_time_then_point() {
        let a = SampleKey::new(100, 9);
        let b = SampleKey::new(101, 1);
        let c = SampleKey::new(101, 2);
        assert!(a < b);
        assert!(b < c);
    }
}

//! Core types for Strata

use md5::{Digest, Md5};
use std::fmt;

/// Timestamp in seconds since Unix epoch
pub type Timestamp = i64;

/// Length of an on-disk metric key in bytes
pub const KEY_LENGTH: usize = 16;

/// Hashed metric name as stored on disk.
///
/// Keys order byte-wise, which is the order of keys inside every segment.
/// Two distinct names hashing to the same key are treated as one series.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey([u8; KEY_LENGTH]);

impl MetricKey {
    /// Hash a metric name (MD5 of its UTF-8 bytes)
    pub fn from_name(name: &str) -> Self {
        let digest = Md5::digest(name.as_bytes());
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Wrap raw key bytes read from disk
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetricKey({})", self)
    }
}

/// A single appended measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Timestamp in seconds
    pub timestamp: Timestamp,
    /// Hashed metric name
    pub key: MetricKey,
    /// Raw value bytes, stored as received
    pub value: Vec<u8>,
}

impl Record {
    /// Create a record for a named metric
    pub fn new(timestamp: Timestamp, name: &str, value: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            key: MetricKey::from_name(name),
            value: value.into(),
        }
    }

    /// Create a record from an already hashed key
    pub fn with_key(timestamp: Timestamp, key: MetricKey, value: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            key,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_key_is_md5() {
        // RFC 1321 test vector for "abc"
        let key = MetricKey::from_name("abc");
        assert_eq!(key.to_string(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(key, MetricKey::from_name("abc"));
        assert_ne!(key, MetricKey::from_name("abd"));
    }

    #[test]
    fn test_metric_key_orders_bytewise() {
        let low = MetricKey::from_bytes([0u8; KEY_LENGTH]);
        let mut high_bytes = [0u8; KEY_LENGTH];
        high_bytes[0] = 1;
        let high = MetricKey::from_bytes(high_bytes);
        assert!(low < high);
    }
}

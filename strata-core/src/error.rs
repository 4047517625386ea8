//! Error types for Strata

use thiserror::Error;

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Strata error types
#[derive(Error, Debug)]
pub enum StrataError {
    /// Read, write, seek or sync on an underlying file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Decode attempted on fewer bytes than the format requires
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    /// Segment build attempted on zero records
    #[error("Refusing to build a segment from an empty batch")]
    EmptyFlush,

    /// Header or directory values that cannot describe a valid file
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Compaction could not be scheduled or run
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StrataError {
    /// Shorthand for a short read of `needed` bytes where only `available` exist
    pub fn truncated(needed: usize, available: usize) -> Self {
        StrataError::TruncatedInput { needed, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let short = StrataError::truncated(24, 10);
        assert!(matches!(
            short,
            StrataError::TruncatedInput {
                needed: 24,
                available: 10
            }
        ));
        assert_eq!(
            short.to_string(),
            "Truncated input: needed 24 bytes, 10 available"
        );

        let io = StrataError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.to_string(), "IO error: disk");
    }
}

/// Errors that can be encountered while taking an in-place view of an
/// IP or TCP header.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum HeaderError {
    /// Error when the buffer is too short to contain the header that was
    /// requested from it.
    LenTooSmall { required: usize, actual: usize },

    /// Error when the first nibble of the buffer is neither 4 nor 6.
    UnsupportedIpVersion { version: u8 },

    /// Error when the IPv4 "internet header length" is below the minimum
    /// of 5 words.
    IhlTooSmall { ihl: u8 },

    /// Error when the TCP data offset is so small that the data would
    /// start within the TCP header itself.
    DataOffsetTooSmall { data_offset: u8 },
}

impl core::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use HeaderError::*;
        match self {
            LenTooSmall { required, actual } => write!(
                f,
                "Header Error: buffer of {actual} byte(s) is too small to contain the header ({required} byte(s) required)."
            ),
            UnsupportedIpVersion { version } => write!(
                f,
                "Header Error: unsupported IP version number {version} (only 4 and 6 are supported)."
            ),
            IhlTooSmall { ihl } => write!(
                f,
                "Header Error: 'internet header length' too small ({ihl}). The minimum value is 5."
            ),
            DataOffsetTooSmall { data_offset } => write!(
                f,
                "Header Error: 'data offset' too small ({data_offset}). The 'data offset' must be at least 5 so the data is not overlapping with the TCP header itself."
            ),
        }
    }
}

impl std::error::Error for HeaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::HeaderError::*;
    use std::{
        collections::hash_map::DefaultHasher,
        error::Error,
        hash::{Hash, Hasher},
    };

    #[test]
    fn debug() {
        assert_eq!(
            "DataOffsetTooSmall { data_offset: 1 }",
            format!("{:?}", DataOffsetTooSmall { data_offset: 1 })
        );
    }

    #[test]
    fn clone_eq_hash() {
        let err = LenTooSmall {
            required: 20,
            actual: 2,
        };
        assert_eq!(err, err.clone());
        let hash_a = {
            let mut hasher = DefaultHasher::new();
            err.hash(&mut hasher);
            hasher.finish()
        };
        let hash_b = {
            let mut hasher = DefaultHasher::new();
            err.clone().hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn fmt() {
        assert_eq!(
            "Header Error: buffer of 2 byte(s) is too small to contain the header (20 byte(s) required).",
            format!(
                "{}",
                LenTooSmall {
                    required: 20,
                    actual: 2
                }
            )
        );
        assert_eq!(
            "Header Error: unsupported IP version number 5 (only 4 and 6 are supported).",
            format!("{}", UnsupportedIpVersion { version: 5 })
        );
        assert_eq!(
            "Header Error: 'internet header length' too small (2). The minimum value is 5.",
            format!("{}", IhlTooSmall { ihl: 2 })
        );
        assert_eq!(
            "Header Error: 'data offset' too small (1). The 'data offset' must be at least 5 so the data is not overlapping with the TCP header itself.",
            format!("{}", DataOffsetTooSmall { data_offset: 1 })
        );
    }

    #[test]
    fn source() {
        assert!(UnsupportedIpVersion { version: 0 }.source().is_none());
    }
}

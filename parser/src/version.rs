//! Representation of the requested HTTP version.

use std::fmt::Display;

use crate::h1::ParseError;

/// Representation of the requested HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
}

impl Version {
    /// Parses a version token of the form `HTTP/<major>.<minor>`.
    ///
    /// Only 1.0 and 1.1 are in scope for this core; HTTP/2 and HTTP/3 are
    /// non-goals (§1) and any other digits are rejected.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        match buf {
            b"HTTP/1.0" => Ok(Self::H1_0),
            b"HTTP/1.1" => Ok(Self::H1_1),
            _ => Err(ParseError::Version),
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_supported_versions() {
        assert_eq!(Version::from_bytes(b"HTTP/1.1"), Ok(Version::H1_1));
        assert_eq!(Version::from_bytes(b"HTTP/1.0"), Ok(Version::H1_0));
    }

    #[test]
    fn rejects_unsupported_versions() {
        assert_eq!(Version::from_bytes(b"HTTP/2.0"), Err(ParseError::Version));
        assert_eq!(Version::from_bytes(b"HTTP/0.9"), Err(ParseError::Version));
        assert_eq!(Version::from_bytes(b"bogus"), Err(ParseError::Version));
    }
}

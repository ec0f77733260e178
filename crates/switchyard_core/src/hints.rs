//! Soft hints, hard constraints, and memory-mapping parameters.

use crate::error::UsageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Soft preference for the kind of backend used when none is named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prefer {
    /// Prefer process-based workers
    Processes,
    /// Prefer thread-based workers
    Threads,
}

impl Prefer {
    /// Canonical string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processes => "processes",
            Self::Threads => "threads",
        }
    }
}

impl fmt::Display for Prefer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Prefer {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processes" => Ok(Self::Processes),
            "threads" => Ok(Self::Threads),
            other => Err(UsageError::InvalidPrefer {
                value: other.to_string(),
            }),
        }
    }
}

/// Hard constraint on the backend, overriding even an explicit choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Require {
    /// Workers must share memory with the caller
    #[serde(rename = "sharedmem")]
    SharedMem,
}

impl Require {
    /// Canonical string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SharedMem => "sharedmem",
        }
    }
}

impl fmt::Display for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Require {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sharedmem" => Ok(Self::SharedMem),
            other => Err(UsageError::InvalidRequire {
                value: other.to_string(),
            }),
        }
    }
}

/// Mode used when large arguments are memory-mapped for workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MmapMode {
    /// `r`
    #[serde(rename = "r")]
    ReadOnly,
    /// `r+`
    #[serde(rename = "r+")]
    ReadWrite,
    /// `w+`
    #[serde(rename = "w+")]
    Overwrite,
    /// `c`
    #[serde(rename = "c")]
    CopyOnWrite,
}

impl MmapMode {
    /// Canonical string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "r",
            Self::ReadWrite => "r+",
            Self::Overwrite => "w+",
            Self::CopyOnWrite => "c",
        }
    }
}

impl fmt::Display for MmapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MmapMode {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(Self::ReadOnly),
            "r+" => Ok(Self::ReadWrite),
            "w+" => Ok(Self::Overwrite),
            "c" => Ok(Self::CopyOnWrite),
            other => Err(UsageError::InvalidMmapMode {
                value: other.to_string(),
            }),
        }
    }
}

/// Threshold in bytes above which arguments are memory-mapped
///
/// Parses from an integer with an optional `K`, `M` or `G` suffix, each a
/// power of 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ByteSize(u64);

impl ByteSize {
    /// One kibibyte
    pub const KIB: u64 = 1 << 10;
    /// One mebibyte
    pub const MIB: u64 = 1 << 20;
    /// One gibibyte
    pub const GIB: u64 = 1 << 30;

    /// Create from a raw byte count
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Raw byte count
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UsageError::InvalidByteSize {
            value: s.to_string(),
        };

        let trimmed = s.trim();
        let (digits, multiplier) = match trimmed.chars().last() {
            Some('K') => (&trimmed[..trimmed.len() - 1], Self::KIB),
            Some('M') => (&trimmed[..trimmed.len() - 1], Self::MIB),
            Some('G') => (&trimmed[..trimmed.len() - 1], Self::GIB),
            Some(_) => (trimmed, 1),
            None => return Err(invalid()),
        };

        let count: u64 = digits.parse().map_err(|_| invalid())?;
        count.checked_mul(multiplier).map(Self).ok_or_else(invalid)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes != 0 && bytes % Self::GIB == 0 {
            write!(f, "{}G", bytes / Self::GIB)
        } else if bytes != 0 && bytes % Self::MIB == 0 {
            write!(f, "{}M", bytes / Self::MIB)
        } else if bytes != 0 && bytes % Self::KIB == 0 {
            write!(f, "{}K", bytes / Self::KIB)
        } else {
            write!(f, "{}", bytes)
        }
    }
}

impl TryFrom<String> for ByteSize {
    type Error = UsageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ByteSize> for String {
    fn from(value: ByteSize) -> Self {
        value.to_string()
    }
}

//! Scan identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};

/// Timestamp layout of generated ids: `YYYYMMDD_HHMMSS_ffffff`.
pub const SCAN_ID_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

/// A scan identifier, safe to embed in a file name.
///
/// # Example
///
/// ```
/// use scan_jobs::ScanId;
///
/// let id: ScanId = "20250301_101500_000042".parse().unwrap();
/// assert_eq!(id.as_str(), "20250301_101500_000042");
///
/// assert!("../etc/passwd".parse::<ScanId>().is_err());
/// assert!("".parse::<ScanId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScanId(String);

impl ScanId {
    /// Validates and wraps an id.
    ///
    /// Ids are 1 to 128 ASCII letters, digits, `_` or `-`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidScanId`] for anything else.
    pub fn new(id: impl Into<String>) -> JobResult<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 128
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(id))
        } else {
            Err(JobError::InvalidScanId { id })
        }
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScanId {
    type Err = JobError;

    fn from_str(s: &str) -> JobResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ScanId {
    type Error = JobError;

    fn try_from(s: String) -> JobResult<Self> {
        Self::new(s)
    }
}

impl From<ScanId> for String {
    fn from(id: ScanId) -> Self {
        id.0
    }
}

/// Produces time-derived scan ids that never repeat within a process.
///
/// Ids are the local wall-clock time at microsecond resolution. When two
/// requests land in the same microsecond, or the clock steps backwards, the
/// generator advances one microsecond past the last id it issued, so ids
/// are strictly increasing in both time and string order.
#[derive(Debug, Default)]
pub struct ScanIdGenerator {
    last: Mutex<Option<NaiveDateTime>>,
}

impl ScanIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next id.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] if a previous caller panicked while
    /// holding the generator.
    pub fn next_id(&self) -> JobResult<ScanId> {
        self.next_at(Local::now())
    }

    fn next_at(&self, now: DateTime<Local>) -> JobResult<ScanId> {
        let now = now.naive_local();
        let now = now
            .with_nanosecond(now.nanosecond() / 1_000 * 1_000)
            .unwrap_or(now);

        let mut last = self.last.lock().map_err(|_| JobError::Poisoned)?;
        let stamp = match *last {
            Some(prev) if now <= prev => prev + TimeDelta::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);

        ScanId::new(stamp.format(SCAN_ID_FORMAT).to_string())
    }
}

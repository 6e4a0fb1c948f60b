//! Attempt and artifact identifiers.
//!
//! Both are prefixed ULIDs (`attempt-01J...`, `backup-01J...`). The backup
//! id doubles as the artifact's file stem, so it has to parse back from a
//! file name; ULID order is creation order, so the newest backup is the
//! largest id.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub trait IdKind: Send + Sync + 'static {
    const PREFIX: &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<K: IdKind> {
    ulid: Ulid,
    #[serde(skip)]
    kind: PhantomData<K>,
}

impl<K: IdKind> Id<K> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            kind: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Millisecond timestamp embedded in the ULID.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        let ms = i64::try_from(self.ulid.timestamp_ms()).ok()?;
        Utc.timestamp_millis_opt(ms).single()
    }
}

impl<K: IdKind> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", K::PREFIX, self.ulid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{input:?} is not a {prefix}<ulid> id")]
pub struct ParseIdError {
    input: String,
    prefix: &'static str,
}

impl<K: IdKind> FromStr for Id<K> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(K::PREFIX)
            .and_then(|rest| Ulid::from_string(rest).ok())
            .map(Self::from_ulid)
            .ok_or_else(|| ParseIdError {
                input: s.to_string(),
                prefix: K::PREFIX,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attempt {}

impl IdKind for Attempt {
    const PREFIX: &'static str = "attempt-";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Backup {}

impl IdKind for Backup {
    const PREFIX: &'static str = "backup-";
}

/// One `migrate` run.
pub type AttemptId = Id<Attempt>;

/// One backup artifact; also its file stem.
pub type ArtifactId = Id<Backup>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parses_back() {
        let id = ArtifactId::from_ulid(Ulid::new());
        let parsed: ArtifactId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let attempt = AttemptId::from_ulid(Ulid::new()).to_string();
        assert!(attempt.parse::<ArtifactId>().is_err());
        assert!("backup-not-a-ulid".parse::<ArtifactId>().is_err());
    }

    #[test]
    fn issued_at_reads_the_ulid_timestamp() {
        let id = AttemptId::from_ulid(Ulid::from_parts(1_700_000_000_123, 7));
        assert_eq!(id.issued_at().unwrap().timestamp_millis(), 1_700_000_000_123);
    }
}

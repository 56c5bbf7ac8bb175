//! This module defines the interface of a single storage backend ("disk") and the values
//! a fan-out operation produces: one [`Outcome`] per disk slot, gathered into an [`OutcomeSet`].
//!
//! Disks are opaque executors. They either succeed or return a [`DiskError`] whose [`FailureKind`]
//! is drawn from a closed enumeration. Failures are data here, not exceptions: they flow through
//! [`OutcomeSet`] and are reduced into a single verdict by [`crate::quorum`].
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, str::FromStr};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

pub mod fault;
pub mod in_memory;

/// Every category of failure a disk can report.
///
/// Outcomes are compared by kind only, so two failures of the same kind are interchangeable
/// for quorum purposes regardless of the message attached to them.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum FailureKind {
    DiskNotFound,
    FaultyDisk,
    DiskFull,
    DiskAccessDenied,
    /// The disk did not answer before the coordinator's deadline
    DiskTimeout,
    UnformattedDisk,
    CorruptedFormat,
    VolumeNotFound,
    VolumeExists,
    VolumeNotEmpty,
    FileNotFound,
    FileAccessDenied,
    /// The stored bytes do not match their recorded checksum
    FileCorrupted,
}

/// Error returned by a [`Disk`] call
#[derive(Clone, Debug, Serialize)]
pub struct DiskError {
    pub kind: FailureKind,
    pub reason: String,
}

impl DiskError {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl PartialEq for DiskError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for DiskError {}

impl From<FailureKind> for DiskError {
    fn from(kind: FailureKind) -> Self {
        Self {
            kind,
            reason: kind.to_string(),
        }
    }
}

impl std::fmt::Display for DiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for DiskError {}

pub type Result<T> = std::result::Result<T, DiskError>;

/// The result of one operation attempt on one disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

impl Outcome {
    /// Extracts the [`Outcome`] of a disk call, dropping any payload or message
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(err) => Outcome::Failure(err.kind),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(kind) => Some(*kind),
        }
    }
}

impl From<FailureKind> for Outcome {
    fn from(kind: FailureKind) -> Self {
        Outcome::Failure(kind)
    }
}

impl FromStr for Outcome {
    type Err = strum::ParseError;

    /// Parses either `Success` or the name of a [`FailureKind`]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("success") {
            return Ok(Outcome::Success);
        }

        Ok(Outcome::Failure(FailureKind::from_str(s)?))
    }
}

/// One [`Outcome`] per disk slot, in slot order.
///
/// The length always matches the number of disks addressed: an unreachable disk is a failure
/// entry, never a missing one, otherwise the quorum math would be computed over the wrong N.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSet(Vec<Outcome>);

impl OutcomeSet {
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        Self(outcomes)
    }

    pub fn from_results<T>(results: &[Result<T>]) -> Self {
        Self(results.iter().map(Outcome::of).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Outcome> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Outcome] {
        &self.0
    }
}

impl FromIterator<Outcome> for OutcomeSet {
    fn from_iter<I: IntoIterator<Item = Outcome>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a OutcomeSet {
    type Item = &'a Outcome;
    type IntoIter = std::slice::Iter<'a, Outcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInfo {
    pub volume: String,
    pub path: String,
    pub size: u64,
}

/// The interface every storage backend participating in an erasure set implements.
///
/// Volumes are flat namespaces of paths. Implementations must map every failure to a [`FailureKind`].
#[async_trait]
pub trait Disk: Debug + Send + Sync {
    async fn make_volume(&self, volume: &str) -> Result<()>;
    async fn stat_volume(&self, volume: &str) -> Result<VolumeInfo>;
    /// Fails with [`FailureKind::VolumeNotEmpty`] if the volume still holds any file
    async fn delete_volume(&self, volume: &str) -> Result<()>;
    async fn write_all(&self, volume: &str, path: &str, data: Bytes) -> Result<()>;
    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes>;
    async fn stat_file(&self, volume: &str, path: &str) -> Result<FileInfo>;
    /// Removes exactly `path`. Paths stored below `path/` are other files and are left alone.
    async fn delete_file(&self, volume: &str, path: &str) -> Result<()>;
    /// Removes every file stored below `prefix/`. Fails with [`FailureKind::FileNotFound`] if there is none.
    async fn delete_prefix(&self, volume: &str, prefix: &str) -> Result<()>;
    /// Atomically moves `src` over `dst`, replacing whatever `dst` held
    async fn rename_file(&self, volume: &str, src: &str, dst: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::{DiskError, FailureKind, Outcome, OutcomeSet};
    use std::str::FromStr;

    #[test]
    fn disk_errors_compare_by_kind_only() {
        let lhs = DiskError::new(FailureKind::DiskFull, "disk 1 has no space left");
        let rhs = DiskError::new(FailureKind::DiskFull, "quota exceeded on disk 3");
        assert_eq!(lhs, rhs);
        assert_ne!(lhs, DiskError::from(FailureKind::FaultyDisk));
    }

    #[test]
    fn outcome_set_keeps_one_entry_per_slot() {
        let results: Vec<super::Result<u64>> = vec![
            Ok(10),
            Err(DiskError::new(FailureKind::DiskNotFound, "slot offline")),
            Err(FailureKind::DiskTimeout.into()),
        ];

        let outcomes = OutcomeSet::from_results(&results);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes.as_slice(),
            &[
                Outcome::Success,
                Outcome::Failure(FailureKind::DiskNotFound),
                Outcome::Failure(FailureKind::DiskTimeout),
            ]
        );
    }

    #[test]
    fn parse_outcomes() {
        assert_eq!(Outcome::from_str("success").unwrap(), Outcome::Success);
        assert_eq!(
            Outcome::from_str("VolumeNotFound").unwrap(),
            Outcome::Failure(FailureKind::VolumeNotFound)
        );
        assert!(Outcome::from_str("NotAKind").is_err());
    }
}

//! This module defines the caller visible errors that can be returned by ecquorum.

use std::fmt::Display;

use serde::Serialize;

use crate::{
    disk::{DiskError, FailureKind},
    region::LocationConstraintError,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Error enum with all possible variants
#[derive(Debug, Serialize)]
pub enum Error {
    /// A quorum of disks agreed on this failure kind
    Disk(DiskError),
    /// No outcome reached a strict majority, or a success majority was too small for the operation
    QuorumNotReached {
        operation: String,
        reason: String,
    },
    /// A precondition was violated by the caller (duplicate part names, mismatched slot counts...)
    InvalidState {
        reason: String,
    },
    InvalidConfig {
        reason: String,
    },
    InvalidRequest {
        reason: String,
    },
    LocationConstraint(LocationConstraintError),
    Io {
        reason: String,
    },
    Logic {
        reason: String,
    },
}

impl Error {
    /// Returns the [`FailureKind`] a quorum of disks agreed on, if any
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Disk(err) => Some(err.kind),
            _ => None,
        }
    }

    /// Returns true if this is an instance of [`Error::QuorumNotReached`]
    pub fn is_quorum_not_reached(&self) -> bool {
        matches!(self, Error::QuorumNotReached { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

impl From<DiskError> for Error {
    fn from(err: DiskError) -> Self {
        Self::Disk(err)
    }
}

impl From<LocationConstraintError> for Error {
    fn from(err: LocationConstraintError) -> Self {
        Self::LocationConstraint(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest {
            reason: err.to_string(),
        }
    }
}

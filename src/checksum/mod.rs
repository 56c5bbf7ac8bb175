//! Per-part integrity records of a multipart object and the reconciliation of two snapshots of them.
//!
//! While a part is being written, the durable metadata may move forward for other parts written by
//! concurrent uploads. [`reconcile`] merges the writer's snapshot (`current`) with another snapshot
//! (`incoming`) so that:
//!  1. the part being written keeps the record from `current`, it is never regressed to a stale value from `incoming`
//!  2. every other part takes the record from `incoming` when it has one
//!  3. no part known to either side is lost and none is duplicated
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};

/// Algorithms this crate knows how to compute. Records may carry any algorithm name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Crc32c,
}

impl ChecksumAlgorithm {
    /// Lowercase hex of the digest, big endian
    pub fn digest(&self, data: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Crc32c => hex::encode(crc32c::crc32c(data).to_be_bytes()),
        }
    }
}

/// Integrity digest of one part
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartChecksum {
    pub part_name: String,
    pub algorithm: String,
    pub hash: String,
}

impl PartChecksum {
    pub fn new(
        part_name: impl Into<String>,
        algorithm: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            part_name: part_name.into(),
            algorithm: algorithm.into(),
            hash: hash.into(),
        }
    }

    pub fn compute(
        part_name: impl Into<String>,
        algorithm: ChecksumAlgorithm,
        data: &[u8],
    ) -> Self {
        Self {
            part_name: part_name.into(),
            algorithm: algorithm.to_string(),
            hash: algorithm.digest(data),
        }
    }

    /// Recomputes the digest of `data` and compares it with the recorded hash.
    ///
    /// # Error
    /// Returns [`Error::InvalidState`] if the recorded algorithm is not a [`ChecksumAlgorithm`]
    pub fn verify(&self, data: &[u8]) -> Result<bool> {
        let algorithm: ChecksumAlgorithm =
            self.algorithm.parse().map_err(|_| Error::InvalidState {
                reason: format!(
                    "part {} was hashed with unsupported algorithm {}",
                    self.part_name, self.algorithm
                ),
            })?;

        Ok(algorithm.digest(data) == self.hash)
    }
}

/// Ordered [`PartChecksum`]s with unique part names.
///
/// Uniqueness is checked on construction and deserialization, so a collection in hand is always well formed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PartChecksum>", into = "Vec<PartChecksum>")]
pub struct ChecksumCollection(Vec<PartChecksum>);

impl ChecksumCollection {
    /// # Error
    /// Returns [`Error::InvalidState`] if two records share a part name
    pub fn new(checksums: Vec<PartChecksum>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(checksums.len());
        for checksum in checksums.iter() {
            if !seen.insert(checksum.part_name.as_str()) {
                return Err(Error::InvalidState {
                    reason: format!("duplicate checksum for part {}", checksum.part_name),
                });
            }
        }

        Ok(Self(checksums))
    }

    pub fn get(&self, part_name: &str) -> Option<&PartChecksum> {
        self.0.iter().find(|checksum| checksum.part_name == part_name)
    }

    /// Returns a copy of this collection where `checksum` replaces the record with the same part name,
    /// or is appended if there is none
    pub fn with(&self, checksum: PartChecksum) -> Self {
        let mut checksums = self.0.clone();
        match checksums
            .iter_mut()
            .find(|existing| existing.part_name == checksum.part_name)
        {
            Some(existing) => *existing = checksum,
            None => checksums.push(checksum),
        }

        Self(checksums)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PartChecksum> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[PartChecksum] {
        &self.0
    }
}

impl TryFrom<Vec<PartChecksum>> for ChecksumCollection {
    type Error = Error;

    fn try_from(checksums: Vec<PartChecksum>) -> Result<Self> {
        Self::new(checksums)
    }
}

impl From<ChecksumCollection> for Vec<PartChecksum> {
    fn from(collection: ChecksumCollection) -> Self {
        collection.0
    }
}

/// Merges two checksum snapshots into a new one, protecting `active_part`.
///
/// The result lists `current`'s parts in `current`'s order followed by the parts only `incoming`
/// knows about, in `incoming`'s order. Neither input is modified.
pub fn reconcile(
    current: &ChecksumCollection,
    incoming: &ChecksumCollection,
    active_part: &str,
) -> ChecksumCollection {
    let incoming_by_name: HashMap<&str, &PartChecksum> = incoming
        .iter()
        .map(|checksum| (checksum.part_name.as_str(), checksum))
        .collect();
    let current_names: HashSet<&str> = current
        .iter()
        .map(|checksum| checksum.part_name.as_str())
        .collect();

    let mut merged = Vec::with_capacity(current.len() + incoming.len());
    for checksum in current.iter() {
        if checksum.part_name == active_part {
            merged.push(checksum.clone());
            continue;
        }

        match incoming_by_name.get(checksum.part_name.as_str()) {
            Some(fresher) => merged.push((*fresher).clone()),
            None => merged.push(checksum.clone()),
        }
    }

    merged.extend(
        incoming
            .iter()
            .filter(|checksum| !current_names.contains(checksum.part_name.as_str()))
            .cloned(),
    );

    ChecksumCollection(merged)
}

/// Same as [`reconcile`] for raw slices.
///
/// # Error
/// Returns [`Error::InvalidState`] if either input holds two records for the same part
pub fn reconcile_parts(
    current: &[PartChecksum],
    incoming: &[PartChecksum],
    active_part: &str,
) -> Result<ChecksumCollection> {
    let current = ChecksumCollection::new(current.to_vec())?;
    let incoming = ChecksumCollection::new(incoming.to_vec())?;

    Ok(reconcile(&current, &incoming, active_part))
}

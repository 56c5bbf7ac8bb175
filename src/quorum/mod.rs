//! Reduces the per-disk outcomes of one fan-out operation into a single verdict.
//!
//! The rule is a strict majority: an outcome wins only if more than `floor(N' / 2)` of the
//! non-ignored disks reported it, where N' is the number of entries left after discarding the
//! [`IgnoreSet`]. A plurality is never enough.
//!
//! # The collapsed sentinel
//! [`reduce_errs`] returns `None` both when a quorum of disks succeeded and when no outcome reached
//! a quorum. Callers that need to tell those apart inspect the [`Reduction`] returned by [`tally`]
//! ([`Reduction::has_quorum`], [`Reduction::max_count`], [`Reduction::considered`]).
use std::collections::BTreeSet;

use crate::disk::{FailureKind, Outcome, OutcomeSet};

/// Failure kinds excluded from quorum accounting for one operation.
///
/// An ignored entry is not a neutral vote: it does not count towards N' nor towards any group.
/// Only failures can be ignored, a [`Outcome::Success`] is always counted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IgnoreSet(BTreeSet<FailureKind>);

impl IgnoreSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_kinds(kinds: &[FailureKind]) -> Self {
        kinds.iter().copied().collect()
    }

    pub fn contains(&self, outcome: &Outcome) -> bool {
        match outcome {
            Outcome::Success => false,
            Outcome::Failure(kind) => self.0.contains(kind),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<FailureKind> for IgnoreSet {
    fn from_iter<I: IntoIterator<Item = FailureKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The result of a [`tally`] call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reduction {
    /// largest group, first-seen in slot order on ties. `None` if nothing was counted.
    leader: Option<Outcome>,
    /// size of the largest group
    max_count: usize,
    /// N': entries left after discarding the ignored kinds
    considered: usize,
}

impl Reduction {
    /// True iff the largest group holds a strict majority of the considered entries
    pub fn has_quorum(&self) -> bool {
        self.considered > 0 && self.max_count > self.considered / 2
    }

    /// The outcome a quorum agreed on, if any
    pub fn winner(&self) -> Option<Outcome> {
        if self.has_quorum() {
            self.leader
        } else {
            None
        }
    }

    /// The failure a quorum agreed on.
    ///
    /// `None` means "no error": either a quorum succeeded or no quorum was reached.
    pub fn error(&self) -> Option<FailureKind> {
        self.winner().and_then(|outcome| outcome.failure_kind())
    }

    pub fn is_success(&self) -> bool {
        self.winner() == Some(Outcome::Success)
    }

    /// True iff a quorum succeeded and at least `threshold` disks are part of it
    pub fn meets(&self, threshold: usize) -> bool {
        self.is_success() && self.max_count >= threshold
    }

    /// The largest group regardless of whether it reached quorum
    pub fn leader(&self) -> Option<Outcome> {
        self.leader
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn considered(&self) -> usize {
        self.considered
    }
}

/// Groups the non-ignored outcomes and reports the largest group.
///
/// Groups are kept in first-seen order and a later group only replaces the leader when it is strictly
/// larger, so ties resolve to the outcome that appears first in slot order.
pub fn tally(outcomes: &OutcomeSet, ignore: &IgnoreSet) -> Reduction {
    // there are only as many groups as there are FailureKind variants (+1), a linear scan is enough
    let mut groups: Vec<(Outcome, usize)> = Vec::new();
    let mut considered = 0;

    for outcome in outcomes.iter().filter(|outcome| !ignore.contains(outcome)) {
        considered += 1;
        match groups.iter_mut().find(|(group, _)| group == outcome) {
            Some((_, count)) => *count += 1,
            None => groups.push((*outcome, 1)),
        }
    }

    let mut leader: Option<(Outcome, usize)> = None;
    for (outcome, count) in groups {
        if leader.map_or(true, |(_, max_count)| count > max_count) {
            leader = Some((outcome, count));
        }
    }

    Reduction {
        leader: leader.map(|(outcome, _)| outcome),
        max_count: leader.map_or(0, |(_, count)| count),
        considered,
    }
}

/// Returns the failure kind a strict majority of the non-ignored disks agree on.
///
/// `None` is returned both when the majority succeeded and when there is no majority at all.
/// Use [`tally`] to disambiguate.
pub fn reduce_errs(outcomes: &OutcomeSet, ignore: &IgnoreSet) -> Option<FailureKind> {
    tally(outcomes, ignore).error()
}

/// Returns the most common value among `values` and how many times it was found.
///
/// Ties resolve to the value seen first.
pub fn pick_quorum_value<T: PartialEq>(values: impl IntoIterator<Item = T>) -> Option<(T, usize)> {
    let mut groups: Vec<(T, usize)> = Vec::new();
    for value in values {
        match groups.iter_mut().find(|(group, _)| *group == value) {
            Some((_, count)) => *count += 1,
            None => groups.push((value, 1)),
        }
    }

    let mut leader: Option<(T, usize)> = None;
    for (value, count) in groups {
        if leader.as_ref().map_or(true, |(_, max_count)| count > *max_count) {
            leader = Some((value, count));
        }
    }

    leader
}

use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Outcome, Status};

/// Per-outcome counts for a run. Merging is associative and commutative,
/// so files may be tallied in any order or on any thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total: u64,
}

impl RunSummary {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        let mut summary = Self::default();
        summary.record(outcome);
        summary
    }

    pub fn record(&mut self, outcome: &Outcome) {
        match outcome.status() {
            Status::Updated => self.updated += 1,
            Status::Skipped => self.skipped += 1,
            Status::Failed => self.failed += 1,
        }
        self.total += 1;
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            updated: self.updated + other.updated,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
            total: self.total + other.total,
        }
    }
}

impl Add for RunSummary {
    type Output = RunSummary;

    fn add(self, other: Self) -> Self {
        self.merge(other)
    }
}

impl std::iter::Sum for RunSummary {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::merge)
    }
}

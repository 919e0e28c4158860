//! Running counters over a change-set stream.
//!
//! Used by tests and instrumentation to summarize what a stream emitted.

use cachet_core::{ChangeSet, Error};

/// Counters of one change set, or accumulated over many.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChangeStatistics {
    /// Sequence number of the change set (1-based; 0 before any)
    pub index: usize,
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
    pub refreshes: usize,
    pub moves: usize,
    /// Number of items downstream after the change set (adds minus removes)
    pub count: usize,
}

impl ChangeStatistics {
    /// Total number of changes counted.
    #[inline]
    pub fn total(&self) -> usize {
        self.adds + self.updates + self.removes + self.refreshes + self.moves
    }
}

/// Latest and overall statistics of a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Statistics of the most recent change set
    pub latest: ChangeStatistics,
    /// Statistics accumulated over every change set
    pub overall: ChangeStatistics,
    /// Number of change sets received
    pub index: usize,
    /// Number of faults observed
    pub errors: usize,
}

/// Accumulates change-set statistics.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    summary: ChangeSummary,
}

impl Diagnostics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one change set into the summary.
    pub fn apply<K, V>(&mut self, changes: &ChangeSet<K, V>) -> &ChangeSummary {
        let summary = &mut self.summary;
        summary.index += 1;

        let count = (summary.overall.count + changes.adds()).saturating_sub(changes.removes());
        summary.latest = ChangeStatistics {
            index: summary.index,
            adds: changes.adds(),
            updates: changes.updates(),
            removes: changes.removes(),
            refreshes: changes.refreshes(),
            moves: changes.moves(),
            count,
        };

        let overall = &mut summary.overall;
        overall.index = summary.index;
        overall.adds += changes.adds();
        overall.updates += changes.updates();
        overall.removes += changes.removes();
        overall.refreshes += changes.refreshes();
        overall.moves += changes.moves();
        overall.count = count;
        &self.summary
    }

    /// Counts a fault of the stream.
    pub fn record_error(&mut self, error: &Error) -> &ChangeSummary {
        tracing::debug!(%error, index = self.summary.index, "fault recorded");
        self.summary.errors += 1;
        &self.summary
    }

    /// Returns the current summary.
    #[inline]
    pub fn summary(&self) -> &ChangeSummary {
        &self.summary
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        self.summary = ChangeSummary::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::Change;

    #[test]
    fn test_diagnostics_accumulates() {
        let mut diagnostics = Diagnostics::new();
        let first: ChangeSet<&str, i32> = vec![Change::add("a", 1), Change::add("b", 2)].into_iter().collect();
        diagnostics.apply(&first);

        let second: ChangeSet<&str, i32> = vec![Change::update("a", 3, 1), Change::remove("b", 2)]
            .into_iter()
            .collect();
        let summary = diagnostics.apply(&second).clone();

        assert_eq!(summary.index, 2);
        assert_eq!(summary.latest.updates, 1);
        assert_eq!(summary.latest.count, 1);
        assert_eq!(summary.overall.adds, 2);
        assert_eq!(summary.overall.removes, 1);
        assert_eq!(summary.overall.total(), 4);
        assert_eq!(summary.errors, 0);
    }

    #[test]
    fn test_diagnostics_error_and_reset() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.record_error(&Error::upstream_fault("boom"));
        assert_eq!(diagnostics.summary().errors, 1);

        diagnostics.reset();
        assert_eq!(diagnostics.summary(), &ChangeSummary::default());
    }
}

use std::collections::HashMap;

use crate::TrainingStatus;

/// Legal prior overall statuses for every reachable target status.
///
/// A target missing from the table (`NOT_STARTED`, `PENDING`) can never be entered through a learner update.
/// `PROCESSING` lists itself as a legal source; no other self loop exists.
#[derive(Debug, Clone)]
pub struct TransitionLattice {
    sources: HashMap<TrainingStatus, Vec<TrainingStatus>>,
}

impl TransitionLattice {
    /// The lattice enforced by the job monitor.
    pub fn standard() -> Self {
        use TrainingStatus::*;

        let after_start = vec![Storing, Processing, Downloading, Pending, NotStarted];
        let sources = HashMap::from([
            (Downloading, vec![Pending, NotStarted]),
            (Processing, vec![Processing, Downloading, Pending]),
            (Storing, vec![Processing, Downloading, Pending, NotStarted]),
            (Completed, after_start.clone()),
            (Failed, after_start.clone()),
            (Halted, after_start),
        ]);
        Self { sources }
    }

    /// Statuses from which `target` may be entered.
    pub fn allowed_sources(&self, target: TrainingStatus) -> &[TrainingStatus] {
        self.sources.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns `true` iff the overall status may move from `from` to `to`.
    pub fn is_allowed(&self, from: TrainingStatus, to: TrainingStatus) -> bool {
        self.allowed_sources(to).contains(&from)
    }

    /// String form of [`is_allowed`](Self::is_allowed); unknown tokens are never allowed.
    pub fn is_allowed_str(&self, from: &str, to: &str) -> bool {
        match (from.parse(), to.parse()) {
            (Ok(from), Ok(to)) => self.is_allowed(from, to),
            _ => false,
        }
    }
}

impl Default for TransitionLattice {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TrainingStatus::*;

    const LISTED: &[(TrainingStatus, TrainingStatus)] = &[
        (Pending, Downloading),
        (NotStarted, Downloading),
        (Processing, Processing),
        (Downloading, Processing),
        (Pending, Processing),
        (Processing, Storing),
        (Downloading, Storing),
        (Pending, Storing),
        (NotStarted, Storing),
        (Storing, Completed),
        (Processing, Completed),
        (Downloading, Completed),
        (Pending, Completed),
        (NotStarted, Completed),
        (Storing, Failed),
        (Processing, Failed),
        (Downloading, Failed),
        (Pending, Failed),
        (NotStarted, Failed),
        (Storing, Halted),
        (Processing, Halted),
        (Downloading, Halted),
        (Pending, Halted),
        (NotStarted, Halted),
    ];

    #[test]
    fn every_pair_matches_the_table() {
        let lattice = TransitionLattice::standard();
        for from in TrainingStatus::ALL {
            for to in TrainingStatus::ALL {
                let expected = LISTED.contains(&(from, to));
                assert_eq!(
                    lattice.is_allowed(from, to),
                    expected,
                    "{from} -> {to} should be {expected}"
                );
                assert_eq!(lattice.is_allowed_str(from.as_str(), to.as_str()), expected);
            }
        }
    }

    #[test]
    fn documented_scenarios() {
        let lattice = TransitionLattice::standard();
        assert!(lattice.is_allowed_str("PENDING", "DOWNLOADING"));
        assert!(!lattice.is_allowed_str("COMPLETED", "PROCESSING"));
        assert!(!lattice.is_allowed_str("FAILED", "COMPLETED"));
    }

    #[test]
    fn nothing_leaves_a_terminal_status() {
        let lattice = TransitionLattice::standard();
        for from in TrainingStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TrainingStatus::ALL {
                assert!(!lattice.is_allowed(from, to));
            }
        }
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let lattice = TransitionLattice::standard();
        assert!(!lattice.is_allowed_str("RUNNING", "PROCESSING"));
        assert!(!lattice.is_allowed_str("PENDING", "deploying"));
        assert!(!lattice.is_allowed_str("", ""));
        assert!(lattice.allowed_sources(NotStarted).is_empty());
        assert!(lattice.allowed_sources(Pending).is_empty());
    }
}

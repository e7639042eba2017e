//! Error-rate gate: the pass/fail verdict for one file

use serde::Serialize;

use crate::config::DEFAULT_ERROR_THRESHOLD;

/// Final counters of one file's run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileRunState {
    /// Records acknowledged by the store (or logged, in dry-run mode)
    pub processed: u64,
    /// Rejected lines plus failed writes
    pub errors: u64,
}

impl FileRunState {
    pub fn merge(&mut self, other: FileRunState) {
        self.processed += other.processed;
        self.errors += other.errors;
    }
}

/// Outcome of one file load
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Error rate under the threshold
    Accepted { rate: f64 },
    /// Error rate at or above the threshold
    Rejected { rate: f64, threshold: f64 },
    /// Nothing reached the store
    Empty,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accepted { rate } => write!(f, "accepted (error rate {rate:.4})"),
            Verdict::Rejected { rate, threshold } => {
                write!(f, "rejected (error rate {rate:.4} >= {threshold})")
            },
            Verdict::Empty => write!(f, "empty (nothing processed)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorRateGate {
    threshold: f64,
}

impl ErrorRateGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// `errors / processed` against the threshold; zero processed is `Empty`
    pub fn evaluate(&self, state: &FileRunState) -> Verdict {
        if state.processed == 0 {
            return Verdict::Empty;
        }

        let rate = state.errors as f64 / state.processed as f64;
        if rate < self.threshold {
            Verdict::Accepted { rate }
        } else {
            Verdict::Rejected {
                rate,
                threshold: self.threshold,
            }
        }
    }
}

impl Default for ErrorRateGate {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(processed: u64, errors: u64) -> FileRunState {
        FileRunState { processed, errors }
    }

    #[test]
    fn test_clean_run_is_accepted() {
        assert_eq!(
            ErrorRateGate::default().evaluate(&state(100, 0)),
            Verdict::Accepted { rate: 0.0 }
        );
    }

    #[test]
    fn test_two_percent_is_rejected() {
        let verdict = ErrorRateGate::default().evaluate(&state(100, 2));
        assert_eq!(
            verdict,
            Verdict::Rejected {
                rate: 0.02,
                threshold: 0.01
            }
        );
        assert!(!verdict.is_success());
    }

    #[test]
    fn test_rate_equal_to_threshold_is_rejected() {
        let verdict = ErrorRateGate::default().evaluate(&state(100, 1));
        assert!(matches!(verdict, Verdict::Rejected { .. }));
    }

    #[test]
    fn test_nothing_processed_is_empty_not_a_fault() {
        let gate = ErrorRateGate::default();
        assert_eq!(gate.evaluate(&state(0, 0)), Verdict::Empty);
        assert_eq!(gate.evaluate(&state(0, 17)), Verdict::Empty);
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut total = state(3, 1);
        total.merge(state(4, 2));
        assert_eq!(total, state(7, 3));
    }
}

//! Candidate selection for multi-model aggregation.
//!
//! Each candidate's report is reduced to a score key; the lowest key wins,
//! and ties go to the earlier candidate. Candidates that produced no
//! report (provider failure, empty text) are not eligible.

use serde::{Deserialize, Serialize};

use crate::types::ValidationReport;

/// Ordering key for one candidate, compared field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateScore {
    pub risk_weight: u8,
    pub critical_failures: usize,
    pub failures: usize,
    pub warnings: usize,
    pub semantic_hits: usize,
}

impl CandidateScore {
    pub fn from_report(report: &ValidationReport) -> Self {
        Self {
            risk_weight: report.overall_risk.weight(),
            critical_failures: report.critical_failure_count(),
            failures: report.failure_count(),
            warnings: report.warning_count(),
            semantic_hits: report.semantic_hit_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub index: usize,
    /// No candidate was viable and the first was chosen by default.
    pub fallback: bool,
}

/// Pick the best candidate. `None` entries are not viable.
///
/// Returns `None` only for an empty candidate list.
pub fn select(scores: &[Option<CandidateScore>]) -> Option<Selection> {
    if scores.is_empty() {
        return None;
    }
    let best = scores
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|s| (s, i)))
        .min();
    Some(match best {
        Some((_, index)) => Selection { index, fallback: false },
        None => Selection { index: 0, fallback: true },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn score(
        risk: u8,
        critical: usize,
        failures: usize,
        warnings: usize,
        hits: usize,
    ) -> CandidateScore {
        CandidateScore {
            risk_weight: risk,
            critical_failures: critical,
            failures,
            warnings,
            semantic_hits: hits,
        }
    }

    #[test]
    fn test_lowest_risk_wins() {
        let scores = [Some(score(4, 1, 1, 0, 0)), Some(score(1, 0, 0, 2, 0))];
        assert_eq!(select(&scores), Some(Selection { index: 1, fallback: false }));
    }

    #[test]
    fn test_tie_goes_to_first() {
        let s = score(2, 0, 1, 1, 0);
        assert_eq!(select(&[Some(s), Some(s)]).unwrap().index, 0);
    }

    #[test]
    fn test_semantic_hits_break_late_ties() {
        let scores = [Some(score(0, 0, 0, 0, 2)), Some(score(0, 0, 0, 0, 1))];
        assert_eq!(select(&scores).unwrap().index, 1);
    }

    #[test]
    fn test_non_viable_skipped() {
        let scores = [None, Some(score(3, 0, 2, 0, 0))];
        assert_eq!(select(&scores), Some(Selection { index: 1, fallback: false }));
    }

    #[test]
    fn test_all_non_viable_falls_back() {
        assert_eq!(select(&[None, None]), Some(Selection { index: 0, fallback: true }));
        assert_eq!(select(&[]), None);
    }

    proptest! {
        #[test]
        fn prop_selected_is_minimal(raw in prop::collection::vec(
            prop::option::of((0u8..5, 0usize..3, 0usize..4, 0usize..4, 0usize..3)), 1..8)
        ) {
            let scores: Vec<_> = raw
                .iter()
                .map(|o| o.map(|(r, c, f, w, h)| score(r, c, f, w, h)))
                .collect();
            let chosen = select(&scores).unwrap();
            if let Some(winner) = scores[chosen.index] {
                prop_assert!(!chosen.fallback);
                for (i, s) in scores.iter().enumerate() {
                    if let Some(s) = s {
                        prop_assert!(winner <= *s);
                        if *s == winner {
                            prop_assert!(chosen.index <= i);
                        }
                    }
                }
            } else {
                prop_assert!(chosen.fallback);
                prop_assert!(scores.iter().all(Option::is_none));
            }
        }
    }
}

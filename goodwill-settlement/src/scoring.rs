//! Work item scoring
//!
//! `score = floor(min(100, (chars(description) / 5) * multiplier * health * damping))`
//!
//! `health` is drawn uniformly from the configured range for every item;
//! `damping` is fixed. Action types outside the table score with 1.0.

use crate::config::ScoringConfig;
use goodwill_ledger::WorkItem;
use rand::Rng;

/// Highest possible score
pub const MAX_SCORE: u32 = 100;

/// Failure reason for items with nothing to score
pub const REASON_EMPTY_DESCRIPTION: &str = "empty_description";

/// Multiplier for an action type
pub fn multiplier(action_type: &str) -> f64 {
    match action_type {
        "strategic_planning" => 1.3,
        "environmental_cleanup" => 1.25,
        "community_service" => 1.2,
        "mentorship" => 1.15,
        "donation" => 1.1,
        "volunteering" => 1.0,
        _ => 1.0,
    }
}

/// Scoring result for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Score in [0, 100]
    Verified(u32),
    /// Item cannot be scored; carries the failure reason
    Rejected(&'static str),
}

/// Scores claimed work items
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    /// Create a scorer
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score with a freshly drawn health factor
    pub fn evaluate(&self, item: &WorkItem) -> Verdict {
        self.evaluate_with_health(item, self.draw_health())
    }

    /// Score with an explicit health factor
    pub fn evaluate_with_health(&self, item: &WorkItem, health: f64) -> Verdict {
        let length = item.description.trim().chars().count();
        if length == 0 {
            return Verdict::Rejected(REASON_EMPTY_DESCRIPTION);
        }

        let raw = (item.description.chars().count() as f64 / 5.0)
            * multiplier(&item.action_type)
            * health
            * self.config.damping;

        Verdict::Verified(raw.clamp(0.0, MAX_SCORE as f64).floor() as u32)
    }

    fn draw_health(&self) -> f64 {
        let (min, max) = (self.config.health_min, self.config.health_max);
        if min >= max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goodwill_ledger::AccountId;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn item(action_type: &str, description: &str) -> WorkItem {
        WorkItem::new(AccountId::new("alice"), action_type, description, BTreeMap::new())
    }

    #[test]
    fn test_strategic_planning_scenario() {
        let scorer = Scorer::new(ScoringConfig::neutral());
        let description = "x".repeat(65);
        assert_eq!(
            scorer.evaluate(&item("strategic_planning", &description)),
            Verdict::Verified(16)
        );
    }

    #[test]
    fn test_unknown_type_uses_unit_multiplier() {
        let scorer = Scorer::new(ScoringConfig::neutral());
        assert_eq!(
            scorer.evaluate(&item("juggling", &"y".repeat(50))),
            Verdict::Verified(10)
        );
    }

    #[test]
    fn test_long_description_clips_to_max() {
        let scorer = Scorer::new(ScoringConfig::neutral());
        assert_eq!(
            scorer.evaluate(&item("environmental_cleanup", &"z".repeat(5_000))),
            Verdict::Verified(MAX_SCORE)
        );
    }

    #[test]
    fn test_empty_description_rejected() {
        let scorer = Scorer::new(ScoringConfig::default());
        assert_eq!(
            scorer.evaluate(&item("donation", "   ")),
            Verdict::Rejected(REASON_EMPTY_DESCRIPTION)
        );
    }

    #[test]
    fn test_damping_applies() {
        let scorer = Scorer::new(ScoringConfig {
            health_min: 1.0,
            health_max: 1.0,
            damping: 0.5,
        });
        assert_eq!(
            scorer.evaluate(&item("volunteering", &"a".repeat(100))),
            Verdict::Verified(10)
        );
    }

    proptest! {
        #[test]
        fn prop_score_bounded(
            description in "[a-z ]{1,800}",
            action in prop_oneof![
                Just("strategic_planning"),
                Just("community_service"),
                Just("mentorship"),
                Just("environmental_cleanup"),
                Just("donation"),
                Just("volunteering"),
                Just("other"),
            ],
        ) {
            let scorer = Scorer::new(ScoringConfig::default());
            match scorer.evaluate(&item(action, &description)) {
                Verdict::Verified(score) => prop_assert!(score <= MAX_SCORE),
                Verdict::Rejected(reason) => {
                    prop_assert_eq!(reason, REASON_EMPTY_DESCRIPTION);
                    prop_assert!(description.trim().is_empty());
                }
            }
        }

        #[test]
        fn prop_longer_description_never_scores_lower(len in 1usize..600, extra in 0usize..100) {
            let scorer = Scorer::new(ScoringConfig::neutral());
            let short = scorer.evaluate(&item("mentorship", &"m".repeat(len)));
            let long = scorer.evaluate(&item("mentorship", &"m".repeat(len + extra)));
            match (short, long) {
                (Verdict::Verified(a), Verdict::Verified(b)) => prop_assert!(a <= b),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}

//! Quorum rule for node and journal status.
//!
//! Each orchestrator keeps its own id in a target's `orchestrator_errors`
//! while it cannot reach the target and removes it once it can. The target is
//! DOWN while at least `quorum` distinct orchestrators are listed and may be
//! UP once fewer are.

/// What one orchestrator concluded about a target this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Healthy,
    Unhealthy,
}

/// Status the reporter list calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumRule {
    quorum: usize,
}

impl QuorumRule {
    /// A quorum of 0 is treated as 1.
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum: quorum.max(1),
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Add or remove `orchestrator_id` in `reporters`. Returns whether the list changed.
    pub fn record(
        &self,
        reporters: &mut Vec<String>,
        orchestrator_id: &str,
        observation: Observation,
    ) -> bool {
        let present = reporters.iter().any(|r| r == orchestrator_id);
        match (observation, present) {
            (Observation::Unhealthy, false) => {
                reporters.push(orchestrator_id.to_string());
                true
            }
            (Observation::Healthy, true) => {
                reporters.retain(|r| r != orchestrator_id);
                true
            }
            _ => false,
        }
    }

    pub fn verdict(&self, reporters: &[String]) -> Verdict {
        let mut distinct: Vec<&String> = reporters.iter().collect();
        distinct.sort();
        distinct.dedup();
        if distinct.len() >= self.quorum {
            Verdict::Down
        } else {
            Verdict::Up
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_idempotent() {
        let rule = QuorumRule::new(2);
        let mut reporters = Vec::new();
        assert!(rule.record(&mut reporters, "o1", Observation::Unhealthy));
        assert!(!rule.record(&mut reporters, "o1", Observation::Unhealthy));
        assert_eq!(reporters, vec!["o1"]);
        assert!(rule.record(&mut reporters, "o1", Observation::Healthy));
        assert!(!rule.record(&mut reporters, "o1", Observation::Healthy));
        assert!(reporters.is_empty());
    }

    #[test]
    fn test_verdict_thresholds() {
        let rule = QuorumRule::new(3);
        let mut reporters = Vec::new();
        for id in ["o1", "o2"] {
            rule.record(&mut reporters, id, Observation::Unhealthy);
            assert_eq!(rule.verdict(&reporters), Verdict::Up);
        }
        rule.record(&mut reporters, "o3", Observation::Unhealthy);
        assert_eq!(rule.verdict(&reporters), Verdict::Down);
        rule.record(&mut reporters, "o2", Observation::Healthy);
        assert_eq!(rule.verdict(&reporters), Verdict::Up);
    }

    #[test]
    fn test_duplicates_count_once() {
        let rule = QuorumRule::new(2);
        let reporters = vec!["o1".to_string(), "o1".to_string()];
        assert_eq!(rule.verdict(&reporters), Verdict::Up);
        assert_eq!(QuorumRule::new(0).quorum(), 1);
    }
}

//! Credit cost estimation.
//!
//! The orchestrator does not prescribe a pricing formula. This table is the
//! default used to size a reservation: credits per started second of output,
//! per quality profile.

use std::collections::HashMap;

use crate::{Prompt, QualityProfile};

/// Detailed breakdown of an estimate.
#[derive(Debug, Clone, Default)]
pub struct CostBreakdown {
    /// Per-profile totals
    pub profile_costs: HashMap<QualityProfile, u64>,
    /// Number of prompts estimated
    pub prompt_count: usize,
    /// Grand total
    pub total: u64,
}

impl CostBreakdown {
    /// Human-readable description for credit history.
    pub fn to_description(&self) -> String {
        let noun = if self.prompt_count == 1 { "clip" } else { "clips" };
        format!("Generate {} {}", self.prompt_count, noun)
    }
}

/// Credits per second of output for each profile.
#[derive(Debug, Clone)]
pub struct CreditCostTable {
    per_second: HashMap<QualityProfile, u64>,
}

impl Default for CreditCostTable {
    fn default() -> Self {
        let mut per_second = HashMap::new();
        per_second.insert(QualityProfile::Draft, 1);
        per_second.insert(QualityProfile::Standard, 2);
        per_second.insert(QualityProfile::Premium, 5);
        Self { per_second }
    }
}

impl CreditCostTable {
    /// Override the rate for a profile.
    pub fn with_rate(mut self, profile: QualityProfile, credits_per_second: u64) -> Self {
        self.per_second.insert(profile, credits_per_second);
        self
    }

    pub fn rate(&self, profile: QualityProfile) -> u64 {
        self.per_second.get(&profile).copied().unwrap_or(0)
    }

    /// Estimate a single prompt. Zero-length prompts are billed as one second.
    pub fn prompt_cost(&self, prompt: &Prompt) -> u64 {
        self.rate(prompt.profile) * u64::from(prompt.duration_secs.max(1))
    }

    /// Estimate a batch.
    pub fn estimate(&self, prompts: &[Prompt]) -> CostBreakdown {
        let mut breakdown = CostBreakdown {
            prompt_count: prompts.len(),
            ..Default::default()
        };
        for prompt in prompts {
            let cost = self.prompt_cost(prompt);
            *breakdown.profile_costs.entry(prompt.profile).or_insert(0) += cost;
            breakdown.total += cost;
        }
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_batch() {
        let table = CreditCostTable::default();
        let prompts = vec![
            Prompt::new("a").with_duration(5),
            Prompt::new("b").with_profile(QualityProfile::Premium).with_duration(4),
            Prompt::new("c").with_profile(QualityProfile::Draft).with_duration(0),
        ];

        let breakdown = table.estimate(&prompts);
        assert_eq!(breakdown.total, 10 + 20 + 1);
        assert_eq!(breakdown.profile_costs[&QualityProfile::Premium], 20);
        assert_eq!(breakdown.to_description(), "Generate 3 clips");
    }

    #[test]
    fn test_rate_override() {
        let table = CreditCostTable::default().with_rate(QualityProfile::Standard, 10);
        assert_eq!(table.prompt_cost(&Prompt::new("x").with_duration(5)), 50);
    }
}

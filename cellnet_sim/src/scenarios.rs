//! Scenario catalogue for the simulator.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Scripted walk through every call outcome on the two-antenna town
    ReferenceTour,

    /// One successful call and its hang-up
    BasicCall,

    /// Caller cannot pay for the call
    InsufficientCredit,

    /// Receiver's battery is below the threshold
    LowBattery,

    /// In-call phone walks out of all coverage
    CoverageLoss,

    /// Only reachable antenna is full
    CapacityExhaustion,

    /// Antenna placed apart from the network is refused
    IsolatedAntenna,

    /// Long random walk with random calls and hang-ups
    RandomWalk,

    /// Many concurrent tasks hammering a shared exchange
    RushHour,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ReferenceTour,
            ScenarioId::BasicCall,
            ScenarioId::InsufficientCredit,
            ScenarioId::LowBattery,
            ScenarioId::CoverageLoss,
            ScenarioId::CapacityExhaustion,
            ScenarioId::IsolatedAntenna,
            ScenarioId::RandomWalk,
            ScenarioId::RushHour,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ReferenceTour => "reference_tour",
            ScenarioId::BasicCall => "basic_call",
            ScenarioId::InsufficientCredit => "insufficient_credit",
            ScenarioId::LowBattery => "low_battery",
            ScenarioId::CoverageLoss => "coverage_loss",
            ScenarioId::CapacityExhaustion => "capacity_exhaustion",
            ScenarioId::IsolatedAntenna => "isolated_antenna",
            ScenarioId::RandomWalk => "random_walk",
            ScenarioId::RushHour => "rush_hour",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ReferenceTour => "Scripted tour of every call outcome on the reference town",
            ScenarioId::BasicCall => "Call succeeds, caller pays, both slots claimed then released",
            ScenarioId::InsufficientCredit => "Caller with credit 3 is refused and nothing changes",
            ScenarioId::LowBattery => "Receiver at battery 3 is refused and the caller is untouched",
            ScenarioId::CoverageLoss => "Moving out of coverage tears the call down on both antennas",
            ScenarioId::CapacityExhaustion => "Full antenna leaves the caller without network",
            ScenarioId::IsolatedAntenna => "Non-adjacent antenna is refused by the network",
            ScenarioId::RandomWalk => "Seeded random walk with random calls, audited every step",
            ScenarioId::RushHour => "Concurrent call storm on a shared exchange",
        }
    }

    /// True for scenarios whose outcome depends on thread scheduling.
    pub fn is_concurrent(&self) -> bool {
        matches!(self, ScenarioId::RushHour)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == normalized)
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert_eq!(id.to_string(), id.name());
        }
    }

    #[test]
    fn test_parse_accepts_dashes_and_case() {
        assert_eq!("Rush-Hour".parse::<ScenarioId>(), Ok(ScenarioId::RushHour));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&ScenarioId::CoverageLoss).unwrap();
        assert_eq!(json, "\"coverage_loss\"");
    }
}

//! Invariant oracle: the harness's view of what must always hold.
//!
//! The oracle runs the whole-network audit after every step and checks
//! that a rejected call left no trace on either participant or on any
//! antenna. It records violations instead of panicking so a run can report
//! all of them.

use cellnet_core::{
    AntennaSnapshot, CallRejection, DeviceId, DeviceSnapshot, Exchange, InvariantViolation,
    Switchboard,
};
use tracing::error;

/// State of the call participants and every antenna at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    devices: Vec<DeviceSnapshot>,
    antennas: Vec<AntennaSnapshot>,
}

impl Observation {
    /// Captures `ids` (unknown ids are skipped) and all antenna loads.
    pub fn capture(switchboard: &Switchboard, ids: &[DeviceId]) -> Self {
        Self {
            devices: ids
                .iter()
                .filter_map(|id| switchboard.device(*id))
                .map(|d| d.snapshot())
                .collect(),
            antennas: switchboard.network().snapshot(),
        }
    }
}

/// Collects invariant checks over a run.
#[derive(Debug, Default)]
pub struct InvariantOracle {
    checks: u64,
    violations: Vec<String>,
}

impl InvariantOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audits capacity and call symmetry on a switchboard.
    pub fn audit_switchboard(&mut self, tick: u64, switchboard: &Switchboard) -> bool {
        self.record(tick, switchboard.audit())
    }

    /// Audits capacity and call symmetry on a shared exchange.
    pub fn audit_exchange(&mut self, tick: u64, exchange: &Exchange) -> bool {
        self.record(tick, exchange.audit())
    }

    /// Checks that a rejected call changed nothing.
    pub fn check_rejection(
        &mut self,
        tick: u64,
        rejection: &CallRejection,
        before: &Observation,
        after: &Observation,
    ) -> bool {
        self.checks += 1;
        if before == after {
            return true;
        }
        self.violate(format!(
            "tick {}: rejected call ({}) mutated state",
            tick,
            rejection.code()
        ));
        false
    }

    /// Records an arbitrary expectation.
    pub fn check(&mut self, condition: bool, what: impl FnOnce() -> String) -> bool {
        self.checks += 1;
        if !condition {
            self.violate(what());
        }
        condition
    }

    pub fn checks(&self) -> u64 {
        self.checks
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// The first violation, if any.
    pub fn first_violation(&self) -> Option<&str> {
        self.violations.first().map(String::as_str)
    }

    fn record(&mut self, tick: u64, result: Result<(), InvariantViolation>) -> bool {
        self.checks += 1;
        match result {
            Ok(()) => true,
            Err(v) => {
                self.violate(format!("tick {}: {}", tick, v));
                false
            }
        }
    }

    fn violate(&mut self, message: String) {
        error!("Invariant violated: {}", message);
        self.violations.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::NetworkPlan;

    #[test]
    fn test_clean_run_has_no_violations() {
        let built = NetworkPlan::reference().build();
        let mut oracle = InvariantOracle::new();

        assert!(oracle.audit_switchboard(0, &built.switchboard));
        assert!(oracle.is_clean());
        assert_eq!(oracle.checks(), 1);
    }

    #[test]
    fn test_rejected_call_leaves_observation_unchanged() {
        let mut sb = NetworkPlan::reference().build();
        let (p4, p1) = (sb.devices[3], sb.devices[0]);
        let mut oracle = InvariantOracle::new();

        let before = Observation::capture(&sb.switchboard, &[p4, p1]);
        let err = sb.switchboard.call(p4, p1).unwrap_err();
        let after = Observation::capture(&sb.switchboard, &[p4, p1]);

        let rejection = err.rejection().unwrap();
        assert_eq!(rejection.code(), "insufficient-credit");
        assert!(oracle.check_rejection(1, rejection, &before, &after));
    }

    #[test]
    fn test_mutation_is_reported() {
        let mut sb = NetworkPlan::reference().build();
        let (p1, p2) = (sb.devices[0], sb.devices[1]);
        let mut oracle = InvariantOracle::new();

        let before = Observation::capture(&sb.switchboard, &[p1, p2]);
        sb.switchboard.call(p1, p2).unwrap();
        let after = Observation::capture(&sb.switchboard, &[p1, p2]);

        assert!(!oracle.check_rejection(3, &CallRejection::NoNetwork, &before, &after));
        assert_eq!(oracle.violations().len(), 1);
        assert!(oracle.first_violation().unwrap().contains("tick 3"));
    }

    #[test]
    fn test_check_records_failures() {
        let mut oracle = InvariantOracle::new();
        assert!(oracle.check(true, || "unused".into()));
        assert!(!oracle.check(false, || "credit should be 6".into()));
        assert_eq!(oracle.checks(), 2);
        assert_eq!(oracle.first_violation(), Some("credit should be 6"));
    }
}

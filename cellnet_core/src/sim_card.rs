//! Subscriber identity: number, credit and activation state.

use crate::error::SimError;
use crate::types::{DeviceId, SubscriberNumber};
use serde::{Deserialize, Serialize};

/// A SIM card. Credit never drops below zero and the owner is set once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimCard {
    number: SubscriberNumber,
    credit: f64,
    active: bool,
    owner: Option<DeviceId>,
}

impl SimCard {
    /// Creates an active, unassigned SIM. Negative or NaN credit becomes zero.
    pub fn new(credit: f64, number: impl Into<SubscriberNumber>) -> Self {
        Self {
            number: number.into(),
            credit: if credit > 0.0 { credit } else { 0.0 },
            active: true,
            owner: None,
        }
    }

    /// Binds the SIM to `device` unless it already has an owner.
    pub fn assign_to_phone(&mut self, device: DeviceId) -> Result<(), SimError> {
        match self.owner {
            None => {
                self.owner = Some(device);
                Ok(())
            }
            Some(owner) => Err(SimError::AlreadyAssigned {
                number: self.number.clone(),
                owner,
            }),
        }
    }

    pub fn owner(&self) -> Option<DeviceId> {
        self.owner
    }

    pub fn number(&self) -> &SubscriberNumber {
        &self.number
    }

    pub fn credit(&self) -> f64 {
        self.credit
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn has_enough_credit(&self, amount: f64) -> bool {
        self.credit >= amount
    }

    /// Debits `amount` if the balance covers it. Returns whether it was debited.
    pub fn deduct_credit(&mut self, amount: f64) -> bool {
        if amount >= 0.0 && self.has_enough_credit(amount) {
            self.credit -= amount;
            true
        } else {
            false
        }
    }

    /// Tops up the balance. Non-positive amounts are ignored.
    pub fn add_credit(&mut self, amount: f64) {
        if amount > 0.0 {
            self.credit += amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_clamps_negative_credit() {
        let sim = SimCard::new(-3.0, "0555000011");
        assert_eq!(sim.credit(), 0.0);
        assert!(sim.is_active());
        assert!(sim.owner().is_none());

        assert_eq!(SimCard::new(f64::NAN, "x").credit(), 0.0);
    }

    #[test]
    fn test_assign_once() {
        let mut sim = SimCard::new(10.0, "0555000011");
        let first = DeviceId::from_seed(1);
        let second = DeviceId::from_seed(2);

        assert!(sim.assign_to_phone(first).is_ok());
        let err = sim.assign_to_phone(second).unwrap_err();
        assert!(matches!(err, SimError::AlreadyAssigned { owner, .. } if owner == first));

        // Not overwritten
        assert_eq!(sim.owner(), Some(first));
    }

    #[test]
    fn test_deduct_requires_enough_credit() {
        let mut sim = SimCard::new(5.0, "0555000022");
        assert!(sim.deduct_credit(4.0));
        assert_relative_eq!(sim.credit(), 1.0);

        assert!(!sim.deduct_credit(4.0));
        assert_relative_eq!(sim.credit(), 1.0);

        // Negative debit would be a top-up in disguise
        assert!(!sim.deduct_credit(-10.0));
        assert_relative_eq!(sim.credit(), 1.0);
    }

    #[test]
    fn test_add_credit_ignores_non_positive() {
        let mut sim = SimCard::new(3.0, "0555000044");
        sim.add_credit(0.0);
        sim.add_credit(-2.0);
        assert_relative_eq!(sim.credit(), 3.0);

        sim.add_credit(10.0);
        assert_relative_eq!(sim.credit(), 13.0);
        assert!(sim.has_enough_credit(13.0));
        assert!(!sim.has_enough_credit(13.5));
    }
}

//! Mobile devices: position, battery, SIM and call state.
//!
//! A device only answers questions about itself. Transitions that touch
//! two devices live in [`crate::call`].

use crate::error::{CallRejection, Party};
use crate::network::Network;
use crate::policy::CallPolicy;
use crate::sim_card::SimCard;
use crate::types::{AntennaId, DeviceId, Position};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Call state of a device.
///
/// `InCall` always names the partner, so "in a call" and "has a partner"
/// cannot disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    #[default]
    Idle,
    InCall { partner: DeviceId },
}

/// A mobile endpoint bound to exactly one SIM card.
#[derive(Debug, Clone)]
pub struct Device {
    id: DeviceId,
    pub(crate) position: Position,
    battery: f64,
    sim: SimCard,
    pub(crate) state: CallState,
    pub(crate) connected_antenna: Option<AntennaId>,
}

/// Point-in-time view of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub number: String,
    pub x: f64,
    pub y: f64,
    pub battery: f64,
    pub credit: f64,
    pub sim_active: bool,
    pub connected_antenna: Option<AntennaId>,
    pub partner: Option<DeviceId>,
}

impl Device {
    /// Creates a device at `position` and resolves its serving antenna.
    ///
    /// The SIM is bound to the new device. A SIM that already has an owner
    /// keeps it; the rejection is logged and the device is still built.
    pub fn new(network: &Network, id: DeviceId, position: Position, mut sim: SimCard, battery: f64) -> Self {
        if let Err(e) = sim.assign_to_phone(id) {
            warn!("{}", e);
        }

        Self {
            id,
            position,
            battery,
            sim,
            state: CallState::Idle,
            connected_antenna: network.find_nearest_antenna(&position),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn battery(&self) -> f64 {
        self.battery
    }

    /// Sets the battery level. The call model never drains it on its own.
    pub fn set_battery(&mut self, level: f64) {
        self.battery = level;
    }

    pub fn sim(&self) -> &SimCard {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut SimCard {
        &mut self.sim
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_in_call(&self) -> bool {
        matches!(self.state, CallState::InCall { .. })
    }

    pub fn call_partner(&self) -> Option<DeviceId> {
        match self.state {
            CallState::InCall { partner } => Some(partner),
            CallState::Idle => None,
        }
    }

    /// The antenna currently serving this device, as of the last lookup.
    pub fn connected_antenna(&self) -> Option<AntennaId> {
        self.connected_antenna
    }

    /// Checks whether this device may place a call.
    ///
    /// Exactly one reason is reported, in this order: already in a call,
    /// battery too low, SIM inactive, not enough credit.
    pub fn can_make_call(&self, policy: &CallPolicy) -> Result<(), CallRejection> {
        if self.is_in_call() {
            return Err(CallRejection::AlreadyInCall { party: Party::Caller });
        }
        if !self.has_battery_for(policy) {
            return Err(CallRejection::BatteryTooLow { party: Party::Caller, level: self.battery });
        }
        if !self.sim.is_active() {
            return Err(CallRejection::SimInactive);
        }
        if !self.sim.has_enough_credit(policy.call_cost) {
            return Err(CallRejection::InsufficientCredit {
                credit: self.sim.credit(),
                required: policy.call_cost,
            });
        }
        Ok(())
    }

    /// Checks whether this device may answer a call. The receiver pays nothing,
    /// so neither credit nor SIM state is checked.
    pub fn can_receive_call(&self, policy: &CallPolicy) -> Result<(), CallRejection> {
        if self.is_in_call() {
            return Err(CallRejection::AlreadyInCall { party: Party::Receiver });
        }
        if !self.has_battery_for(policy) {
            return Err(CallRejection::BatteryTooLow { party: Party::Receiver, level: self.battery });
        }
        Ok(())
    }

    /// A NaN level never clears the threshold.
    fn has_battery_for(&self, policy: &CallPolicy) -> bool {
        self.battery >= policy.min_battery
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id,
            number: self.sim.number().to_string(),
            x: self.position.x,
            y: self.position.y,
            battery: self.battery,
            credit: self.sim.credit(),
            sim_active: self.sim.is_active(),
            connected_antenna: self.connected_antenna,
            partner: self.call_partner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Network {
        let mut network = Network::new();
        network.add_antenna(0.0, 0.0, 10.0, 8).unwrap();
        network
    }

    fn device(network: &Network, credit: f64, battery: f64) -> Device {
        Device::new(
            network,
            DeviceId::from_seed(1),
            Position::new(1.0, 1.0),
            SimCard::new(credit, "0555000011"),
            battery,
        )
    }

    #[test]
    fn test_new_device_binds_sim_and_resolves_antenna() {
        let network = network();
        let d = device(&network, 10.0, 63.0);

        assert_eq!(d.sim().owner(), Some(d.id()));
        assert_eq!(d.connected_antenna(), Some(AntennaId(0)));
        assert_eq!(d.state(), CallState::Idle);
        assert!(d.call_partner().is_none());
    }

    #[test]
    fn test_new_device_keeps_existing_sim_owner() {
        let network = network();
        let mut sim = SimCard::new(10.0, "0555000011");
        let first = DeviceId::from_seed(99);
        sim.assign_to_phone(first).unwrap();

        let d = Device::new(&network, DeviceId::from_seed(1), Position::new(0.0, 0.0), sim, 50.0);
        assert_eq!(d.sim().owner(), Some(first));
    }

    #[test]
    fn test_new_device_out_of_coverage() {
        let network = network();
        let d = Device::new(
            &network,
            DeviceId::from_seed(1),
            Position::new(50.0, 50.0),
            SimCard::new(10.0, "1"),
            50.0,
        );
        assert!(d.connected_antenna().is_none());
    }

    #[test]
    fn test_can_make_call_priority_order() {
        let network = network();
        let policy = CallPolicy::default();

        // Low battery, inactive SIM and no credit at once: battery wins
        let mut d = device(&network, 0.0, 1.0);
        d.sim_mut().set_active(false);
        assert_eq!(d.can_make_call(&policy).unwrap_err().code(), "battery-too-low");

        d.set_battery(50.0);
        assert_eq!(d.can_make_call(&policy).unwrap_err().code(), "sim-inactive");

        d.sim_mut().set_active(true);
        assert_eq!(d.can_make_call(&policy).unwrap_err().code(), "insufficient-credit");

        d.sim_mut().add_credit(4.0);
        assert!(d.can_make_call(&policy).is_ok());

        d.state = CallState::InCall { partner: DeviceId::from_seed(2) };
        assert_eq!(d.can_make_call(&policy).unwrap_err().code(), "already-in-call");
    }

    #[test]
    fn test_battery_threshold_is_inclusive() {
        let network = network();
        let policy = CallPolicy::default();
        let d = device(&network, 10.0, 5.0);
        assert!(d.can_make_call(&policy).is_ok());
        assert!(d.can_receive_call(&policy).is_ok());

        let d = device(&network, 10.0, 4.99);
        assert!(d.can_receive_call(&policy).is_err());
    }

    #[test]
    fn test_nan_battery_counts_as_too_low() {
        let network = network();
        let policy = CallPolicy::default();
        let mut d = device(&network, 10.0, 80.0);
        d.set_battery(f64::NAN);

        assert_eq!(d.can_make_call(&policy).unwrap_err().code(), "battery-too-low");
        assert_eq!(d.can_receive_call(&policy).unwrap_err().code(), "battery-too-low");
    }

    #[test]
    fn test_receiver_needs_no_credit_or_active_sim() {
        let network = network();
        let policy = CallPolicy::default();
        let mut d = device(&network, 0.0, 98.0);
        d.sim_mut().set_active(false);
        assert!(d.can_receive_call(&policy).is_ok());

        d.set_battery(3.0);
        let err = d.can_receive_call(&policy).unwrap_err();
        assert_eq!(err, CallRejection::BatteryTooLow { party: Party::Receiver, level: 3.0 });
    }
}

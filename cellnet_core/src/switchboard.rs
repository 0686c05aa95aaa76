//! Single-threaded device registry.
//!
//! The switchboard owns the network and every device, and is the source of
//! truth for resolving a call partner id to a device. Each operation looks
//! up the participants and hands them to the transition functions in
//! [`crate::call`].

use crate::call::{self, CallSetup, CallTeardown, MoveOutcome};
use crate::device::{Device, DeviceSnapshot};
use crate::error::{CallRejection, SwitchboardError};
use crate::invariants::{audit, InvariantViolation};
use crate::network::Network;
use crate::policy::CallPolicy;
use crate::sim_card::SimCard;
use crate::types::{DeviceId, Position};
use std::collections::BTreeMap;

/// Registry of devices on one network.
#[derive(Debug)]
pub struct Switchboard {
    network: Network,
    policy: CallPolicy,
    devices: BTreeMap<DeviceId, Device>,
    next_seed: u64,
}

impl Switchboard {
    /// Creates a switchboard over `network`.
    pub fn new(network: Network, policy: CallPolicy) -> Self {
        Self {
            network,
            policy,
            devices: BTreeMap::new(),
            next_seed: 1,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Registers a device under the next deterministic id.
    pub fn register(&mut self, position: Position, sim: SimCard, battery: f64) -> DeviceId {
        let id = loop {
            let id = DeviceId::from_seed(self.next_seed);
            self.next_seed += 1;
            if !self.devices.contains_key(&id) {
                break id;
            }
        };
        let device = Device::new(&self.network, id, position, sim, battery);
        self.devices.insert(id, device);
        id
    }

    /// Registers a device under a caller-chosen id.
    pub fn register_with_id(
        &mut self,
        id: DeviceId,
        position: Position,
        sim: SimCard,
        battery: f64,
    ) -> Result<DeviceId, SwitchboardError> {
        if self.devices.contains_key(&id) {
            return Err(SwitchboardError::DuplicateDevice(id));
        }
        let device = Device::new(&self.network, id, position, sim, battery);
        self.devices.insert(id, device);
        Ok(id)
    }

    /// Removes a device, hanging up its call first.
    pub fn remove(&mut self, id: DeviceId) -> Result<Device, SwitchboardError> {
        self.end_call(id)?;
        self.take(id)
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    /// Iterates devices in id order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Mutable access to a device's SIM, for top-ups and (de)activation.
    pub fn sim_mut(&mut self, id: DeviceId) -> Result<&mut SimCard, SwitchboardError> {
        self.devices
            .get_mut(&id)
            .map(Device::sim_mut)
            .ok_or(SwitchboardError::UnknownDevice(id))
    }

    pub fn set_battery(&mut self, id: DeviceId, level: f64) -> Result<(), SwitchboardError> {
        let device = self.devices.get_mut(&id).ok_or(SwitchboardError::UnknownDevice(id))?;
        device.set_battery(level);
        Ok(())
    }

    /// Places a call from `caller` to `receiver`.
    pub fn call(&mut self, caller: DeviceId, receiver: DeviceId) -> Result<CallSetup, SwitchboardError> {
        for id in [caller, receiver] {
            if !self.devices.contains_key(&id) {
                return Err(SwitchboardError::UnknownDevice(id));
            }
        }
        if caller == receiver {
            return Err(CallRejection::SelfCall.into());
        }

        let mut a = self.take(caller)?;
        let mut b = self.take(receiver)?;
        let result = call::place_call(&self.network, &self.policy, &mut a, &mut b);
        self.put(a);
        self.put(b);

        Ok(result?)
    }

    /// Hangs up the call `id` is in. `Ok(None)` if it was idle.
    pub fn end_call(&mut self, id: DeviceId) -> Result<Option<CallTeardown>, SwitchboardError> {
        let mut device = self.take(id)?;
        let mut partner = device.call_partner().and_then(|p| self.devices.remove(&p));

        let teardown = call::end_call(&self.network, &mut device, partner.as_mut());

        self.put(device);
        if let Some(partner) = partner {
            self.put(partner);
        }
        Ok(teardown)
    }

    /// Moves `id` to `(x, y)`.
    pub fn move_device(&mut self, id: DeviceId, x: f64, y: f64) -> Result<MoveOutcome, SwitchboardError> {
        let mut device = self.take(id)?;
        let mut partner = device.call_partner().and_then(|p| self.devices.remove(&p));

        let outcome = call::move_device(
            &self.network,
            &self.policy,
            &mut device,
            partner.as_mut(),
            Position::new(x, y),
        );

        self.put(device);
        if let Some(partner) = partner {
            self.put(partner);
        }
        Ok(outcome)
    }

    /// Checks capacity and call-symmetry invariants over the whole registry.
    pub fn audit(&self) -> Result<(), InvariantViolation> {
        audit(&self.network, self.devices.values())
    }

    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices.values().map(Device::snapshot).collect()
    }

    fn take(&mut self, id: DeviceId) -> Result<Device, SwitchboardError> {
        self.devices.remove(&id).ok_or(SwitchboardError::UnknownDevice(id))
    }

    fn put(&mut self, device: Device) {
        self.devices.insert(device.id(), device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AntennaId;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn reference() -> Switchboard {
        let mut network = Network::new();
        network.add_antenna(0.0, 0.0, 10.0, 8).unwrap();
        network.add_antenna(15.0, 0.0, 10.0, 10).unwrap();
        Switchboard::new(network, CallPolicy::default())
    }

    fn loads(sb: &Switchboard) -> Vec<u32> {
        sb.network().antennas().map(|a| a.active_calls()).collect()
    }

    #[test]
    fn test_reference_call() {
        let mut sb = reference();
        let p1 = sb.register(Position::new(1.0, 1.0), SimCard::new(10.0, "0555000011"), 63.0);
        let p2 = sb.register(Position::new(2.0, 2.0), SimCard::new(5.0, "0555000022"), 98.0);

        sb.call(p1, p2).unwrap();

        assert_relative_eq!(sb.device(p1).unwrap().sim().credit(), 6.0);
        assert_eq!(sb.device(p1).unwrap().call_partner(), Some(p2));
        assert_eq!(sb.device(p2).unwrap().call_partner(), Some(p1));
        assert!(sb.audit().is_ok());
    }

    #[test]
    fn test_call_unknown_device() {
        let mut sb = reference();
        let p1 = sb.register(Position::new(1.0, 1.0), SimCard::new(10.0, "1"), 63.0);
        let ghost = DeviceId::from_seed(999);

        assert_eq!(sb.call(p1, ghost).unwrap_err(), SwitchboardError::UnknownDevice(ghost));
        assert!(sb.device(p1).is_some());
        assert_eq!(sb.len(), 1);
    }

    #[test]
    fn test_self_call_rejected() {
        let mut sb = reference();
        let p1 = sb.register(Position::new(1.0, 1.0), SimCard::new(10.0, "1"), 63.0);

        let err = sb.call(p1, p1).unwrap_err();
        assert_eq!(err.rejection().map(CallRejection::code), Some("self-call"));
        assert!(!sb.device(p1).unwrap().is_in_call());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut sb = reference();
        let id = DeviceId::from_seed(42);
        sb.register_with_id(id, Position::new(0.0, 0.0), SimCard::new(1.0, "a"), 50.0).unwrap();
        assert_eq!(
            sb.register_with_id(id, Position::new(0.0, 0.0), SimCard::new(1.0, "b"), 50.0),
            Err(SwitchboardError::DuplicateDevice(id))
        );
    }

    #[test]
    fn test_register_skips_taken_ids() {
        let mut sb = reference();
        sb.register_with_id(DeviceId::from_seed(1), Position::new(0.0, 0.0), SimCard::new(1.0, "a"), 50.0)
            .unwrap();
        let id = sb.register(Position::new(0.0, 0.0), SimCard::new(1.0, "b"), 50.0);
        assert_eq!(id, DeviceId::from_seed(2));
    }

    #[test]
    fn test_move_out_of_coverage_ends_call_for_both() {
        let mut sb = reference();
        let p1 = sb.register(Position::new(1.0, 1.0), SimCard::new(10.0, "1"), 63.0);
        let p3 = sb.register(Position::new(16.0, 0.0), SimCard::new(40.0, "3"), 76.0);
        sb.call(p1, p3).unwrap();
        assert_eq!(loads(&sb), vec![1, 1]);

        let outcome = sb.move_device(p1, 43.0, 7.0).unwrap();
        assert!(outcome.is_connection_lost());
        assert!(!sb.device(p1).unwrap().is_in_call());
        assert!(!sb.device(p3).unwrap().is_in_call());
        assert_eq!(loads(&sb), vec![0, 0]);
        assert!(sb.audit().is_ok());
    }

    #[test]
    fn test_remove_hangs_up_first() {
        let mut sb = reference();
        let p1 = sb.register(Position::new(1.0, 1.0), SimCard::new(10.0, "1"), 63.0);
        let p2 = sb.register(Position::new(2.0, 2.0), SimCard::new(5.0, "2"), 98.0);
        sb.call(p1, p2).unwrap();

        let removed = sb.remove(p2).unwrap();
        assert!(!removed.is_in_call());
        assert!(!sb.device(p1).unwrap().is_in_call());
        assert_eq!(sb.network().total_active_calls(), 0);
        assert!(sb.audit().is_ok());
    }

    #[test]
    fn test_capacity_exhaustion_rejects_without_mutation() {
        let mut network = Network::new();
        network.add_antenna(0.0, 0.0, 10.0, 2).unwrap();
        let mut sb = Switchboard::new(network, CallPolicy::default());

        let a = sb.register(Position::new(1.0, 1.0), SimCard::new(50.0, "a"), 100.0);
        let b = sb.register(Position::new(2.0, 1.0), SimCard::new(50.0, "b"), 100.0);
        sb.call(a, b).unwrap();

        let c = sb.register(Position::new(1.5, 1.0), SimCard::new(50.0, "c"), 100.0);
        let d = sb.register(Position::new(1.6, 1.0), SimCard::new(50.0, "d"), 100.0);
        let err = sb.call(c, d).unwrap_err();
        assert_eq!(err.rejection().map(CallRejection::code), Some("no-network-at-origin"));
        assert_relative_eq!(sb.device(c).unwrap().sim().credit(), 50.0);
        assert_eq!(sb.network().antenna(AntennaId(0)).unwrap().active_calls(), 2);
    }

    #[test]
    fn test_sim_top_up_through_registry() {
        let mut sb = reference();
        let p4 = sb.register(Position::new(16.0, 0.0), SimCard::new(3.0, "4"), 40.0);
        let p2 = sb.register(Position::new(2.0, 2.0), SimCard::new(5.0, "2"), 98.0);

        assert!(sb.call(p4, p2).is_err());
        sb.sim_mut(p4).unwrap().add_credit(10.0);
        sb.call(p4, p2).unwrap();
        assert_relative_eq!(sb.device(p4).unwrap().sim().credit(), 9.0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Call(usize, usize),
        End(usize),
        Move(usize, f64, f64),
        Battery(usize, f64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6usize, 0..6usize).prop_map(|(a, b)| Op::Call(a, b)),
            (0..6usize).prop_map(Op::End),
            (0..6usize, -5.0..35.0f64, -12.0..12.0f64).prop_map(|(i, x, y)| Op::Move(i, x, y)),
            (0..6usize, 0.0..100.0f64).prop_map(|(i, b)| Op::Battery(i, b)),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariants_hold_under_any_sequence(ops in proptest::collection::vec(op(), 1..80)) {
            let mut network = Network::new();
            network.add_antenna(0.0, 0.0, 10.0, 2).unwrap();
            network.add_antenna(15.0, 0.0, 10.0, 3).unwrap();
            let mut sb = Switchboard::new(network, CallPolicy::default());
            let ids: Vec<DeviceId> = (0..6)
                .map(|i| sb.register(Position::new(i as f64 * 4.0, 0.0), SimCard::new(20.0, format!("{i}")), 50.0))
                .collect();

            for op in ops {
                let before = (sb.snapshot(), sb.network().snapshot());
                match op {
                    Op::Call(a, b) => {
                        if sb.call(ids[a], ids[b]).is_err() {
                            // Rejected calls leave no trace
                            prop_assert_eq!(&before, &(sb.snapshot(), sb.network().snapshot()));
                        }
                    }
                    Op::End(i) => {
                        sb.end_call(ids[i]).unwrap();
                        let once = (sb.snapshot(), sb.network().snapshot());
                        sb.end_call(ids[i]).unwrap();
                        prop_assert_eq!(&once, &(sb.snapshot(), sb.network().snapshot()));
                    }
                    Op::Move(i, x, y) => {
                        sb.move_device(ids[i], x, y).unwrap();
                    }
                    Op::Battery(i, level) => {
                        sb.set_battery(ids[i], level).unwrap();
                    }
                }
                prop_assert!(sb.audit().is_ok(), "{:?}", sb.audit());
            }
        }
    }
}

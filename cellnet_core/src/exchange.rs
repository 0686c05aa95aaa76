//! Thread-safe device registry.
//!
//! Same operations as [`crate::switchboard::Switchboard`], callable through
//! `&self` from many threads or tasks at once.
//!
//! # Locking discipline
//!
//! ```text
//! registry RwLock ──► (released) ──► device Mutex (lower id) ──► device Mutex (higher id) ──► antenna Mutex
//! ```
//!
//! - The registry lock is only held to clone a device handle.
//! - When two devices are involved they are locked in `DeviceId` order.
//! - Antenna counters are leaf locks, taken last and held for one update.
//!
//! A transition therefore sees both participants in a consistent state and
//! no other transition can touch either of them until it is done.

use crate::call::{self, CallSetup, CallTeardown, MoveOutcome};
use crate::device::{Device, DeviceSnapshot};
use crate::error::{CallRejection, SwitchboardError};
use crate::invariants::{audit, InvariantViolation};
use crate::network::Network;
use crate::policy::CallPolicy;
use crate::sim_card::SimCard;
use crate::types::{DeviceId, Position};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

type DeviceHandle = Arc<Mutex<Device>>;

/// Concurrent registry of devices on one network.
pub struct Exchange {
    network: Network,
    policy: CallPolicy,
    devices: RwLock<BTreeMap<DeviceId, DeviceHandle>>,
    next_seed: Mutex<u64>,
}

impl Exchange {
    /// Creates an exchange over `network`.
    pub fn new(network: Network, policy: CallPolicy) -> Self {
        Self {
            network,
            policy,
            devices: RwLock::new(BTreeMap::new()),
            next_seed: Mutex::new(1),
        }
    }

    /// Creates an Arc-wrapped exchange for sharing.
    pub fn shared(network: Network, policy: CallPolicy) -> Arc<Self> {
        Arc::new(Self::new(network, policy))
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Registers a device under the next deterministic id.
    pub fn register(&self, position: Position, sim: SimCard, battery: f64) -> DeviceId {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let mut seed = lock(&self.next_seed);
        let id = loop {
            let id = DeviceId::from_seed(*seed);
            *seed += 1;
            if !devices.contains_key(&id) {
                break id;
            }
        };
        let device = Device::new(&self.network, id, position, sim, battery);
        devices.insert(id, Arc::new(Mutex::new(device)));
        id
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Runs `f` with exclusive access to one device.
    ///
    /// `f` must not change the call state; use the call operations for that.
    pub fn with_device<R>(&self, id: DeviceId, f: impl FnOnce(&mut Device) -> R) -> Result<R, SwitchboardError> {
        let handle = self.handle(id)?;
        let mut device = lock(&handle);
        Ok(f(&mut *device))
    }

    pub fn device_snapshot(&self, id: DeviceId) -> Result<DeviceSnapshot, SwitchboardError> {
        self.with_device(id, |d| d.snapshot())
    }

    pub fn set_battery(&self, id: DeviceId, level: f64) -> Result<(), SwitchboardError> {
        self.with_device(id, |d| d.set_battery(level))
    }

    pub fn add_credit(&self, id: DeviceId, amount: f64) -> Result<(), SwitchboardError> {
        self.with_device(id, |d| d.sim_mut().add_credit(amount))
    }

    pub fn set_sim_active(&self, id: DeviceId, active: bool) -> Result<(), SwitchboardError> {
        self.with_device(id, |d| d.sim_mut().set_active(active))
    }

    /// Places a call from `caller` to `receiver` with both devices locked.
    pub fn call(&self, caller: DeviceId, receiver: DeviceId) -> Result<CallSetup, SwitchboardError> {
        let caller_handle = self.handle(caller)?;
        let receiver_handle = self.handle(receiver)?;
        if caller == receiver {
            return Err(CallRejection::SelfCall.into());
        }

        let (mut a, mut b) = lock_pair((caller, &caller_handle), (receiver, &receiver_handle));
        Ok(call::place_call(&self.network, &self.policy, &mut *a, &mut *b)?)
    }

    /// Hangs up the call `id` is in. `Ok(None)` if it was idle.
    pub fn end_call(&self, id: DeviceId) -> Result<Option<CallTeardown>, SwitchboardError> {
        self.with_partner(id, |device, partner| call::end_call(&self.network, device, partner))
    }

    /// Moves `id` to `(x, y)`.
    pub fn move_device(&self, id: DeviceId, x: f64, y: f64) -> Result<MoveOutcome, SwitchboardError> {
        self.with_partner(id, |device, partner| {
            call::move_device(&self.network, &self.policy, device, partner, Position::new(x, y))
        })
    }

    /// Audits the whole registry with every device locked (in id order).
    pub fn audit(&self) -> Result<(), InvariantViolation> {
        let handles = self.handles();
        let guards: Vec<MutexGuard<'_, Device>> = handles.iter().map(|h| lock(h)).collect();
        audit(&self.network, guards.iter().map(|g| &**g))
    }

    /// Consistent snapshot of all devices, in id order.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let handles = self.handles();
        let guards: Vec<MutexGuard<'_, Device>> = handles.iter().map(|h| lock(h)).collect();
        guards.iter().map(|g| g.snapshot()).collect()
    }

    /// Locks `id` together with its current call partner and runs `f`.
    ///
    /// The partner is read, both devices are relocked in id order, and the
    /// partnership is checked again; if it changed in between, retry.
    fn with_partner<R>(
        &self,
        id: DeviceId,
        f: impl FnOnce(&mut Device, Option<&mut Device>) -> R,
    ) -> Result<R, SwitchboardError> {
        let handle = self.handle(id)?;
        loop {
            let mut device = lock(&handle);
            let Some(partner_id) = device.call_partner() else {
                return Ok(f(&mut *device, None));
            };
            drop(device);

            let Ok(partner_handle) = self.handle(partner_id) else {
                let mut device = lock(&handle);
                if device.call_partner() != Some(partner_id) {
                    continue;
                }
                return Ok(f(&mut *device, None));
            };

            let (mut device, mut partner) = lock_pair((id, &handle), (partner_id, &partner_handle));
            if device.call_partner() != Some(partner_id) {
                continue;
            }
            return Ok(f(&mut *device, Some(&mut *partner)));
        }
    }

    fn handle(&self, id: DeviceId) -> Result<DeviceHandle, SwitchboardError> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(SwitchboardError::UnknownDevice(id))
    }

    fn handles(&self) -> Vec<DeviceHandle> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Locks two distinct devices in id order, returning the guards in argument order.
fn lock_pair<'a>(
    a: (DeviceId, &'a DeviceHandle),
    b: (DeviceId, &'a DeviceHandle),
) -> (MutexGuard<'a, Device>, MutexGuard<'a, Device>) {
    debug_assert_ne!(a.0, b.0);
    if a.0 < b.0 {
        let ga = lock(a.1);
        let gb = lock(b.1);
        (ga, gb)
    } else {
        let gb = lock(b.1);
        let ga = lock(a.1);
        (ga, gb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn exchange(capacity: u32) -> Arc<Exchange> {
        let mut network = Network::new();
        network.add_antenna(0.0, 0.0, 10.0, capacity).unwrap();
        network.add_antenna(15.0, 0.0, 10.0, capacity).unwrap();
        Exchange::shared(network, CallPolicy::default())
    }

    #[test]
    fn test_exchange_reference_call() {
        let ex = exchange(8);
        let p1 = ex.register(Position::new(1.0, 1.0), SimCard::new(10.0, "1"), 63.0);
        let p2 = ex.register(Position::new(2.0, 2.0), SimCard::new(5.0, "2"), 98.0);

        ex.call(p1, p2).unwrap();
        let s1 = ex.device_snapshot(p1).unwrap();
        assert_relative_eq!(s1.credit, 6.0);
        assert_eq!(s1.partner, Some(p2));
        assert_eq!(ex.device_snapshot(p2).unwrap().partner, Some(p1));

        assert!(ex.end_call(p2).unwrap().is_some());
        assert!(ex.end_call(p2).unwrap().is_none());
        assert_eq!(ex.network().total_active_calls(), 0);
        assert!(ex.audit().is_ok());
    }

    #[test]
    fn test_exchange_unknown_and_self_call() {
        let ex = exchange(8);
        let p1 = ex.register(Position::new(1.0, 1.0), SimCard::new(10.0, "1"), 63.0);
        let ghost = DeviceId::from_seed(777);

        assert_eq!(ex.call(p1, ghost).unwrap_err(), SwitchboardError::UnknownDevice(ghost));
        assert_eq!(
            ex.call(p1, p1).unwrap_err(),
            SwitchboardError::Rejected(CallRejection::SelfCall)
        );
    }

    #[test]
    fn test_exchange_move_drops_call() {
        let ex = exchange(8);
        let p1 = ex.register(Position::new(1.0, 1.0), SimCard::new(10.0, "1"), 63.0);
        let p3 = ex.register(Position::new(16.0, 0.0), SimCard::new(40.0, "3"), 76.0);
        ex.call(p1, p3).unwrap();

        assert!(ex.move_device(p3, 100.0, 0.0).unwrap().is_connection_lost());
        assert!(ex.device_snapshot(p1).unwrap().partner.is_none());
        assert_eq!(ex.network().total_active_calls(), 0);
    }

    #[test]
    fn test_concurrent_calls_respect_capacity_and_symmetry() {
        let ex = exchange(3);
        let ids: Vec<DeviceId> = (0..24)
            .map(|i| {
                let x = if i % 2 == 0 { 1.0 } else { 16.0 };
                ex.register(Position::new(x, (i % 5) as f64), SimCard::new(100.0, format!("{i}")), 90.0)
            })
            .collect();

        std::thread::scope(|s| {
            for t in 0..8 {
                let ex = &ex;
                let ids = &ids;
                s.spawn(move || {
                    for round in 0..50 {
                        let a = ids[(t * 7 + round) % ids.len()];
                        let b = ids[(t * 3 + round * 5 + 1) % ids.len()];
                        let _ = ex.call(a, b);
                        if round % 3 == 0 {
                            let _ = ex.end_call(b);
                        }
                        if round % 7 == 0 {
                            let x = if round % 2 == 0 { 40.0 } else { 2.0 };
                            let _ = ex.move_device(a, x, 0.0);
                        }
                        for antenna in ex.network().antennas() {
                            assert!(antenna.active_calls() <= antenna.capacity());
                        }
                    }
                });
            }
        });

        assert!(ex.audit().is_ok(), "{:?}", ex.audit());
    }

    #[test]
    fn test_concurrent_hangups_from_both_sides() {
        let ex = exchange(10);
        let pairs: Vec<(DeviceId, DeviceId)> = (0..5)
            .map(|i| {
                let a = ex.register(Position::new(1.0, 0.0), SimCard::new(10.0, format!("a{i}")), 90.0);
                let b = ex.register(Position::new(16.0, 0.0), SimCard::new(10.0, format!("b{i}")), 90.0);
                ex.call(a, b).unwrap();
                (a, b)
            })
            .collect();
        assert_eq!(ex.network().total_active_calls(), 10);

        std::thread::scope(|s| {
            for &(a, b) in &pairs {
                let ex = &ex;
                s.spawn(move || ex.end_call(a).unwrap());
                s.spawn(move || ex.end_call(b).unwrap());
            }
        });

        assert_eq!(ex.network().total_active_calls(), 0);
        assert!(ex.audit().is_ok());
    }
}

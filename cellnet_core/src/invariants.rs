//! Whole-network invariant audit.
//!
//! A violation here is a bug in the call model, never a routine outcome.

use crate::device::Device;
use crate::network::Network;
use crate::types::{AntennaId, DeviceId};
use std::collections::BTreeMap;
use thiserror::Error;

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{antenna} carries {active} calls but has capacity {capacity}")]
    CapacityExceeded { antenna: AntennaId, active: u32, capacity: u32 },

    #[error("{device} is in a call with itself")]
    SelfPartner { device: DeviceId },

    #[error("{device} is in a call with unknown device {partner}")]
    MissingPartner { device: DeviceId, partner: DeviceId },

    #[error("{device} points at {partner}, which points at {back:?}")]
    AsymmetricCall { device: DeviceId, partner: DeviceId, back: Option<DeviceId> },
}

/// Checks capacity bounds on every antenna and call symmetry on every device.
///
/// Returns the first violation found; antennas are checked before devices.
pub fn audit<'a, I>(network: &Network, devices: I) -> Result<(), InvariantViolation>
where
    I: IntoIterator<Item = &'a Device>,
{
    for antenna in network.antennas() {
        let active = antenna.active_calls();
        if active > antenna.capacity() {
            return Err(InvariantViolation::CapacityExceeded {
                antenna: antenna.id(),
                active,
                capacity: antenna.capacity(),
            });
        }
    }

    let partners: BTreeMap<DeviceId, Option<DeviceId>> =
        devices.into_iter().map(|d| (d.id(), d.call_partner())).collect();

    for (&device, &partner) in &partners {
        let Some(partner) = partner else { continue };
        if partner == device {
            return Err(InvariantViolation::SelfPartner { device });
        }
        match partners.get(&partner) {
            None => return Err(InvariantViolation::MissingPartner { device, partner }),
            Some(&back) if back != Some(device) => {
                return Err(InvariantViolation::AsymmetricCall { device, partner, back });
            }
            Some(_) => {}
        }
    }

    Ok(())
}

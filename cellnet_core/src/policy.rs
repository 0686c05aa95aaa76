//! Call admission policy.

use serde::{Deserialize, Serialize};

/// Battery level below which a device can neither place nor receive calls.
pub const MIN_BATTERY: f64 = 5.0;

/// Credit debited from the caller's SIM when a call is set up.
pub const CALL_COST: f64 = 4.0;

/// What happens to a claimed antenna slot when an in-call device moves
/// into the area of a different serving antenna.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverPolicy {
    /// The connected antenna is re-resolved but the slot stays where it was
    /// claimed. Teardown releases a slot on whichever antenna the device
    /// points at by then.
    #[default]
    Legacy,

    /// The slot follows the device: claimed on the new antenna, released on
    /// the old one.
    Transfer,
}

/// Thresholds and costs applied by the call state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Minimum battery to place or receive a call
    pub min_battery: f64,

    /// Credit charged to the caller per call
    pub call_cost: f64,

    /// Slot accounting on movement during a call
    pub handover: HandoverPolicy,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            min_battery: MIN_BATTERY,
            call_cost: CALL_COST,
            handover: HandoverPolicy::Legacy,
        }
    }
}

impl CallPolicy {
    /// Returns this policy with a different handover mode.
    pub fn with_handover(mut self, handover: HandoverPolicy) -> Self {
        self.handover = handover;
        self
    }
}

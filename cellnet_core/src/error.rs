//! Error and rejection types for the network model.
//!
//! Call rejection is routine, so [`CallRejection`] is a plain value carried
//! in a `Result`. Each variant maps to a stable reason code via
//! [`CallRejection::code`].

use crate::types::{AntennaId, DeviceId, SubscriberNumber};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building a network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    /// The new antenna's coverage neither overlaps nor touches any existing antenna.
    #[error("Antenna coverage at ({x}, {y}) r={radius} is separate: not added to this network")]
    IsolatedCoverage { x: f64, y: f64, radius: f64 },

    /// Coordinates are not finite or the radius is negative.
    #[error("Invalid antenna geometry: {0}")]
    InvalidGeometry(String),
}

/// Errors raised by SIM card operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("SIM {number} already assigned to another phone ({owner})")]
    AlreadyAssigned { number: SubscriberNumber, owner: DeviceId },
}

/// Which end of a call a rejection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Party {
    Caller,
    Receiver,
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Party::Caller => f.write_str("caller"),
            Party::Receiver => f.write_str("receiver"),
        }
    }
}

/// Reason a call could not be set up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallRejection {
    /// The named party is already in a call
    #[error("Cannot {}: already in a call", verb(.party))]
    AlreadyInCall { party: Party },

    /// The named party is below the minimum battery level
    #[error("Cannot {}: battery too low ({level:.1})", verb(.party))]
    BatteryTooLow { party: Party, level: f64 },

    /// The caller's SIM card is deactivated
    #[error("Cannot make the call: SIM card is inactive")]
    SimInactive,

    /// The caller cannot afford the call cost
    #[error("Cannot make the call: not enough credit ({credit:.2} < {required:.2})")]
    InsufficientCredit { credit: f64, required: f64 },

    /// No antenna serves the caller
    #[error("Cannot make the call: you don't have network")]
    NoNetwork,

    /// No antenna serves the receiver
    #[error("Receiver not available")]
    ReceiverUnavailable,

    /// A slot claim failed on a full antenna
    #[error("Antenna {antenna} has no free call slot")]
    CapacityExceeded { antenna: AntennaId },

    /// Caller and receiver are the same device
    #[error("Cannot call yourself")]
    SelfCall,
}

fn verb(party: &Party) -> &'static str {
    match party {
        Party::Caller => "make the call",
        Party::Receiver => "receive the call",
    }
}

impl CallRejection {
    /// Stable machine-readable code for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            CallRejection::AlreadyInCall { .. } => "already-in-call",
            CallRejection::BatteryTooLow { .. } => "battery-too-low",
            CallRejection::SimInactive => "sim-inactive",
            CallRejection::InsufficientCredit { .. } => "insufficient-credit",
            CallRejection::NoNetwork => "no-network-at-origin",
            CallRejection::ReceiverUnavailable => "receiver-unavailable",
            CallRejection::CapacityExceeded { .. } => "capacity-exceeded",
            CallRejection::SelfCall => "self-call",
        }
    }

    /// Returns which side of the call caused the rejection, when it is attributable.
    pub fn party(&self) -> Option<Party> {
        match self {
            CallRejection::AlreadyInCall { party } | CallRejection::BatteryTooLow { party, .. } => Some(*party),
            CallRejection::SimInactive
            | CallRejection::InsufficientCredit { .. }
            | CallRejection::NoNetwork => Some(Party::Caller),
            CallRejection::ReceiverUnavailable => Some(Party::Receiver),
            CallRejection::CapacityExceeded { .. } | CallRejection::SelfCall => None,
        }
    }
}

/// Errors raised by device registries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SwitchboardError {
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Device already registered: {0}")]
    DuplicateDevice(DeviceId),

    #[error(transparent)]
    Rejected(#[from] CallRejection),
}

impl SwitchboardError {
    /// Returns the call rejection, if this error is one.
    pub fn rejection(&self) -> Option<&CallRejection> {
        match self {
            SwitchboardError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_codes_are_stable() {
        assert_eq!(CallRejection::AlreadyInCall { party: Party::Caller }.code(), "already-in-call");
        assert_eq!(CallRejection::NoNetwork.code(), "no-network-at-origin");
        assert_eq!(CallRejection::CapacityExceeded { antenna: AntennaId(0) }.code(), "capacity-exceeded");
    }

    #[test]
    fn test_rejection_messages_name_the_side() {
        let caller = CallRejection::BatteryTooLow { party: Party::Caller, level: 3.0 };
        let receiver = CallRejection::BatteryTooLow { party: Party::Receiver, level: 3.0 };
        assert_eq!(caller.to_string(), "Cannot make the call: battery too low (3.0)");
        assert_eq!(receiver.to_string(), "Cannot receive the call: battery too low (3.0)");
        assert_eq!(receiver.party(), Some(Party::Receiver));
    }
}

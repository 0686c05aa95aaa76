//! The call state machine.
//!
//! ```text
//!            place_call (both sides, all-or-nothing)
//!   ┌──────┐ ─────────────────────────────────────► ┌──────────────────┐
//!   │ Idle │                                        │ InCall { partner }│
//!   └──────┘ ◄───────────────────────────────────── └──────────────────┘
//!            end_call (hang-up)
//!            move_device out of coverage (connection lost)
//! ```
//!
//! Every transition takes both participants explicitly. Nothing here
//! reaches from one device into another through a stored reference: the
//! partner is named by id and the caller of these functions supplies it.

use crate::device::{CallState, Device};
use crate::error::CallRejection;
use crate::network::Network;
use crate::policy::{CallPolicy, HandoverPolicy};
use crate::types::{AntennaId, DeviceId, Position};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Record of a successful call setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSetup {
    pub caller: DeviceId,
    pub receiver: DeviceId,
    pub caller_number: String,
    pub receiver_number: String,
    pub caller_antenna: AntennaId,
    pub receiver_antenna: AntennaId,
    /// Credit debited from the caller
    pub charged: f64,
}

impl CallSetup {
    pub fn code(&self) -> &'static str {
        "success"
    }
}

impl std::fmt::Display for CallSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Call started between {} and {}", self.caller_number, self.receiver_number)
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeardownCause {
    /// One side hung up
    HangUp,
    /// A participant moved out of all coverage
    CoverageLost,
}

impl TeardownCause {
    pub fn code(&self) -> &'static str {
        match self {
            TeardownCause::HangUp => "call-ended",
            TeardownCause::CoverageLost => "connection-lost-on-move",
        }
    }
}

/// Record of a call teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTeardown {
    /// Device that ended (or lost) the call
    pub device: DeviceId,
    /// Its partner at the time
    pub partner: DeviceId,
    /// False when the partner had already left the call or was not supplied
    pub partner_cleared: bool,
    pub cause: TeardownCause,
    /// Antennas on which a slot was released
    pub released: Vec<AntennaId>,
}

impl std::fmt::Display for CallTeardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cause {
            TeardownCause::HangUp => write!(f, "Call ended"),
            TeardownCause::CoverageLost => write!(f, "Network connection lost. Call ended"),
        }
    }
}

/// Result of moving a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MoveOutcome {
    /// The device has a serving antenna at its new position
    Served { antenna: AntennaId },
    /// Idle device outside all usable coverage
    NoCoverage,
    /// The call's slot moved to a new antenna
    HandedOver { from: AntennaId, to: AntennaId },
    /// The device was in a call and lost coverage; the call was torn down
    ConnectionLost(CallTeardown),
}

impl MoveOutcome {
    pub fn serving_antenna(&self) -> Option<AntennaId> {
        match self {
            MoveOutcome::Served { antenna } => Some(*antenna),
            MoveOutcome::HandedOver { to, .. } => Some(*to),
            MoveOutcome::NoCoverage | MoveOutcome::ConnectionLost(_) => None,
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, MoveOutcome::ConnectionLost(_))
    }
}

/// Sets up a call from `caller` to `receiver`.
///
/// Guards run in this order: self-call, caller eligibility, receiver
/// eligibility, caller's serving antenna, receiver's serving antenna,
/// slot claims. If the caller's claim leaves the receiver's antenna full,
/// the receiver falls back to its next serving antenna. On any failure no
/// state changes: a slot claimed before a later claim fails is released
/// again. Only the caller is charged.
pub fn place_call(
    network: &Network,
    policy: &CallPolicy,
    caller: &mut Device,
    receiver: &mut Device,
) -> Result<CallSetup, CallRejection> {
    let result = try_place_call(network, policy, caller, receiver);
    if let Err(rejection) = &result {
        debug!("Call {} -> {} rejected [{}]: {}", caller.id(), receiver.id(), rejection.code(), rejection);
    }
    result
}

fn try_place_call(
    network: &Network,
    policy: &CallPolicy,
    caller: &mut Device,
    receiver: &mut Device,
) -> Result<CallSetup, CallRejection> {
    if caller.id() == receiver.id() {
        return Err(CallRejection::SelfCall);
    }
    caller.can_make_call(policy)?;
    receiver.can_receive_call(policy)?;

    let caller_antenna = network
        .find_nearest_antenna(&caller.position())
        .ok_or(CallRejection::NoNetwork)?;
    let first_choice = network
        .find_nearest_antenna(&receiver.position())
        .ok_or(CallRejection::ReceiverUnavailable)?;

    if !network.claim(caller_antenna) {
        return Err(CallRejection::CapacityExceeded { antenna: caller_antenna });
    }

    // The caller's claim may have filled the receiver's first choice, so the
    // receiver is resolved again against the loads that now hold.
    let receiver_antenna = if network.claim(first_choice) {
        first_choice
    } else {
        match network.find_nearest_antenna(&receiver.position()) {
            Some(next) if network.claim(next) => next,
            _ => {
                network.release(caller_antenna);
                return Err(CallRejection::CapacityExceeded { antenna: first_choice });
            }
        }
    };

    caller.connected_antenna = Some(caller_antenna);
    receiver.connected_antenna = Some(receiver_antenna);
    caller.state = CallState::InCall { partner: receiver.id() };
    receiver.state = CallState::InCall { partner: caller.id() };

    let charged = caller.sim_mut().deduct_credit(policy.call_cost);
    debug_assert!(charged, "credit was checked by can_make_call");

    let setup = CallSetup {
        caller: caller.id(),
        receiver: receiver.id(),
        caller_number: caller.sim().number().to_string(),
        receiver_number: receiver.sim().number().to_string(),
        caller_antenna,
        receiver_antenna,
        charged: if charged { policy.call_cost } else { 0.0 },
    };
    info!("{} ({} <-> {})", setup, caller_antenna, receiver_antenna);

    Ok(setup)
}

/// Ends the call `device` is in, for both participants.
///
/// Returns `None` if the device is idle, so a second call is a no-op.
/// `partner` should be the device's current partner; it is only modified
/// if it is still in a call with `device`, and may be `None` if it is gone.
///
/// # Panics
/// If `partner` is supplied but is not the device's partner.
pub fn end_call(network: &Network, device: &mut Device, partner: Option<&mut Device>) -> Option<CallTeardown> {
    let teardown = teardown(network, device, partner, TeardownCause::HangUp)?;
    info!("{} ({} hung up)", teardown, teardown.device);
    Some(teardown)
}

fn teardown(
    network: &Network,
    device: &mut Device,
    partner: Option<&mut Device>,
    cause: TeardownCause,
) -> Option<CallTeardown> {
    let CallState::InCall { partner: partner_id } = device.state else {
        return None;
    };

    if let Some(peer) = partner.as_deref() {
        assert_eq!(peer.id(), partner_id, "{} is not the call partner of {}", peer.id(), device.id());
    }

    let mut released = Vec::with_capacity(2);
    device.state = CallState::Idle;
    if let Some(antenna) = device.connected_antenna {
        network.release(antenna);
        released.push(antenna);
    }

    let mut partner_cleared = false;
    if let Some(peer) = partner {
        if peer.state == (CallState::InCall { partner: device.id() }) {
            peer.state = CallState::Idle;
            if let Some(antenna) = peer.connected_antenna {
                network.release(antenna);
                released.push(antenna);
            }
            partner_cleared = true;
        }
    }

    Some(CallTeardown {
        device: device.id(),
        partner: partner_id,
        partner_cleared,
        cause,
        released,
    })
}

/// Moves `device` to `to` and re-resolves its serving antenna.
///
/// An in-call device that ends up with no serving antenna loses the call,
/// reported as [`MoveOutcome::ConnectionLost`]. `partner` is the device's
/// current call partner, if any, and is needed to tear the call down on
/// both sides.
pub fn move_device(
    network: &Network,
    policy: &CallPolicy,
    device: &mut Device,
    partner: Option<&mut Device>,
    to: Position,
) -> MoveOutcome {
    device.position = to;
    let serving = network.find_nearest_antenna(&to);

    if !device.is_in_call() {
        device.connected_antenna = serving;
        return serving.map_or(MoveOutcome::NoCoverage, |antenna| MoveOutcome::Served { antenna });
    }

    match policy.handover {
        HandoverPolicy::Legacy => {
            // The pointer follows the lookup; the claimed slot does not.
            match serving {
                Some(antenna) => {
                    device.connected_antenna = Some(antenna);
                    MoveOutcome::Served { antenna }
                }
                None => connection_lost(network, device, partner),
            }
        }
        HandoverPolicy::Transfer => hand_over(network, device, partner, serving),
    }
}

fn hand_over(
    network: &Network,
    device: &mut Device,
    partner: Option<&mut Device>,
    serving: Option<AntennaId>,
) -> MoveOutcome {
    let position = device.position();

    // The antenna holding our slot still serves us while it covers us, even if full
    let current = device
        .connected_antenna
        .filter(|id| network.antenna(*id).is_some_and(|a| a.is_in_coverage(&position)));

    let target = match (current, serving) {
        (Some(cur), Some(new)) => {
            let cur_dist = network.antenna(cur).map_or(f64::INFINITY, |a| a.distance_to(&position));
            let new_dist = network.antenna(new).map_or(f64::INFINITY, |a| a.distance_to(&position));
            if new_dist < cur_dist { new } else { cur }
        }
        (Some(cur), None) => cur,
        (None, Some(new)) => new,
        (None, None) => return connection_lost(network, device, partner),
    };

    if Some(target) == current {
        return MoveOutcome::Served { antenna: target };
    }

    if network.claim(target) {
        return match device.connected_antenna.replace(target) {
            Some(from) => {
                network.release(from);
                debug!("{} handed over {} -> {}", device.id(), from, target);
                MoveOutcome::HandedOver { from, to: target }
            }
            None => MoveOutcome::Served { antenna: target },
        };
    }

    match current {
        Some(cur) => MoveOutcome::Served { antenna: cur },
        None => connection_lost(network, device, partner),
    }
}

/// Tears down the call after a move left the device without service.
///
/// The slot released on the device's side is the one it was connected to
/// before the move.
fn connection_lost(network: &Network, device: &mut Device, partner: Option<&mut Device>) -> MoveOutcome {
    warn!("{} lost network connection during a call", device.id());
    let outcome = match teardown(network, device, partner, TeardownCause::CoverageLost) {
        Some(teardown) => {
            info!("{} ({})", teardown, teardown.cause.code());
            MoveOutcome::ConnectionLost(teardown)
        }
        None => MoveOutcome::NoCoverage,
    };
    device.connected_antenna = None;
    outcome
}

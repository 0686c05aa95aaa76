//! CellNet Core - Antenna Network Model and Call State Machine
//!
//! This library models a simplified cellular network:
//! 1. **Coverage**: antennas serve a disk around their position, up to a call capacity
//! 2. **Admission**: a call claims one slot on the serving antenna of each endpoint
//! 3. **Mobility**: moving a device re-resolves its serving antenna and can drop a call
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Switchboard / Exchange                    │
//! │   (device registry, source of truth for call partners)   │
//! │       │                                                   │
//! │  ┌────▼────┐   place_call / end_call   ┌─────────┐        │
//! │  │ Device  │◄─────────────────────────►│ Device  │        │
//! │  │  + SIM  │        move_device        │  + SIM  │        │
//! │  └────┬────┘                           └────┬────┘        │
//! │       │  find_nearest_antenna               │             │
//! │  ┌────▼─────────────────────────────────────▼────┐        │
//! │  │ Network: Antenna #0, Antenna #1, ...           │        │
//! │  └────────────────────────────────────────────────┘        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no ambient network: every operation receives the [`Network`]
//! explicitly, and devices refer to antennas and to each other by id.

pub mod antenna;
pub mod call;
pub mod device;
pub mod error;
pub mod exchange;
pub mod invariants;
pub mod network;
pub mod policy;
pub mod sim_card;
pub mod switchboard;
pub mod types;

// Re-export key types for convenience
pub use antenna::{Antenna, AntennaSnapshot};
pub use call::{end_call, move_device, place_call, CallSetup, CallTeardown, MoveOutcome, TeardownCause};
pub use device::{CallState, Device, DeviceSnapshot};
pub use error::{CallRejection, NetworkError, Party, SimError, SwitchboardError};
pub use exchange::Exchange;
pub use invariants::{audit, InvariantViolation};
pub use network::Network;
pub use policy::{CallPolicy, HandoverPolicy, CALL_COST, MIN_BATTERY};
pub use sim_card::SimCard;
pub use switchboard::Switchboard;
pub use types::{AntennaId, DeviceId, Position, SubscriberNumber};

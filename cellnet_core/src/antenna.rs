//! Antennas: coverage cells with a bounded number of simultaneous calls.

use crate::types::{AntennaId, Position};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A coverage cell with call capacity.
///
/// Geometry is fixed at construction. Only the active call counter
/// changes, and it lives behind a per-antenna mutex so that the capacity
/// check and the increment happen as one step.
#[derive(Debug)]
pub struct Antenna {
    id: AntennaId,
    position: Position,
    radius: f64,
    capacity: u32,
    active_calls: Mutex<u32>,
}

/// Point-in-time view of an antenna.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntennaSnapshot {
    pub id: AntennaId,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub capacity: u32,
    pub active_calls: u32,
}

impl Antenna {
    /// Creates an antenna with no active calls.
    pub(crate) fn new(id: AntennaId, position: Position, radius: f64, capacity: u32) -> Self {
        Self {
            id,
            position,
            radius,
            capacity,
            active_calls: Mutex::new(0),
        }
    }

    pub fn id(&self) -> AntennaId {
        self.id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of calls currently holding a slot on this antenna.
    pub fn active_calls(&self) -> u32 {
        *self.counter()
    }

    /// Returns true while at least one slot is free.
    pub fn can_accept_new_call(&self) -> bool {
        *self.counter() < self.capacity
    }

    /// Claims a slot if one is free.
    ///
    /// A full antenna is left untouched. Returns whether a slot was claimed.
    pub fn increment_active_calls(&self) -> bool {
        let mut active = self.counter();
        if *active < self.capacity {
            *active += 1;
            true
        } else {
            false
        }
    }

    /// Releases a slot. No-op at zero.
    pub fn decrement_active_calls(&self) {
        let mut active = self.counter();
        if *active != 0 {
            *active -= 1;
        }
    }

    /// Euclidean distance from the antenna to `point`.
    pub fn distance_to(&self, point: &Position) -> f64 {
        nalgebra::distance(&self.position, point)
    }

    /// True iff `point` lies inside the coverage disk, boundary included.
    pub fn is_in_coverage(&self, point: &Position) -> bool {
        self.distance_to(point) <= self.radius
    }

    /// True iff the two coverage disks overlap or touch.
    pub fn touches(&self, center: &Position, radius: f64) -> bool {
        self.distance_to(center) <= self.radius + radius
    }

    pub fn snapshot(&self) -> AntennaSnapshot {
        AntennaSnapshot {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            radius: self.radius,
            capacity: self.capacity,
            active_calls: self.active_calls(),
        }
    }

    fn counter(&self) -> MutexGuard<'_, u32> {
        // The counter is a plain integer, a panicking holder cannot leave it torn
        self.active_calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

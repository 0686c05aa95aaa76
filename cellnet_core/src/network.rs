//! The antenna registry and serving-antenna lookup.

use crate::antenna::{Antenna, AntennaSnapshot};
use crate::error::NetworkError;
use crate::types::{AntennaId, Position};
use tracing::{debug, warn};

/// An admission-controlled collection of antennas.
///
/// Antennas are kept in insertion order. That order breaks distance ties
/// in [`Network::find_nearest_antenna`] and is the order in which the
/// adjacency rule is checked.
#[derive(Debug, Default)]
pub struct Network {
    antennas: Vec<Antenna>,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an antenna, subject to the adjacency rule.
    ///
    /// The first antenna is always accepted. Every later antenna must have
    /// its coverage disk overlap or touch the disk of an antenna already in
    /// the network, so the network never splits into islands.
    ///
    /// # Returns
    /// * `Ok(id)` - The antenna was added
    /// * `Err(NetworkError::IsolatedCoverage)` - No existing antenna is adjacent
    /// * `Err(NetworkError::InvalidGeometry)` - Non-finite position or negative radius
    pub fn add_antenna(&mut self, x: f64, y: f64, radius: f64, capacity: u32) -> Result<AntennaId, NetworkError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(NetworkError::InvalidGeometry(format!("position ({x}, {y}) is not finite")));
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(NetworkError::InvalidGeometry(format!("radius {radius} must be finite and >= 0")));
        }

        let center = Position::new(x, y);
        let adjacent = self.antennas.is_empty() || self.antennas.iter().any(|a| a.touches(&center, radius));

        if !adjacent {
            warn!("Antenna at ({}, {}) r={} rejected: coverage is separate", x, y, radius);
            return Err(NetworkError::IsolatedCoverage { x, y, radius });
        }

        let id = AntennaId(self.antennas.len() as u32);
        self.antennas.push(Antenna::new(id, center, radius, capacity));
        debug!("{} added at ({}, {}) r={} capacity={}", id, x, y, radius, capacity);

        Ok(id)
    }

    /// Returns the serving antenna for `point`.
    ///
    /// Candidates must cover the point and have a free slot. The closest
    /// candidate wins; on equal distance the earliest inserted wins. This is
    /// a query only: no slot is reserved.
    pub fn find_nearest_antenna(&self, point: &Position) -> Option<AntennaId> {
        let mut nearest: Option<(AntennaId, f64)> = None;

        for antenna in &self.antennas {
            if !antenna.is_in_coverage(point) || !antenna.can_accept_new_call() {
                continue;
            }
            let dist = antenna.distance_to(point);
            match nearest {
                Some((_, best)) if dist >= best => {}
                _ => nearest = Some((antenna.id(), dist)),
            }
        }

        nearest.map(|(id, _)| id)
    }

    /// Looks up an antenna by id.
    pub fn antenna(&self, id: AntennaId) -> Option<&Antenna> {
        self.antennas.get(id.index())
    }

    /// Iterates antennas in insertion order.
    pub fn antennas(&self) -> impl Iterator<Item = &Antenna> {
        self.antennas.iter()
    }

    pub fn len(&self) -> usize {
        self.antennas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.antennas.is_empty()
    }

    /// Sum of active calls over all antennas (each call counts once per side).
    pub fn total_active_calls(&self) -> u64 {
        self.antennas.iter().map(|a| a.active_calls() as u64).sum()
    }

    pub fn snapshot(&self) -> Vec<AntennaSnapshot> {
        self.antennas.iter().map(Antenna::snapshot).collect()
    }

    /// Claims a slot on `id`. Unknown ids claim nothing.
    pub(crate) fn claim(&self, id: AntennaId) -> bool {
        self.antenna(id).is_some_and(Antenna::increment_active_calls)
    }

    /// Releases a slot on `id`. Unknown ids are ignored.
    pub(crate) fn release(&self, id: AntennaId) {
        if let Some(antenna) = self.antenna(id) {
            antenna.decrement_active_calls();
        }
    }
}

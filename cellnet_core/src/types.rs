//! Identifiers and geometry shared across the network model.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A planar position in network coordinates.
pub type Position = Point2<f64>;

/// Unique identifier for a device.
///
/// The total order on ids is the lock order used when two devices must be
/// mutated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// Creates a new random DeviceId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a DeviceId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic DeviceId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough to tell devices apart in logs
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// Index of an antenna in its network's insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AntennaId(pub u32);

impl AntennaId {
    /// Returns the position of this antenna in the network's collection.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for AntennaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ANT-{}", self.0)
    }
}

/// Subscriber number printed on a SIM card.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberNumber(pub String);

impl SubscriberNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SubscriberNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriberNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_from_seed_is_deterministic() {
        assert_eq!(DeviceId::from_seed(7), DeviceId::from_seed(7));
        assert_ne!(DeviceId::from_seed(7), DeviceId::from_seed(8));
    }

    #[test]
    fn test_device_id_display_is_short() {
        let id = DeviceId::from_seed(1);
        assert_eq!(id.to_string().len(), 8);
    }

    #[test]
    fn test_antenna_id_display() {
        assert_eq!(AntennaId(3).to_string(), "ANT-3");
        assert_eq!(AntennaId(3).index(), 3);
    }
}

//! Network plans: antenna layouts and subscriber rosters as data.
//!
//! A plan is plain serde data, loadable from JSON, that builds a
//! ready-to-use [`Switchboard`]. Antennas that break the adjacency rule are
//! collected in [`BuiltPlan::rejected`] rather than failing the build.

use cellnet_core::{
    CallPolicy, DeviceId, Network, NetworkError, Position, SimCard, Switchboard,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while loading a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid plan: {0}")]
    Json(#[from] serde_json::Error),
}

/// One antenna in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AntennaPlan {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub capacity: u32,
}

/// One subscriber: a SIM card and the phone it is inserted in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberPlan {
    pub number: String,
    pub credit: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    pub x: f64,
    pub y: f64,
    pub battery: f64,
}

fn default_active() -> bool {
    true
}

impl SubscriberPlan {
    pub fn new(number: impl Into<String>, credit: f64, x: f64, y: f64, battery: f64) -> Self {
        Self {
            number: number.into(),
            credit,
            active: true,
            x,
            y,
            battery,
        }
    }
}

/// A complete network description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPlan {
    #[serde(default)]
    pub policy: CallPolicy,
    pub antennas: Vec<AntennaPlan>,
    #[serde(default)]
    pub subscribers: Vec<SubscriberPlan>,
}

/// An antenna the network refused, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedAntenna {
    /// Position of the antenna in [`NetworkPlan::antennas`]
    pub index: usize,
    pub antenna: AntennaPlan,
    pub error: NetworkError,
}

/// The result of building a plan.
#[derive(Debug)]
pub struct BuiltPlan {
    pub switchboard: Switchboard,
    /// Device ids in subscriber order
    pub devices: Vec<DeviceId>,
    pub rejected: Vec<RejectedAntenna>,
}

impl NetworkPlan {
    /// The two-antenna town used by the reference tour.
    ///
    /// Subscribers, in order: a caller at (1,1) with credit 10, a receiver
    /// at (2,2) with credit 5, a subscriber at (16,0) with credit 40, one
    /// at (16,0) with credit 3 and one at (1,1) with an almost flat battery.
    pub fn reference() -> Self {
        Self {
            policy: CallPolicy::default(),
            antennas: vec![
                AntennaPlan { x: 0.0, y: 0.0, radius: 10.0, capacity: 8 },
                AntennaPlan { x: 15.0, y: 0.0, radius: 10.0, capacity: 10 },
            ],
            subscribers: vec![
                SubscriberPlan::new("0555000011", 10.0, 1.0, 1.0, 63.0),
                SubscriberPlan::new("0555000022", 5.0, 2.0, 2.0, 98.0),
                SubscriberPlan::new("0555000033", 40.0, 16.0, 0.0, 76.0),
                SubscriberPlan::new("0555000044", 3.0, 16.0, 0.0, 40.0),
                SubscriberPlan::new("0555000055", 10.0, 1.0, 1.0, 3.0),
            ],
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds only the antenna layout.
    pub fn build_network(&self) -> (Network, Vec<RejectedAntenna>) {
        let mut network = Network::new();
        let mut rejected = Vec::new();

        for (index, a) in self.antennas.iter().enumerate() {
            if let Err(error) = network.add_antenna(a.x, a.y, a.radius, a.capacity) {
                warn!("Plan antenna #{} skipped: {}", index, error);
                rejected.push(RejectedAntenna { index, antenna: *a, error });
            }
        }

        (network, rejected)
    }

    /// Builds the network and registers every subscriber's phone.
    pub fn build(&self) -> BuiltPlan {
        let (network, rejected) = self.build_network();
        let mut switchboard = Switchboard::new(network, self.policy);

        let devices = self
            .subscribers
            .iter()
            .map(|s| {
                let mut sim = SimCard::new(s.credit, s.number.as_str());
                sim.set_active(s.active);
                switchboard.register(Position::new(s.x, s.y), sim, s.battery)
            })
            .collect();

        info!(
            "Plan built: {} antennas ({} rejected), {} devices",
            switchboard.network().len(),
            rejected.len(),
            switchboard.len()
        );

        BuiltPlan { switchboard, devices, rejected }
    }
}

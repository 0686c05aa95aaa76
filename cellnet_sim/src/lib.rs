//! CellNet deterministic simulation harness
//!
//! Drives the call model in `cellnet_core` through scripted and randomized
//! scenarios, auditing the capacity and call-symmetry invariants after
//! every step.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                      │
//! │  scripted / random walk             rush hour            │
//! │       │                                  │               │
//! │  ┌────▼─────────────────┐   ┌────────────▼───────────┐   │
//! │  │ SimWorld             │   │ tokio multi-thread rt  │   │
//! │  │  Switchboard         │   │  N tasks ──► Exchange  │   │
//! │  │  ChaCha8Rng + Normal │   │  monitor task audits   │   │
//! │  └────┬─────────────────┘   └────────────┬───────────┘   │
//! │       │                                  │               │
//! │  ┌────▼──────────────────────────────────▼───────────┐   │
//! │  │ InvariantOracle (audit + rejection atomicity)     │   │
//! │  └───────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cellnet_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 20)
//!     .with_duration(10.0)
//!     .run(ScenarioId::RandomWalk);
//! assert!(result.passed);
//! ```

mod exporter;
mod oracle;
mod plan;
mod runner;
pub mod scenarios;
mod world;

pub use exporter::{SimEvent, SimExport, SimFrame};
pub use oracle::{InvariantOracle, Observation};
pub use plan::{AntennaPlan, BuiltPlan, NetworkPlan, PlanError, RejectedAntenna, SubscriberPlan};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{generate_plan, SimConfig, SimWorld, WorldError};

//! SimWorld - the simulation harness container.
//!
//! The world owns a [`Switchboard`] and routes every call, hang-up and
//! move through itself so that each one is counted, logged as an event and
//! checked by the [`InvariantOracle`].

use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::oracle::{InvariantOracle, Observation};
use crate::plan::{AntennaPlan, NetworkPlan, SubscriberPlan};
use crate::runner::ScenarioMetrics;

use cellnet_core::{
    CallPolicy, CallSetup, CallTeardown, DeviceId, HandoverPolicy, MoveOutcome, Position, SimCard,
    Switchboard, SwitchboardError,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;
use tracing::debug;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of phones to spawn
    pub num_devices: usize,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Maximum simulation duration in seconds
    pub max_duration_secs: f64,

    /// Standard deviation of each per-tick movement step
    pub movement_noise_std: f64,

    /// Chance per tick that an idle phone dials someone
    pub call_probability: f64,

    /// Chance per tick that a phone in a call hangs up
    pub hangup_probability: f64,

    /// Side of the square antenna grid
    pub arena_size: f64,

    pub antenna_spacing: f64,
    pub antenna_radius: f64,
    pub antenna_capacity: u32,

    pub handover: HandoverPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_devices: 20,
            tick_rate_hz: 10,
            max_duration_secs: 30.0,
            movement_noise_std: 2.0,
            call_probability: 0.05,
            hangup_probability: 0.1,
            arena_size: 60.0,
            antenna_spacing: 15.0,
            antenna_radius: 10.0,
            antenna_capacity: 4,
            handover: HandoverPolicy::Legacy,
        }
    }
}

/// Rejected world configurations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorldError {
    #[error("Movement noise must be finite and >= 0, got {0}")]
    InvalidNoise(f64),

    #[error("{name} must be within [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("Tick rate must be positive")]
    InvalidTickRate,
}

/// Lays out a square grid of antennas and a random subscriber roster.
///
/// Grid neighbours touch when `antenna_spacing <= 2 * antenna_radius`, so
/// the default layout is one connected network.
pub fn generate_plan(config: &SimConfig) -> NetworkPlan {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_mul(0x517cc1b727220a95));

    let steps = if config.antenna_spacing > 0.0 && config.arena_size > 0.0 {
        (config.arena_size / config.antenna_spacing).floor() as usize
    } else {
        0
    };

    let mut antennas = Vec::with_capacity((steps + 1) * (steps + 1));
    for i in 0..=steps {
        for j in 0..=steps {
            antennas.push(AntennaPlan {
                x: i as f64 * config.antenna_spacing,
                y: j as f64 * config.antenna_spacing,
                radius: config.antenna_radius,
                capacity: config.antenna_capacity,
            });
        }
    }

    let arena = config.arena_size.max(0.0);
    let subscribers = (0..config.num_devices)
        .map(|i| SubscriberPlan {
            number: format!("0555{:06}", i + 1),
            credit: rng.gen_range(0.0..40.0),
            active: rng.gen_bool(0.95),
            x: rng.gen_range(0.0..=arena),
            y: rng.gen_range(0.0..=arena),
            battery: rng.gen_range(0.0..=100.0),
        })
        .collect();

    NetworkPlan {
        policy: CallPolicy::default().with_handover(config.handover),
        antennas,
        subscribers,
    }
}

/// Per-tick random-walk step. `Normal::new` accepts a negative deviation,
/// so the sign is checked here.
pub(crate) fn movement_step(noise: f64) -> Result<Normal<f64>, WorldError> {
    if !(noise.is_finite() && noise >= 0.0) {
        return Err(WorldError::InvalidNoise(noise));
    }
    Normal::new(0.0, noise).map_err(|_| WorldError::InvalidNoise(noise))
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    switchboard: Switchboard,

    /// Device ids in subscriber order
    devices: Vec<DeviceId>,

    rng: ChaCha8Rng,
    step: Normal<f64>,

    oracle: InvariantOracle,
    metrics: ScenarioMetrics,

    events: Vec<SimEvent>,

    /// Index of the first event not yet attached to a frame
    frame_cursor: usize,

    export: Option<SimExport>,

    tick_count: u64,
    time: f64,
}

impl SimWorld {
    /// Creates a world over a generated grid network.
    pub fn new(config: SimConfig) -> Result<Self, WorldError> {
        let plan = generate_plan(&config);
        Self::from_plan(config, &plan)
    }

    /// Creates a world over an explicit plan. The plan's policy wins over
    /// `config.handover`.
    pub fn from_plan(config: SimConfig, plan: &NetworkPlan) -> Result<Self, WorldError> {
        let step = movement_step(config.movement_noise_std)?;
        for (name, value) in [
            ("call_probability", config.call_probability),
            ("hangup_probability", config.hangup_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(WorldError::InvalidProbability { name, value });
            }
        }
        if config.tick_rate_hz == 0 {
            return Err(WorldError::InvalidTickRate);
        }

        // Separate stream from the one that generated the plan
        let rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_mul(0x9e3779b97f4a7c15));
        let built = plan.build();

        let mut world = Self {
            config,
            switchboard: built.switchboard,
            devices: built.devices,
            rng,
            step,
            oracle: InvariantOracle::new(),
            metrics: ScenarioMetrics::default(),
            events: Vec::new(),
            frame_cursor: 0,
            export: None,
            tick_count: 0,
            time: 0.0,
        };

        for rejected in &built.rejected {
            world.emit("antenna-rejected", format!("antenna #{}: {}", rejected.index, rejected.error));
        }
        world.audit();

        Ok(world)
    }

    pub fn switchboard(&self) -> &Switchboard {
        &self.switchboard
    }

    /// Direct access for scripted top-ups, SIM (de)activation and battery
    /// changes. Nothing done through it is counted or audited until the next
    /// instrumented step.
    pub fn switchboard_mut(&mut self) -> &mut Switchboard {
        &mut self.switchboard
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Registers an extra phone mid-run and returns its id.
    pub fn add_subscriber(&mut self, subscriber: &SubscriberPlan) -> DeviceId {
        let mut sim = SimCard::new(subscriber.credit, subscriber.number.as_str());
        sim.set_active(subscriber.active);
        let id = self.switchboard.register(
            Position::new(subscriber.x, subscriber.y),
            sim,
            subscriber.battery,
        );
        self.devices.push(id);
        id
    }

    pub fn oracle(&self) -> &InvariantOracle {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut InvariantOracle {
        &mut self.oracle
    }

    pub fn metrics(&self) -> &ScenarioMetrics {
        &self.metrics
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        1.0 / self.config.tick_rate_hz as f64
    }

    /// Places a call, recording the outcome and checking that a rejection
    /// mutated nothing.
    pub fn call(&mut self, caller: DeviceId, receiver: DeviceId) -> Result<CallSetup, SwitchboardError> {
        self.metrics.calls_attempted += 1;
        let before = Observation::capture(&self.switchboard, &[caller, receiver]);
        let result = self.switchboard.call(caller, receiver);

        match &result {
            Ok(setup) => {
                self.metrics.calls_connected += 1;
                self.emit(setup.code(), setup.to_string());
            }
            Err(SwitchboardError::Rejected(rejection)) => {
                *self.metrics.rejections.entry(rejection.code().to_string()).or_default() += 1;
                let after = Observation::capture(&self.switchboard, &[caller, receiver]);
                self.oracle.check_rejection(self.tick_count, rejection, &before, &after);
                self.emit(rejection.code(), rejection.to_string());
            }
            Err(e) => self.emit("error", e.to_string()),
        }

        self.audit();
        result
    }

    /// Hangs up whatever call `id` is in.
    pub fn end_call(&mut self, id: DeviceId) -> Result<Option<CallTeardown>, SwitchboardError> {
        let result = self.switchboard.end_call(id);
        if let Ok(Some(teardown)) = &result {
            self.metrics.hangups += 1;
            self.emit(teardown.cause.code(), teardown.to_string());
        }
        self.audit();
        result
    }

    /// Moves `id` to `(x, y)`.
    pub fn move_to(&mut self, id: DeviceId, x: f64, y: f64) -> Result<MoveOutcome, SwitchboardError> {
        let result = self.switchboard.move_device(id, x, y);
        match &result {
            Ok(outcome) => {
                self.metrics.moves += 1;
                match outcome {
                    MoveOutcome::ConnectionLost(teardown) => {
                        self.metrics.forced_drops += 1;
                        self.emit(teardown.cause.code(), teardown.to_string());
                    }
                    MoveOutcome::HandedOver { from, to } => {
                        self.metrics.handovers += 1;
                        self.emit("handover", format!("{} handed over from {} to {}", id, from, to));
                    }
                    MoveOutcome::Served { .. } | MoveOutcome::NoCoverage => {}
                }
            }
            Err(e) => self.emit("error", e.to_string()),
        }
        self.audit();
        result
    }

    /// One random-walk tick: every phone takes a step, then idle phones may
    /// dial and phones in a call may hang up.
    pub fn tick(&mut self) {
        let ids = self.devices.clone();
        let lo = -self.config.antenna_radius.max(0.0);
        let hi = self.config.arena_size.max(0.0) - lo;

        for &id in &ids {
            let Some(pos) = self.switchboard.device(id).map(|d| d.position()) else {
                continue;
            };
            let x = (pos.x + self.step.sample(&mut self.rng)).clamp(lo, hi);
            let y = (pos.y + self.step.sample(&mut self.rng)).clamp(lo, hi);
            // Outcomes are recorded by the world itself
            let _ = self.move_to(id, x, y);
        }

        for (i, &id) in ids.iter().enumerate() {
            let Some(in_call) = self.switchboard.device(id).map(|d| d.is_in_call()) else {
                continue;
            };
            if in_call {
                if self.rng.gen_bool(self.config.hangup_probability) {
                    let _ = self.end_call(id);
                }
            } else if ids.len() > 1 && self.rng.gen_bool(self.config.call_probability) {
                let mut j = self.rng.gen_range(0..ids.len() - 1);
                if j >= i {
                    j += 1;
                }
                let _ = self.call(id, ids[j]);
            }
        }

        self.advance();
    }

    /// Runs random-walk ticks until the configured duration is reached.
    pub fn run(&mut self) {
        let target_ticks = (self.config.max_duration_secs * self.config.tick_rate_hz as f64) as u64;
        while self.tick_count < target_ticks {
            self.tick();
            if self.tick_count % self.config.tick_rate_hz as u64 == 0 {
                debug!(
                    "  t={:.1}s | calls={} | active_slots={}",
                    self.time,
                    self.metrics.calls_connected,
                    self.switchboard.network().total_active_calls()
                );
            }
        }
    }

    /// Advances the clock by one tick and records a frame when exporting.
    pub fn advance(&mut self) {
        self.tick_count += 1;
        self.time += self.dt();
        if self.export.is_some() {
            let frame = self.frame();
            if let Some(export) = self.export.as_mut() {
                export.add_frame(frame);
            }
        }
    }

    /// Starts recording frames under `scenario`.
    pub fn enable_export(&mut self, scenario: &str) {
        let mut export = SimExport::new(scenario, self.config.seed);
        export.add_frame(self.frame());
        self.export = Some(export);
    }

    pub fn take_export(&mut self) -> Option<SimExport> {
        self.export.take()
    }

    /// Captures the current state together with events since the last frame.
    pub fn frame(&mut self) -> SimFrame {
        let events = self.events[self.frame_cursor..].to_vec();
        self.frame_cursor = self.events.len();
        SimFrame {
            tick: self.tick_count,
            time_sec: self.time,
            devices: self.switchboard.snapshot(),
            antennas: self.switchboard.network().snapshot(),
            events,
        }
    }

    fn emit(&mut self, code: &str, message: String) {
        debug!("[tick {}] {}: {}", self.tick_count, code, message);
        self.events.push(SimEvent::new(self.tick_count, code, message));
    }

    fn audit(&mut self) {
        self.oracle.audit_switchboard(self.tick_count, &self.switchboard);
        self.metrics.invariant_checks = self.oracle.checks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_config(seed: u64) -> SimConfig {
        SimConfig {
            seed,
            num_devices: 12,
            max_duration_secs: 5.0,
            call_probability: 0.3,
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_grid_is_connected() {
        let plan = generate_plan(&SimConfig::default());
        assert_eq!(plan.antennas.len(), 25);
        assert_eq!(plan.subscribers.len(), 20);

        let built = plan.build();
        assert!(built.rejected.is_empty());
    }

    #[test]
    fn test_world_rejects_bad_config() {
        let bad_noise = SimConfig { movement_noise_std: -1.0, ..Default::default() };
        assert_eq!(SimWorld::new(bad_noise).err(), Some(WorldError::InvalidNoise(-1.0)));

        let nan_noise = SimConfig { movement_noise_std: f64::NAN, ..Default::default() };
        assert!(matches!(SimWorld::new(nan_noise), Err(WorldError::InvalidNoise(_))));

        let still = SimConfig { movement_noise_std: 0.0, ..Default::default() };
        assert!(SimWorld::new(still).is_ok());

        let bad_p = SimConfig { call_probability: 1.5, ..Default::default() };
        assert!(matches!(SimWorld::new(bad_p), Err(WorldError::InvalidProbability { .. })));

        let bad_rate = SimConfig { tick_rate_hz: 0, ..Default::default() };
        assert_eq!(SimWorld::new(bad_rate).err(), Some(WorldError::InvalidTickRate));
    }

    #[test]
    fn test_random_walk_keeps_invariants() {
        let mut world = SimWorld::new(small_config(7)).unwrap();
        world.run();

        assert_eq!(world.tick_count(), 50);
        assert!(world.metrics().calls_attempted > 0);
        assert!(world.oracle().is_clean(), "{:?}", world.oracle().violations());
    }

    #[test]
    fn test_same_seed_same_history() {
        let mut a = SimWorld::new(small_config(99)).unwrap();
        let mut b = SimWorld::new(small_config(99)).unwrap();
        a.run();
        b.run();

        assert_eq!(a.events(), b.events());
        assert_eq!(a.switchboard().snapshot(), b.switchboard().snapshot());
    }

    #[test]
    fn test_export_collects_one_frame_per_tick() {
        let mut world = SimWorld::new(small_config(3)).unwrap();
        world.enable_export("random_walk");
        for _ in 0..10 {
            world.tick();
        }

        let export = world.take_export().unwrap();
        assert_eq!(export.frames.len(), 11);
        assert_eq!(export.event_count(), world.events().len());
    }

    #[test]
    fn test_rejected_call_is_counted_by_code() {
        let mut world = SimWorld::from_plan(SimConfig::default(), &NetworkPlan::reference()).unwrap();
        let (p1, p4) = (world.devices()[0], world.devices()[3]);

        let err = world.call(p4, p1).unwrap_err();
        assert_eq!(err.rejection().map(|r| r.code()), Some("insufficient-credit"));
        assert_eq!(world.metrics().rejections.get("insufficient-credit"), Some(&1));
        assert_eq!(world.events().last().map(|e| e.code.as_str()), Some("insufficient-credit"));
        assert!(world.oracle().is_clean());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_random_walk_never_breaks_invariants(seed in any::<u64>(), transfer in any::<bool>()) {
            let handover = if transfer { HandoverPolicy::Transfer } else { HandoverPolicy::Legacy };
            let config = SimConfig {
                handover,
                max_duration_secs: 2.0,
                call_probability: 0.4,
                ..small_config(seed)
            };
            let mut world = SimWorld::new(config).unwrap();
            world.run();

            prop_assert!(world.oracle().is_clean(), "{:?}", world.oracle().violations());
            let slots = world.switchboard().network().total_active_calls();
            let capacity: u64 = world.switchboard().network().antennas().map(|a| a.capacity() as u64).sum();
            prop_assert!(slots <= capacity);
        }
    }
}

//! Scenario runner - executes scripted and randomized call scenarios.

use crate::exporter::{SimExport, SimFrame};
use crate::oracle::InvariantOracle;
use crate::plan::{AntennaPlan, NetworkPlan, SubscriberPlan};
use crate::scenarios::ScenarioId;
use crate::world::{generate_plan, movement_step, SimConfig, SimWorld, WorldError};

use cellnet_core::{
    AntennaId, CallSetup, DeviceId, Exchange, HandoverPolicy, MoveOutcome, Party, Position, SimCard,
    SwitchboardError,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Number of registered phones at the end
    pub final_device_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Recorded frames, when the runner was built with [`ScenarioRunner::with_export`]
    pub export: Option<SimExport>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    pub calls_attempted: u64,
    pub calls_connected: u64,

    /// Rejected calls by reason code
    pub rejections: BTreeMap<String, u64>,

    pub hangups: u64,

    /// Calls torn down because a participant lost coverage
    pub forced_drops: u64,

    pub handovers: u64,
    pub moves: u64,
    pub invariant_checks: u64,
}

impl ScenarioMetrics {
    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: &ScenarioMetrics) {
        self.calls_attempted += other.calls_attempted;
        self.calls_connected += other.calls_connected;
        for (code, n) in &other.rejections {
            *self.rejections.entry(code.clone()).or_default() += n;
        }
        self.hangups += other.hangups;
        self.forced_drops += other.forced_drops;
        self.handovers += other.handovers;
        self.moves += other.moves;
        self.invariant_checks += other.invariant_checks;
    }

    pub fn total_rejections(&self) -> u64 {
        self.rejections.values().sum()
    }
}

/// Runs call scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of phones in randomized scenarios
    num_devices: usize,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    handover: HandoverPolicy,

    /// Network for randomized scenarios instead of the generated grid
    plan: Option<NetworkPlan>,

    /// Record frames for export
    record: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_devices: usize) -> Self {
        Self {
            seed,
            num_devices,
            tick_rate_hz: 10,
            max_duration_secs: 30.0,
            handover: HandoverPolicy::Legacy,
            plan: None,
            record: false,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets the handover policy for scripted scenarios and the generated grid.
    pub fn with_handover(mut self, handover: HandoverPolicy) -> Self {
        self.handover = handover;
        self
    }

    /// Runs randomized scenarios over `plan` instead of a generated grid.
    pub fn with_plan(mut self, plan: NetworkPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Records frames into [`ScenarioResult::export`].
    pub fn with_export(mut self) -> Self {
        self.record = true;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let world = match scenario {
            ScenarioId::ReferenceTour => self.run_reference_tour(),
            ScenarioId::BasicCall => self.run_basic_call(),
            ScenarioId::InsufficientCredit => self.run_insufficient_credit(),
            ScenarioId::LowBattery => self.run_low_battery(),
            ScenarioId::CoverageLoss => self.run_coverage_loss(),
            ScenarioId::CapacityExhaustion => self.run_capacity_exhaustion(),
            ScenarioId::IsolatedAntenna => self.run_isolated_antenna(),
            ScenarioId::RandomWalk => self.run_random_walk(),
            ScenarioId::RushHour => return self.run_rush_hour(),
        };

        match world {
            Ok(world) => self.finish(scenario, world),
            Err(e) => self.failed(scenario, e.to_string()),
        }
    }

    /// The two-antenna town, stepped through every call outcome in turn.
    fn run_reference_tour(&self) -> Result<SimWorld, WorldError> {
        let mut world = self.scripted_world(ScenarioId::ReferenceTour, NetworkPlan::reference())?;
        let d = world.devices().to_vec();
        let (p1, p2, p3, p4, p5) = (d[0], d[1], d[2], d[3], d[4]);

        expect_call(&mut world, "p1 calls p2", p1, p2, "success");
        expect_credit(&mut world, "p1 after first call", p1, 6.0);
        expect_loads(&mut world, "p1 and p2 share antenna 0", &[2, 0]);

        expect_call(&mut world, "p3 calls busy p2", p3, p2, "already-in-call");

        expect_move(&mut world, "p1 walks away", p1, 43.0, 7.0, true);
        expect_idle(&mut world, "after connection loss", &[p1, p2]);
        expect_loads(&mut world, "after connection loss", &[0, 0]);

        expect_call(&mut world, "p4 calls p1", p4, p1, "insufficient-credit");
        expect_call(&mut world, "p5 calls p2", p5, p2, "battery-too-low");
        expect_call(&mut world, "p1 calls p3 out of coverage", p1, p3, "no-network-at-origin");

        expect_move(&mut world, "p1 returns", p1, 20.0, 0.0, false);
        expect_serving(&mut world, "p1 back in town", p1, Some(AntennaId(1)));

        expect_call(&mut world, "p1 calls p3", p1, p3, "success");
        expect_credit(&mut world, "p1 after second call", p1, 2.0);
        expect_hangup(&mut world, "p1 hangs up", p1, true);
        expect_loads(&mut world, "after hang-up", &[0, 0]);

        // An inactive SIM does not stop a phone from answering
        set_sim_active(&mut world, p2, false);
        expect_call(&mut world, "p3 calls p2 with inactive SIM", p3, p2, "success");
        set_sim_active(&mut world, p2, true);

        if let Ok(sim) = world.switchboard_mut().sim_mut(p4) {
            sim.add_credit(10.0);
        }
        expect_credit(&mut world, "p4 after top-up", p4, 13.0);
        expect_call(&mut world, "p4 calls busy p2", p4, p2, "already-in-call");
        expect_hangup(&mut world, "idle p4 hangs up", p4, false);

        let extras: Vec<DeviceId> = (6..=15)
            .map(|i| {
                let plan = SubscriberPlan::new(format!("0555{:06}", i), 50.0, 1.0 + 0.1 * i as f64, 1.0, 100.0);
                world.add_subscriber(&plan)
            })
            .collect();
        for (n, &extra) in extras.iter().take(8).enumerate() {
            expect_call(&mut world, &format!("extra #{} calls busy p2", n), extra, p2, "already-in-call");
        }

        // Fill antenna 0: four calls, eight slots
        expect_hangup(&mut world, "p3 hangs up", p3, true);
        for pair in extras[..8].chunks(2) {
            expect_call(&mut world, "extras pair up", pair[0], pair[1], "success");
        }
        expect_loads(&mut world, "antenna 0 full", &[8, 0]);
        expect_call(&mut world, "extra calls with antenna 0 full", extras[8], extras[9], "no-network-at-origin");

        Ok(world)
    }

    fn run_basic_call(&self) -> Result<SimWorld, WorldError> {
        let mut world = self.scripted_world(ScenarioId::BasicCall, two_cell_plan(vec![
            SubscriberPlan::new("0555000011", 10.0, 1.0, 1.0, 63.0),
            SubscriberPlan::new("0555000022", 5.0, 16.0, 0.0, 98.0),
        ]))?;
        let (caller, receiver) = (world.devices()[0], world.devices()[1]);

        expect_call(&mut world, "caller dials", caller, receiver, "success");
        expect_credit(&mut world, "caller pays", caller, 6.0);
        expect_credit(&mut world, "receiver does not pay", receiver, 5.0);
        expect_loads(&mut world, "one slot per side", &[1, 1]);

        expect_hangup(&mut world, "receiver hangs up", receiver, true);
        expect_hangup(&mut world, "second hang-up", caller, false);
        expect_idle(&mut world, "after hang-up", &[caller, receiver]);
        expect_loads(&mut world, "after hang-up", &[0, 0]);

        Ok(world)
    }

    fn run_insufficient_credit(&self) -> Result<SimWorld, WorldError> {
        let mut world = self.scripted_world(ScenarioId::InsufficientCredit, two_cell_plan(vec![
            SubscriberPlan::new("0555000011", 3.0, 1.0, 1.0, 63.0),
            SubscriberPlan::new("0555000022", 5.0, 2.0, 2.0, 98.0),
        ]))?;
        let (caller, receiver) = (world.devices()[0], world.devices()[1]);

        expect_call(&mut world, "caller with credit 3", caller, receiver, "insufficient-credit");
        expect_credit(&mut world, "caller keeps credit", caller, 3.0);
        expect_idle(&mut world, "after rejection", &[caller, receiver]);
        expect_loads(&mut world, "after rejection", &[0, 0]);

        Ok(world)
    }

    fn run_low_battery(&self) -> Result<SimWorld, WorldError> {
        let mut world = self.scripted_world(ScenarioId::LowBattery, two_cell_plan(vec![
            SubscriberPlan::new("0555000011", 10.0, 1.0, 1.0, 63.0),
            SubscriberPlan::new("0555000022", 5.0, 2.0, 2.0, 3.0),
        ]))?;
        let (caller, receiver) = (world.devices()[0], world.devices()[1]);

        let result = world.call(caller, receiver);
        world.advance();
        let party = result.as_ref().err().and_then(|e| e.rejection()).and_then(|r| r.party());
        world
            .oracle_mut()
            .check(party == Some(Party::Receiver), || format!("expected receiver rejection, got {:?}", result));

        expect_credit(&mut world, "caller untouched", caller, 10.0);
        expect_idle(&mut world, "after rejection", &[caller, receiver]);

        Ok(world)
    }

    fn run_coverage_loss(&self) -> Result<SimWorld, WorldError> {
        let mut world = self.scripted_world(ScenarioId::CoverageLoss, two_cell_plan(vec![
            SubscriberPlan::new("0555000011", 10.0, 1.0, 1.0, 63.0),
            SubscriberPlan::new("0555000022", 5.0, 16.0, 0.0, 98.0),
        ]))?;
        let (caller, receiver) = (world.devices()[0], world.devices()[1]);

        expect_call(&mut world, "caller dials", caller, receiver, "success");
        expect_loads(&mut world, "call up", &[1, 1]);

        expect_move(&mut world, "caller walks out", caller, 43.0, 7.0, true);
        expect_idle(&mut world, "after drop", &[caller, receiver]);
        expect_loads(&mut world, "both antennas released", &[0, 0]);
        expect_serving(&mut world, "caller out of coverage", caller, None);

        Ok(world)
    }

    fn run_capacity_exhaustion(&self) -> Result<SimWorld, WorldError> {
        let plan = NetworkPlan {
            antennas: vec![AntennaPlan { x: 0.0, y: 0.0, radius: 10.0, capacity: 2 }],
            subscribers: (1..=4)
                .map(|i| SubscriberPlan::new(format!("0555{:06}", i), 10.0, i as f64, i as f64, 80.0))
                .collect(),
            ..Default::default()
        };
        let mut world = self.scripted_world(ScenarioId::CapacityExhaustion, plan)?;
        let d = world.devices().to_vec();

        expect_call(&mut world, "first call", d[0], d[1], "success");
        expect_loads(&mut world, "antenna full", &[2]);
        expect_call(&mut world, "second call on full antenna", d[2], d[3], "no-network-at-origin");
        expect_credit(&mut world, "refused caller keeps credit", d[2], 10.0);
        expect_loads(&mut world, "still full", &[2]);

        expect_hangup(&mut world, "first call ends", d[0], true);
        expect_call(&mut world, "second call after release", d[2], d[3], "success");

        Ok(world)
    }

    fn run_isolated_antenna(&self) -> Result<SimWorld, WorldError> {
        let plan = NetworkPlan {
            antennas: vec![
                AntennaPlan { x: 0.0, y: 0.0, radius: 10.0, capacity: 4 },
                // Tangent to the first
                AntennaPlan { x: 20.0, y: 0.0, radius: 10.0, capacity: 4 },
                AntennaPlan { x: 100.0, y: 100.0, radius: 5.0, capacity: 4 },
            ],
            subscribers: vec![
                SubscriberPlan::new("0555000011", 10.0, 1.0, 1.0, 80.0),
                SubscriberPlan::new("0555000022", 10.0, 100.0, 100.0, 80.0),
            ],
            ..Default::default()
        };
        let mut world = self.scripted_world(ScenarioId::IsolatedAntenna, plan)?;
        let (near, far) = (world.devices()[0], world.devices()[1]);

        let antennas = world.switchboard().network().len();
        let refused = world.events().iter().filter(|e| e.code == "antenna-rejected").count();
        world.oracle_mut().check(antennas == 2 && refused == 1, || {
            format!("expected 2 antennas and 1 refusal, got {} and {}", antennas, refused)
        });

        expect_serving(&mut world, "far phone", far, None);
        expect_call(&mut world, "far phone dials", far, near, "no-network-at-origin");
        expect_call(&mut world, "near phone dials far", near, far, "receiver-unavailable");

        Ok(world)
    }

    fn run_random_walk(&self) -> Result<SimWorld, WorldError> {
        let config = self.config();
        let mut world = match &self.plan {
            Some(plan) => SimWorld::from_plan(config, plan)?,
            None => SimWorld::new(config)?,
        };
        if self.record {
            world.enable_export(ScenarioId::RandomWalk.name());
        }

        world.run();

        let devices = world.devices().len();
        let attempted = world.metrics().calls_attempted;
        world
            .oracle_mut()
            .check(devices < 2 || attempted > 0, || "no call was attempted".to_string());

        Ok(world)
    }

    /// One task per phone, all dialing, hanging up and moving at once on a
    /// multi-thread runtime while a monitor task audits the exchange.
    fn run_rush_hour(&self) -> ScenarioResult {
        let scenario = ScenarioId::RushHour;
        let config = self.config();
        let plan = self.plan.clone().unwrap_or_else(|| generate_plan(&config));

        let (network, rejected) = plan.build_network();
        for r in &rejected {
            warn!("Plan antenna #{} rejected: {}", r.index, r.error);
        }
        let exchange = Exchange::shared(network, plan.policy);
        for s in &plan.subscribers {
            let mut sim = SimCard::new(s.credit, s.number.as_str());
            sim.set_active(s.active);
            exchange.register(Position::new(s.x, s.y), sim, s.battery);
        }
        let ids = exchange.device_ids();

        let step = match movement_step(config.movement_noise_std) {
            Ok(step) => step,
            Err(e) => return self.failed(scenario, e.to_string()),
        };
        let ops = (self.max_duration_secs * self.tick_rate_hz as f64).max(1.0) as u64;
        let bounds = (-config.antenna_radius, config.arena_size + config.antenna_radius);

        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => return self.failed(scenario, format!("Failed to start runtime: {}", e)),
        };

        let (mut metrics, mut oracle, task_failure) = runtime.block_on(async {
            let done = Arc::new(AtomicBool::new(false));

            let monitor = {
                let exchange = Arc::clone(&exchange);
                let done = Arc::clone(&done);
                tokio::spawn(async move {
                    let mut oracle = InvariantOracle::new();
                    let mut round = 0;
                    while !done.load(Ordering::Acquire) {
                        oracle.audit_exchange(round, &exchange);
                        round += 1;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    oracle
                })
            };

            let tasks: Vec<_> = ids
                .iter()
                .enumerate()
                .map(|(index, &id)| {
                    let storm = Storm {
                        exchange: Arc::clone(&exchange),
                        id,
                        index,
                        peers: ids.clone(),
                        seed: self.seed.wrapping_add(index as u64).wrapping_mul(0x9e3779b97f4a7c15),
                        ops,
                        step,
                        bounds,
                    };
                    tokio::spawn(storm.run())
                })
                .collect();

            let mut metrics = ScenarioMetrics::default();
            let mut failure = None;
            for task in tasks {
                match task.await {
                    Ok(m) => metrics.merge(&m),
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(format!("Storm task failed: {}", e));
                        }
                    }
                }
            }

            done.store(true, Ordering::Release);
            let oracle = match monitor.await {
                Ok(oracle) => oracle,
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(format!("Monitor task failed: {}", e));
                    }
                    InvariantOracle::new()
                }
            };
            (metrics, oracle, failure)
        });

        oracle.audit_exchange(ops, &exchange);
        metrics.invariant_checks = oracle.checks();
        debug!(
            "Rush hour: {} calls attempted, {} connected, {} audits",
            metrics.calls_attempted, metrics.calls_connected, metrics.invariant_checks
        );

        let failure_reason = task_failure.or_else(|| oracle.first_violation().map(str::to_string));
        let passed = failure_reason.is_none();

        let export = self.record.then(|| {
            let mut export = SimExport::new(scenario.name(), self.seed);
            export.add_frame(SimFrame {
                tick: ops,
                time_sec: self.max_duration_secs,
                devices: exchange.snapshot(),
                antennas: exchange.network().snapshot(),
                events: Vec::new(),
            });
            export.finalize(passed, failure_reason.clone());
            export
        });

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: ops,
            final_time_secs: self.max_duration_secs,
            final_device_count: ids.len(),
            failure_reason,
            metrics,
            export,
        }
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            num_devices: self.num_devices,
            tick_rate_hz: self.tick_rate_hz,
            max_duration_secs: self.max_duration_secs,
            handover: self.handover,
            ..Default::default()
        }
    }

    fn scripted_world(&self, scenario: ScenarioId, mut plan: NetworkPlan) -> Result<SimWorld, WorldError> {
        plan.policy.handover = self.handover;
        let mut world = SimWorld::from_plan(self.config(), &plan)?;
        if self.record {
            world.enable_export(scenario.name());
        }
        Ok(world)
    }

    fn finish(&self, scenario: ScenarioId, mut world: SimWorld) -> ScenarioResult {
        let failure_reason = world.oracle().first_violation().map(str::to_string);
        let passed = failure_reason.is_none();
        let export = world.take_export().map(|mut export| {
            export.finalize(passed, failure_reason.clone());
            export
        });

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            final_device_count: world.devices().len(),
            failure_reason,
            metrics: world.metrics().clone(),
            export,
        }
    }

    fn failed(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_device_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            export: None,
        }
    }
}

/// One phone's share of the rush-hour storm.
struct Storm {
    exchange: Arc<Exchange>,
    id: DeviceId,
    index: usize,
    peers: Vec<DeviceId>,
    seed: u64,
    ops: u64,
    step: Normal<f64>,
    bounds: (f64, f64),
}

impl Storm {
    async fn run(self) -> ScenarioMetrics {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut metrics = ScenarioMetrics::default();
        let (lo, hi) = self.bounds;

        for _ in 0..self.ops {
            match rng.gen_range(0..10) {
                0..=4 if self.peers.len() > 1 => {
                    let mut j = rng.gen_range(0..self.peers.len() - 1);
                    if j >= self.index {
                        j += 1;
                    }
                    metrics.calls_attempted += 1;
                    match self.exchange.call(self.id, self.peers[j]) {
                        Ok(_) => metrics.calls_connected += 1,
                        Err(e) => {
                            if let Some(r) = e.rejection() {
                                *metrics.rejections.entry(r.code().to_string()).or_default() += 1;
                            }
                        }
                    }
                }
                5..=6 => {
                    if let Ok(Some(_)) = self.exchange.end_call(self.id) {
                        metrics.hangups += 1;
                    }
                }
                _ => {
                    if let Ok(pos) = self.exchange.with_device(self.id, |d| d.position()) {
                        let x = (pos.x + self.step.sample(&mut rng)).clamp(lo, hi);
                        let y = (pos.y + self.step.sample(&mut rng)).clamp(lo, hi);
                        if let Ok(outcome) = self.exchange.move_device(self.id, x, y) {
                            metrics.moves += 1;
                            match outcome {
                                MoveOutcome::ConnectionLost(_) => metrics.forced_drops += 1,
                                MoveOutcome::HandedOver { .. } => metrics.handovers += 1,
                                MoveOutcome::Served { .. } | MoveOutcome::NoCoverage => {}
                            }
                        }
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        metrics
    }
}

/// Antennas (0,0) r10 cap 8 and (15,0) r10 cap 10 with the given roster.
fn two_cell_plan(subscribers: Vec<SubscriberPlan>) -> NetworkPlan {
    NetworkPlan {
        subscribers,
        ..NetworkPlan::reference()
    }
}

fn outcome_code(result: &Result<CallSetup, SwitchboardError>) -> &'static str {
    match result {
        Ok(setup) => setup.code(),
        Err(SwitchboardError::Rejected(rejection)) => rejection.code(),
        Err(_) => "error",
    }
}

fn expect_call(world: &mut SimWorld, label: &str, caller: DeviceId, receiver: DeviceId, expected: &str) -> bool {
    let result = world.call(caller, receiver);
    world.advance();
    let code = outcome_code(&result);
    world
        .oracle_mut()
        .check(code == expected, || format!("{}: expected {}, got {}", label, expected, code))
}

fn expect_hangup(world: &mut SimWorld, label: &str, id: DeviceId, was_in_call: bool) -> bool {
    let ended = matches!(world.end_call(id), Ok(Some(_)));
    world.advance();
    world.oracle_mut().check(ended == was_in_call, || {
        format!("{}: expected a call to end: {}, got {}", label, was_in_call, ended)
    })
}

fn expect_move(world: &mut SimWorld, label: &str, id: DeviceId, x: f64, y: f64, drops: bool) -> bool {
    let lost = world.move_to(id, x, y).map(|o| o.is_connection_lost()).unwrap_or(false);
    world.advance();
    world
        .oracle_mut()
        .check(lost == drops, || format!("{}: expected connection lost: {}, got {}", label, drops, lost))
}

fn expect_loads(world: &mut SimWorld, label: &str, expected: &[u32]) -> bool {
    let loads: Vec<u32> = world.switchboard().network().antennas().map(|a| a.active_calls()).collect();
    world
        .oracle_mut()
        .check(loads == expected, || format!("{}: antenna loads {:?}, expected {:?}", label, loads, expected))
}

fn expect_credit(world: &mut SimWorld, label: &str, id: DeviceId, expected: f64) -> bool {
    let credit = world.switchboard().device(id).map(|d| d.sim().credit());
    let ok = credit.is_some_and(|c| (c - expected).abs() < 1e-9);
    world
        .oracle_mut()
        .check(ok, || format!("{}: credit {:?}, expected {}", label, credit, expected))
}

fn expect_idle(world: &mut SimWorld, label: &str, ids: &[DeviceId]) -> bool {
    let busy: Vec<DeviceId> = ids
        .iter()
        .copied()
        .filter(|id| world.switchboard().device(*id).map_or(true, |d| d.is_in_call()))
        .collect();
    world
        .oracle_mut()
        .check(busy.is_empty(), || format!("{}: still in a call: {:?}", label, busy))
}

fn expect_serving(world: &mut SimWorld, label: &str, id: DeviceId, expected: Option<AntennaId>) -> bool {
    let serving = world.switchboard().device(id).and_then(|d| d.connected_antenna());
    world
        .oracle_mut()
        .check(serving == expected, || format!("{}: serving {:?}, expected {:?}", label, serving, expected))
}

fn set_sim_active(world: &mut SimWorld, id: DeviceId, active: bool) {
    if let Ok(sim) = world.switchboard_mut().sim_mut(id) {
        sim.set_active(active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42, 12).with_duration(2.0)
    }

    fn assert_passes(result: &ScenarioResult) {
        assert!(result.passed, "{} failed: {:?}", result.scenario, result.failure_reason);
    }

    #[test]
    fn test_reference_tour_scenario() {
        let result = runner().run(ScenarioId::ReferenceTour);

        assert_passes(&result);
        assert_eq!(result.final_device_count, 15);
        assert_eq!(result.metrics.forced_drops, 1);
        assert_eq!(result.metrics.rejections.get("already-in-call"), Some(&10));
        assert_eq!(result.metrics.rejections.get("no-network-at-origin"), Some(&2));
    }

    #[test]
    fn test_reference_tour_under_transfer() {
        let result = runner().with_handover(HandoverPolicy::Transfer).run(ScenarioId::ReferenceTour);
        assert_passes(&result);
    }

    #[test]
    fn test_scripted_scenarios_pass() {
        for scenario in [
            ScenarioId::BasicCall,
            ScenarioId::InsufficientCredit,
            ScenarioId::LowBattery,
            ScenarioId::CoverageLoss,
            ScenarioId::CapacityExhaustion,
            ScenarioId::IsolatedAntenna,
        ] {
            let result = runner().run(scenario);
            assert_passes(&result);
            assert!(result.metrics.invariant_checks > 0);
        }
    }

    #[test]
    fn test_random_walk_scenario() {
        let result = runner().run(ScenarioId::RandomWalk);

        assert_passes(&result);
        assert_eq!(result.total_ticks, 20);
        assert!(result.metrics.moves > 0);
    }

    #[test]
    fn test_random_walk_deterministic() {
        let a = ScenarioRunner::new(7, 15).with_duration(3.0).run(ScenarioId::RandomWalk);
        let b = ScenarioRunner::new(7, 15).with_duration(3.0).run(ScenarioId::RandomWalk);

        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_random_walk_over_plan() {
        let result = runner().with_plan(NetworkPlan::reference()).run(ScenarioId::RandomWalk);

        assert_passes(&result);
        assert_eq!(result.final_device_count, 5);
    }

    #[test]
    fn test_rush_hour_scenario() {
        let result = ScenarioRunner::new(42, 16).with_duration(1.0).run(ScenarioId::RushHour);

        assert_passes(&result);
        assert!(result.metrics.calls_attempted > 0);
        assert!(result.metrics.invariant_checks > 0);
    }

    #[test]
    fn test_rush_hour_over_plan_with_refused_antenna() {
        let mut plan = NetworkPlan::reference();
        plan.antennas.push(AntennaPlan { x: 100.0, y: 100.0, radius: 5.0, capacity: 4 });

        let result = ScenarioRunner::new(7, 5).with_duration(0.5).with_plan(plan).run(ScenarioId::RushHour);
        assert_passes(&result);
        assert_eq!(result.final_device_count, 5);
    }

    #[test]
    fn test_export_is_recorded_on_request() {
        let result = runner().run(ScenarioId::BasicCall);
        assert!(result.export.is_none());

        let result = runner().with_export().run(ScenarioId::BasicCall);
        let export = result.export.unwrap();
        assert!(export.passed);
        assert_eq!(export.frames.len() as u64, result.total_ticks + 1);
        assert!(export.frames.iter().any(|f| f.events.iter().any(|e| e.code == "success")));
    }

    #[test]
    fn test_bad_tick_rate_fails_cleanly() {
        let result = runner().with_tick_rate(0).run(ScenarioId::BasicCall);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("Tick rate"));
    }

    #[test]
    fn test_metrics_merge() {
        let mut a = ScenarioMetrics { calls_attempted: 2, ..Default::default() };
        a.rejections.insert("self-call".into(), 1);
        let mut b = ScenarioMetrics { calls_attempted: 3, hangups: 1, ..Default::default() };
        b.rejections.insert("self-call".into(), 2);

        a.merge(&b);
        assert_eq!(a.calls_attempted, 5);
        assert_eq!(a.hangups, 1);
        assert_eq!(a.total_rejections(), 3);
    }
}

//! CellNet simulator CLI
//!
//! Run scripted and randomized call scenarios against the network model.

use cellnet_sim::scenarios::ScenarioId;
use cellnet_sim::{NetworkPlan, ScenarioResult, ScenarioRunner};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// CellNet simulation CLI
#[derive(Parser, Debug)]
#[command(name = "cellnet-sim")]
#[command(about = "Run deterministic call-model simulations for CellNet", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of phones in randomized scenarios
    #[arg(short = 'n', long, default_value = "20")]
    devices: usize,

    /// Scenario to run (reference_tour, basic_call, random_walk, rush_hour, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration of randomized scenarios in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export recorded frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Network plan (JSON) for randomized scenarios
    #[arg(long)]
    plan: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    if !args.json {
        info!("CellNet Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        })]
    };

    let plan = args.plan.as_ref().map(|path| {
        NetworkPlan::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error: {}: {}", path, e);
            std::process::exit(1);
        })
    });

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let build_runner = |seed: u64| {
        let runner = ScenarioRunner::new(seed, args.devices).with_duration(args.duration);
        match &plan {
            Some(plan) => runner.with_plan(plan.clone()),
            None => runner,
        }
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let result = build_runner(base_seed).with_export().run(scenarios[0]);

        match &result.export {
            Some(export) => match export.write_to_file(export_path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), export_path),
                Err(e) => {
                    eprintln!("Error: failed to write export: {}", e);
                    std::process::exit(1);
                }
            },
            None => error!("Scenario {} produced no frames", scenarios[0].name()),
        }

        report(&result);
        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = build_runner(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "devices": r.final_device_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: failed to encode summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed_count > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED  calls={}/{} drops={} audits={}",
            result.scenario.name(),
            result.seed,
            result.metrics.calls_connected,
            result.metrics.calls_attempted,
            result.metrics.forced_drops,
            result.metrics.invariant_checks
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

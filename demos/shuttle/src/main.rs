//! shuttle — one vessel moving a stockpile between two sites.
//!
//! The vessel sails empty to the loading site, loads, sails full to the
//! dump site and unloads, until the dump site is full.  Logbooks and the
//! level trace are written as CSV to the directory given as the first
//! argument (default `output/shuttle`).
//!
//! Set `RUST_LOG=lsim_model=debug` to follow registrations.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lsim_core::{GeoPoint, SimConfig};
use lsim_engine::Environment;
use lsim_model::{
    ActivityBuilder, DelayPlugin, EntityBuilder, Expr, Loggable, MoveSpec, Phase, Processor, Rate,
    Registry, ShiftSpec, Speed, register_processes,
};
use lsim_output::{LevelObserver, LogbookCsvWriter, OutputWriter, snapshot_json, utilisation};

// ── Constants ─────────────────────────────────────────────────────────────────

const STOCKPILE:         f64 = 100.0;
const HOLD_CAPACITY:     f64 = 10.0;
const SECONDS_PER_UNIT:  f64 = 0.6;
const SAILING_DELAY_PCT: f64 = 10.0; // weather allowance on every sailing leg

const LOADING_SITE: GeoPoint = GeoPoint { x: 4.1859, y: 52.1814 };
const DUMP_SITE:    GeoPoint = GeoPoint { x: 4.2536, y: 52.1128 };

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output/shuttle"));

    println!("=== shuttle — lsim logistics model ===");
    println!("Stockpile: {STOCKPILE}  |  Hold: {HOLD_CAPACITY}");
    println!();

    // 1. Environment.
    let env = Environment::with_config(SimConfig::default())?;
    let registry = Registry::new();

    // 2. Sites and vessel.
    let from_site = EntityBuilder::new("from_site")
        .at(LOADING_SITE)
        .container(STOCKPILE, STOCKPILE)
        .resource(1)
        .build(&env)?;
    let to_site = EntityBuilder::new("to_site")
        .at(DUMP_SITE)
        .container(STOCKPILE, 0.0)
        .resource(1)
        .build(&env)?;
    let rate = Rate::Curve(Rc::new(|from: f64, to: f64| (to - from).abs() * SECONDS_PER_UNIT));
    let vessel = EntityBuilder::new("vessel")
        .at(LOADING_SITE)
        .container(HOLD_CAPACITY, 0.0)
        .resource(1)
        .speed(Speed::ContainerDependent { v_empty: 1.5, v_full: 1.0 })
        .processor(Processor::new(rate.clone(), rate))
        .build(&env)?;
    println!(
        "Sailing distance: {:.0} m",
        from_site.distance_to(&to_site)?
    );

    // 3. Activity tree.
    let delay = Rc::new(DelayPlugin::new(SAILING_DELAY_PCT)?);
    let sail_empty = ActivityBuilder::new(&env, &registry, "sailing empty")
        .additional_log(Rc::clone(&vessel))
        .plugin(0, delay.clone())
        .travel(MoveSpec::new(&vessel, &from_site))?;
    let load = ActivityBuilder::new(&env, &registry, "loading")
        .additional_log(Rc::clone(&vessel))
        .additional_log(Rc::clone(&from_site))
        .shift_amount(ShiftSpec::new(&vessel, &from_site, &vessel).phase(Phase::Loading))?;
    let sail_full = ActivityBuilder::new(&env, &registry, "sailing full")
        .additional_log(Rc::clone(&vessel))
        .plugin(0, delay)
        .travel(MoveSpec::new(&vessel, &to_site))?;
    let unload = ActivityBuilder::new(&env, &registry, "unloading")
        .additional_log(Rc::clone(&vessel))
        .additional_log(Rc::clone(&to_site))
        .shift_amount(ShiftSpec::new(&vessel, &vessel, &to_site).phase(Phase::Unloading))?;
    let cycle = ActivityBuilder::new(&env, &registry, "shuttle cycle")
        .while_(
            vec![sail_empty, load.clone(), sail_full, unload],
            Expr::full(&to_site),
            None,
        )?;
    register_processes(&[cycle.clone()])?;
    info!(activities = registry.len(), "model registered");

    // 4. Run with a level trace.
    std::fs::create_dir_all(&out_dir)?;
    let writer = LogbookCsvWriter::new(&out_dir)?;
    let entities = vec![Rc::clone(&from_site), Rc::clone(&to_site), Rc::clone(&vessel)];
    let mut obs = LevelObserver::new(writer, entities.clone());

    let t0 = Instant::now();
    env.run_observed(None, &mut obs)?;
    let elapsed = t0.elapsed();
    if let Some(e) = obs.take_error() {
        eprintln!("output error: {e}");
    }

    // 5. Logbooks.
    let mut writer = obs.into_writer();
    let mut rows = 0;
    for entity in &entities {
        rows += writer.write_logbook(entity.name(), entity.logbook())?;
    }
    rows += writer.write_logbook(cycle.name(), cycle.log())?;
    writer.finish()?;

    // 6. Summary.
    let (days, hours, minutes) = SimConfig::elapsed_dhm(env.now());
    println!("Run complete in {:.3} s ({} events)", elapsed.as_secs_f64(), env.steps());
    println!("Simulated time: {:.0} s ({days} d {hours} h {minutes} min)", env.now());
    println!("Trips: {}", load.log().spans().len());
    println!("logbook.csv: {rows} rows in {}", out_dir.display());
    println!();

    println!("{:<12} {:>8} {:>12}", "Object", "Spans", "Utilisation");
    println!("{}", "-".repeat(34));
    for entity in &entities {
        println!(
            "{:<12} {:>8} {:>11.1}%",
            entity.name(),
            entity.logbook().spans().len(),
            100.0 * utilisation(entity.logbook(), env.now()),
        );
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&snapshot_json(&entities))?);

    env.close();
    Ok(())
}

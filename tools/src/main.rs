//! power-sim: headless Monte Carlo runner for the power / type M / type S study.
//!
//! Usage:
//!   power-sim --config data/simulation.json --db results.db --panel-db nmmaps.db
//!   power-sim --config data/simulation.json --panel-json panel.json --run-id sweep-1
//!   power-sim --config data/simulation.json --synthetic-panel 20,1461 --threads 8
//!   power-sim --config data/simulation.json --illustration
//!
//! Rerunning with the same --db and --run-id resumes from the last checkpoint.

use anyhow::{bail, Context, Result};
use std::env;
use underpower_core::{
    config::SimConfig,
    driver::SimDriver,
    illustration::mad_scientist,
    panel::{self, Panel},
    store::SimStore,
    summary::{to_csv, SummaryRecord},
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config_path = string_arg(&args, "--config").unwrap_or("./data/simulation.json");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let run_id = string_arg(&args, "--run-id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("run-{}", uuid::Uuid::new_v4()));

    let mut config = SimConfig::load(config_path)?;
    if let Some(threads) = string_arg(&args, "--threads") {
        config.threads = Some(threads.parse().context("--threads expects a number")?);
        config.validate()?;
    }

    println!("power-sim");
    println!("  config:  {config_path}");
    println!("  db:      {db}");
    println!("  run_id:  {run_id}");
    println!("  seed:    {}", config.seed);
    println!();

    if args.iter().any(|a| a == "--illustration") {
        let summary = mad_scientist(&config.illustration, config.seed, config.significance_level)?;
        print_illustration(&summary);
        return Ok(());
    }

    let store = SimStore::open(db).with_context(|| format!("Failed to open {db}"))?;
    store.migrate()?;

    let panel = load_panel(&args, &store, config.seed)?;
    let driver = SimDriver::new(config, &panel, &store);
    let report = driver.run(&run_id)?;

    println!("=== RUN SUMMARY ===");
    println!("  run_id:     {}", report.run_id);
    println!("  resumed:    {}", report.resumed);
    println!("  completed:  {}", report.completed);
    println!("  skipped:    {}", report.skipped);
    println!("  dropped:    {}", report.failed);
    println!("  batches:    {}", report.batches);
    println!();
    print_summaries(&report.summaries);

    if let Some(path) = string_arg(&args, "--summary-json") {
        std::fs::write(path, serde_json::to_string_pretty(&report.summaries)?)
            .with_context(|| format!("Failed to write {path}"))?;
        log::info!("summaries written to {path}");
    }
    if let Some(path) = string_arg(&args, "--summary-csv") {
        std::fs::write(path, to_csv(&report.summaries))
            .with_context(|| format!("Failed to write {path}"))?;
        log::info!("summaries written to {path}");
    }
    Ok(())
}

fn load_panel(args: &[String], store: &SimStore, seed: u64) -> Result<Panel> {
    if let Some(path) = string_arg(args, "--panel-json") {
        return panel::load_json(path).with_context(|| format!("Failed to load panel {path}"));
    }
    if let Some(path) = string_arg(args, "--panel-db") {
        let source = SimStore::open(path).with_context(|| format!("Failed to open {path}"))?;
        source.migrate()?;
        return Ok(Panel::clean(source.load_raw_observations()?)?);
    }
    if let Some(spec) = string_arg(args, "--synthetic-panel") {
        let (cities, days) = spec
            .split_once(',')
            .context("--synthetic-panel expects CITIES,DAYS")?;
        return Ok(Panel::synthetic(cities.trim().parse()?, days.trim().parse()?, seed)?);
    }
    if store.raw_observation_count()? > 0 {
        return Ok(Panel::clean(store.load_raw_observations()?)?);
    }
    bail!("no panel: pass --panel-json, --panel-db or --synthetic-panel")
}

fn print_summaries(records: &[SummaryRecord]) {
    let na = |v: Option<f64>| v.map(|x| format!("{x:.3}")).unwrap_or_else(|| "NA".into());
    println!(
        "  {:>4} {:>5} {:>6} {:>6} {:>7} {:<12} {:>6} {:>7} {:>7} {:>7} {:>8}",
        "cell", "days", "cities", "p", "effect", "method", "power", "type_m", "type_s", "cover", "F"
    );
    for r in records {
        println!(
            "  {:>4} {:>5} {:>6} {:>6.2} {:>7.2} {:<12} {:>6} {:>7} {:>7} {:>7} {:>8}",
            r.cell_index,
            r.cell.n_days,
            r.cell.n_cities,
            r.cell.p_treat,
            r.cell.percent_effect,
            r.cell.method.name(),
            na(r.power),
            na(r.type_m),
            na(r.type_s),
            na(r.coverage_rate),
            na(r.mean_f_stat),
        );
    }
}

fn print_illustration(summary: &SummaryRecord) {
    let na = |v: Option<f64>| v.map(|x| format!("{x:.3}")).unwrap_or_else(|| "NA".into());
    println!("=== MAD SCIENTIST ===");
    println!("  replicates:   {}", summary.n_valid);
    println!("  significant:  {}", summary.n_significant);
    println!("  power:        {}", na(summary.power));
    println!("  type M:       {}", na(summary.type_m));
    println!("  type S:       {}", na(summary.type_s));
    println!("  coverage:     {}", na(summary.coverage_rate));
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

//! The simulation driver: grid, batches, checkpoints and summaries.
//!
//! EXECUTION ORDER (fixed):
//!   1. Validate the configuration and build the parameter grid.
//!   2. Register the run and its cells, or check them against the
//!      stored ones when resuming.
//!   3. List the (cell, replicate) jobs not stored yet.
//!   4. Run jobs in batches of `checkpoint_every`, each batch in
//!      parallel; write each batch in one transaction.
//!   5. Summarize every stored replicate and persist the summaries.
//!
//! RULES:
//!   - A replicate's randomness depends only on (seed, cell, replicate),
//!     never on which worker runs it or in which batch.
//!   - Numerical failures drop the replicate; any other error aborts.
//!   - Nothing is shared between replicates except read-only inputs.

use crate::{
    config::SimConfig,
    error::{SimError, SimResult},
    grid::ParameterCell,
    model::ModelSpec,
    panel::Panel,
    replicate::{run_replicate, ReplicateFailure, ReplicateResult},
    rng::SeedBank,
    store::SimStore,
    summary::{summarize, SummaryRecord},
    types::{CellIndex, ReplicateIndex, RunId},
};
use rayon::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub resumed: bool,
    /// Replicates run by this invocation.
    pub completed: u64,
    /// Replicates found in the store and not rerun.
    pub skipped: u64,
    /// Replicates dropped by this invocation.
    pub failed: u64,
    pub batches: usize,
    pub summaries: Vec<SummaryRecord>,
}

pub struct SimDriver<'a> {
    config: SimConfig,
    panel: &'a Panel,
    store: &'a SimStore,
}

type Job = (CellIndex, ReplicateIndex);

enum Outcome {
    Done(ReplicateResult),
    Dropped(ReplicateFailure),
}

impl<'a> SimDriver<'a> {
    pub fn new(config: SimConfig, panel: &'a Panel, store: &'a SimStore) -> Self {
        Self {
            config,
            panel,
            store,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Run (or resume) `run_id` to completion.
    pub fn run(&self, run_id: &str) -> SimResult<RunReport> {
        self.config.validate()?;
        let cells: Vec<(CellIndex, ParameterCell)> = self
            .config
            .cells()
            .into_iter()
            .enumerate()
            .map(|(i, c)| (i as CellIndex, c))
            .collect();
        let specs = cells
            .iter()
            .map(|(_, cell)| self.config.formula(&cell.formula).cloned())
            .collect::<SimResult<Vec<ModelSpec>>>()?;

        let resumed = self.register(run_id, &cells)?;
        let done = self.store.completed_replicates(run_id)?;
        let jobs = pending_jobs(cells.len(), self.config.n_reps, &done);
        let skipped = done.len() as u64;

        log::info!(
            "run {run_id}: {} cells × {} reps, {} pending, {} already stored",
            cells.len(),
            self.config.n_reps,
            jobs.len(),
            skipped
        );

        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut batches = 0usize;
        let bank = SeedBank::new(self.config.seed);

        let pool = match self.config.threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| SimError::Other(anyhow::anyhow!("thread pool: {e}")))?,
            ),
            None => None,
        };

        let panel = self.panel;
        for batch in jobs.chunks(self.config.checkpoint_every) {
            let work = || run_batch(panel, batch, &cells, &specs, bank);
            let outcomes = match &pool {
                Some(pool) => pool.install(work)?,
                None => work()?,
            };

            let mut results = Vec::with_capacity(outcomes.len());
            let mut failures = Vec::new();
            for outcome in outcomes {
                match outcome {
                    Outcome::Done(r) => results.push(r),
                    Outcome::Dropped(f) => failures.push(f),
                }
            }
            self.store.save_checkpoint(run_id, &results, &failures)?;
            completed += results.len() as u64;
            failed += failures.len() as u64;
            batches += 1;
            log::info!(
                "run {run_id}: checkpoint {batches} saved ({} of {} pending done, {failed} dropped)",
                completed + failed,
                jobs.len()
            );
        }

        let summaries = self.summarize_stored(run_id, &cells)?;
        Ok(RunReport {
            run_id: run_id.to_string(),
            resumed,
            completed,
            skipped,
            failed,
            batches,
            summaries,
        })
    }

    /// Recompute and persist summaries from whatever the store holds.
    pub fn summarize_stored(
        &self,
        run_id: &str,
        cells: &[(CellIndex, ParameterCell)],
    ) -> SimResult<Vec<SummaryRecord>> {
        let replicates = self.store.load_replicates(run_id)?;
        let failures = self.store.load_failures(run_id)?;
        let summaries = summarize(
            cells,
            &replicates,
            &failures,
            self.config.significance_level,
        );
        self.store.save_summaries(run_id, &summaries)?;
        log::info!(
            "run {run_id}: summarized {} replicates into {} cells",
            replicates.len(),
            summaries.len()
        );
        Ok(summaries)
    }

    /// Insert a new run, or verify that a stored one has the same seed
    /// and grid. Returns true when resuming.
    fn register(&self, run_id: &str, cells: &[(CellIndex, ParameterCell)]) -> SimResult<bool> {
        let mismatch = |reason: String| SimError::CheckpointMismatch {
            run_id: run_id.to_string(),
            reason,
        };
        match self.store.run_seed(run_id)? {
            None => {
                let config_json = serde_json::to_string(&self.config)?;
                self.store.insert_run(
                    run_id,
                    self.config.seed,
                    env!("CARGO_PKG_VERSION"),
                    &config_json,
                )?;
                self.store.insert_cells(run_id, cells)?;
                Ok(false)
            }
            Some(seed) => {
                if seed != self.config.seed {
                    return Err(mismatch(format!(
                        "stored seed {seed}, configured seed {}",
                        self.config.seed
                    )));
                }
                let stored = self.store.load_cells(run_id)?;
                if stored.len() != cells.len() {
                    return Err(mismatch(format!(
                        "stored grid has {} cells, configured grid has {}",
                        stored.len(),
                        cells.len()
                    )));
                }
                for ((i, a), (j, b)) in stored.iter().zip(cells) {
                    if i != j || a.key() != b.key() {
                        return Err(mismatch(format!("cell {j} differs: {} vs {}", a.key(), b.key())));
                    }
                }
                log::info!("run {run_id}: resuming");
                Ok(true)
            }
        }
    }
}

/// Run one batch of jobs in parallel on the current rayon pool.
fn run_batch(
    panel: &Panel,
    batch: &[Job],
    cells: &[(CellIndex, ParameterCell)],
    specs: &[ModelSpec],
    bank: SeedBank,
) -> SimResult<Vec<Outcome>> {
    batch
        .par_iter()
        .map(|&(cell_index, replicate)| {
            let (_, cell) = &cells[cell_index as usize];
            let spec = &specs[cell_index as usize];
            let mut rng = bank.for_replicate(cell_index, replicate);
            match run_replicate(panel, cell_index, replicate, cell, spec, &mut rng) {
                Ok(result) => Ok(Outcome::Done(result)),
                Err(e) if e.is_replicate_failure() => {
                    log::debug!("cell {cell_index} replicate {replicate} dropped: {e}");
                    Ok(Outcome::Dropped(ReplicateFailure {
                        cell_index,
                        replicate,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    }))
                }
                Err(e) => Err(e),
            }
        })
        .collect()
}

/// Jobs of the grid not yet stored, in (cell, replicate) order.
fn pending_jobs(n_cells: usize, n_reps: u64, done: &HashSet<Job>) -> Vec<Job> {
    (0..n_cells as CellIndex)
        .flat_map(|c| (0..n_reps).map(move |r| (c, r)))
        .filter(|job| !done.contains(job))
        .collect()
}

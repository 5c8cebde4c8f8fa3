use super::SimStore;
use crate::{
    error::SimResult,
    grid::ParameterCell,
    replicate::{ReplicateFailure, ReplicateResult},
    types::{CellIndex, ReplicateIndex},
};
use rusqlite::params;
use std::collections::HashSet;

impl SimStore {
    // ── Cells ──────────────────────────────────────────────────

    pub fn insert_cells(&self, run_id: &str, cells: &[(CellIndex, ParameterCell)]) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cell (run_id, cell_index, cell_key, cell_json)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (index, cell) in cells {
                stmt.execute(params![
                    run_id,
                    *index as i64,
                    cell.key(),
                    serde_json::to_string(cell)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_cells(&self, run_id: &str) -> SimResult<Vec<(CellIndex, ParameterCell)>> {
        let mut stmt = self.conn.prepare(
            "SELECT cell_index, cell_json FROM cell
             WHERE run_id = ?1 ORDER BY cell_index ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut cells = Vec::new();
        for row in rows {
            let (index, json) = row?;
            cells.push((index as CellIndex, serde_json::from_str(&json)?));
        }
        Ok(cells)
    }

    // ── Checkpoints ────────────────────────────────────────────

    /// Persist one batch of replicates and failures atomically.
    pub fn save_checkpoint(
        &self,
        run_id: &str,
        results: &[ReplicateResult],
        failures: &[ReplicateFailure],
    ) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut ok = tx.prepare_cached(
                "INSERT INTO replicate (
                    run_id, cell_index, replicate, estimate, std_error, p_value,
                    n_obs, true_effect, first_stage_f, proportion_treated
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            )?;
            for r in results {
                ok.execute(params![
                    run_id,
                    r.cell_index as i64,
                    r.replicate as i64,
                    r.estimate,
                    r.std_error,
                    r.p_value,
                    r.n_obs as i64,
                    r.true_effect,
                    r.first_stage_f,
                    r.proportion_treated,
                ])?;
            }
            let mut failed = tx.prepare_cached(
                "INSERT INTO replicate_failure (run_id, cell_index, replicate, kind, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for f in failures {
                failed.execute(params![
                    run_id,
                    f.cell_index as i64,
                    f.replicate as i64,
                    f.kind,
                    f.message,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// (cell, replicate) pairs already stored, successful or failed.
    pub fn completed_replicates(
        &self,
        run_id: &str,
    ) -> SimResult<HashSet<(CellIndex, ReplicateIndex)>> {
        let mut stmt = self.conn.prepare(
            "SELECT cell_index, replicate FROM replicate WHERE run_id = ?1
             UNION ALL
             SELECT cell_index, replicate FROM replicate_failure WHERE run_id = ?1",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, i64>(0)? as CellIndex, row.get::<_, i64>(1)? as ReplicateIndex))
        })?;
        let mut done = HashSet::new();
        for row in rows {
            done.insert(row?);
        }
        Ok(done)
    }

    pub fn load_replicates(&self, run_id: &str) -> SimResult<Vec<ReplicateResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT cell_index, replicate, estimate, std_error, p_value, n_obs,
                    true_effect, first_stage_f, proportion_treated
             FROM replicate WHERE run_id = ?1
             ORDER BY cell_index ASC, replicate ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ReplicateResult {
                cell_index: row.get::<_, i64>(0)? as CellIndex,
                replicate: row.get::<_, i64>(1)? as ReplicateIndex,
                estimate: row.get(2)?,
                std_error: row.get(3)?,
                p_value: row.get(4)?,
                n_obs: row.get::<_, i64>(5)? as usize,
                true_effect: row.get(6)?,
                first_stage_f: row.get(7)?,
                proportion_treated: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn load_failures(&self, run_id: &str) -> SimResult<Vec<ReplicateFailure>> {
        let mut stmt = self.conn.prepare(
            "SELECT cell_index, replicate, kind, message
             FROM replicate_failure WHERE run_id = ?1
             ORDER BY cell_index ASC, replicate ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ReplicateFailure {
                cell_index: row.get::<_, i64>(0)? as CellIndex,
                replicate: row.get::<_, i64>(1)? as ReplicateIndex,
                kind: row.get(2)?,
                message: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn replicate_count(&self, run_id: &str) -> SimResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM replicate WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

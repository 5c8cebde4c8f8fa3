use super::SimStore;
use crate::{error::SimResult, summary::SummaryRecord};
use rusqlite::params;

impl SimStore {
    // ── Summaries ──────────────────────────────────────────────

    /// Replace the stored summaries of a run.
    pub fn save_summaries(&self, run_id: &str, records: &[SummaryRecord]) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM summary WHERE run_id = ?1", params![run_id])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO summary (
                    run_id, cell_index, summary_json, power, type_m, type_s, coverage
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    run_id,
                    r.cell_index as i64,
                    serde_json::to_string(r)?,
                    r.power,
                    r.type_m,
                    r.type_s,
                    r.coverage_rate,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_summaries(&self, run_id: &str) -> SimResult<Vec<SummaryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT summary_json FROM summary WHERE run_id = ?1 ORDER BY cell_index ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }
}

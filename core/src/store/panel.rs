use super::SimStore;
use crate::{error::SimResult, panel::RawObservation};
use chrono::NaiveDate;
use rusqlite::params;

impl SimStore {
    // ── Raw panel ──────────────────────────────────────────────

    pub fn insert_raw_observations(&self, records: &[RawObservation]) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO raw_observation (
                    city, date, death_total, death_cvd, death_resp, death_over_75,
                    pm10, pm25, o3, no2, co, so2, temperature_f, dewpoint_f
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.city,
                    r.date.to_string(),
                    r.death_total,
                    r.death_cvd,
                    r.death_resp,
                    r.death_over_75,
                    r.pm10,
                    r.pm25,
                    r.o3,
                    r.no2,
                    r.co,
                    r.so2,
                    r.temperature_f,
                    r.dewpoint_f,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All raw records in insertion order. Rows whose date does not
    /// parse are skipped and counted in the log.
    pub fn load_raw_observations(&self) -> SimResult<Vec<RawObservation>> {
        let mut stmt = self.conn.prepare(
            "SELECT city, date, death_total, death_cvd, death_resp, death_over_75,
                    pm10, pm25, o3, no2, co, so2, temperature_f, dewpoint_f
             FROM raw_observation ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let date: String = row.get(1)?;
            Ok((
                date,
                RawObservation {
                    city: row.get(0)?,
                    date: NaiveDate::default(),
                    death_total: row.get(2)?,
                    death_cvd: row.get(3)?,
                    death_resp: row.get(4)?,
                    death_over_75: row.get(5)?,
                    pm10: row.get(6)?,
                    pm25: row.get(7)?,
                    o3: row.get(8)?,
                    no2: row.get(9)?,
                    co: row.get(10)?,
                    so2: row.get(11)?,
                    temperature_f: row.get(12)?,
                    dewpoint_f: row.get(13)?,
                },
            ))
        })?;

        let mut records = Vec::new();
        let mut bad_dates = 0usize;
        for row in rows {
            let (date, mut record) = row?;
            match date.parse::<NaiveDate>() {
                Ok(d) => {
                    record.date = d;
                    records.push(record);
                }
                Err(_) => bad_dates += 1,
            }
        }
        if bad_dates > 0 {
            log::warn!("raw_observation: skipped {bad_dates} rows with an invalid date");
        }
        Ok(records)
    }

    pub fn raw_observation_count(&self) -> SimResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM raw_observation", [], |row| row.get(0))?;
        Ok(n)
    }
}

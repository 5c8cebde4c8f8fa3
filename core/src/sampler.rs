//! Study-period and spatial-unit sampler.
//!
//! A study is a contiguous window of days and a subset of cities,
//! both drawn at random from the panel. Requests larger than the
//! panel are clamped to what it has rather than rejected.

use crate::{
    error::{invalid_parameter, SimError, SimResult},
    panel::{Observation, Panel},
    rng::ReplicateRng,
    types::CityId,
};
use chrono::NaiveDate;
use rand::seq::index;

/// The rows of one randomly drawn study, in (city, date) order.
#[derive(Debug, Clone)]
pub struct StudySample<'a> {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub cities: Vec<CityId>,
    pub rows: Vec<&'a Observation>,
}

impl StudySample<'_> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }
}

pub fn sample_study<'a>(
    panel: &'a Panel,
    n_days: usize,
    n_cities: usize,
    rng: &mut ReplicateRng,
) -> SimResult<StudySample<'a>> {
    if n_days == 0 {
        return Err(invalid_parameter("n_days", "must be at least 1"));
    }
    if n_cities == 0 {
        return Err(invalid_parameter("n_cities", "must be at least 1"));
    }

    let available_days = panel.n_days();
    let window = n_days.min(available_days);
    let latest_offset = (available_days - window) as u64;
    let offset = rng.next_u64_below(latest_offset + 1) as i64;
    let start = panel.first_date() + chrono::Duration::days(offset);
    let end = start + chrono::Duration::days(window as i64 - 1);

    let n_available = panel.cities().len();
    let mut chosen = index::sample(rng, n_available, n_cities.min(n_available)).into_vec();
    chosen.sort_unstable();
    let mut rows = Vec::with_capacity(window * chosen.len());
    let mut cities = Vec::with_capacity(chosen.len());
    for &city_index in &chosen {
        cities.push(panel.cities()[city_index].clone());
        let city_rows = panel.city_rows(city_index);
        let from = city_rows.partition_point(|r| r.date < start);
        let to = city_rows.partition_point(|r| r.date <= end);
        rows.extend(city_rows[from..to].iter());
    }

    if rows.is_empty() {
        return Err(SimError::EmptySample {
            reason: format!("no observations between {start} and {end}"),
        });
    }

    Ok(StudySample {
        start,
        end,
        cities,
        rows,
    })
}

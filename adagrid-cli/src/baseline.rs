//! Non-private reference point for scoring: a bootstrap resample of the raw
//! records. Its output is the data itself and must never be released.

use adagrid_core::noise::seeded_rng;
use rand::Rng;

use crate::io::RawTable;

/// Draws `rows` records (all of them by default) uniformly with replacement.
pub fn resample(table: &RawTable, rows: Option<usize>, seed: u64) -> RawTable {
    let mut rng = seeded_rng("adagrid/resample", seed);
    let count = rows.unwrap_or(table.rows.len());
    let rows = if table.rows.is_empty() {
        Vec::new()
    } else {
        (0..count)
            .map(|_| table.rows[rng.gen_range(0..table.rows.len())].clone())
            .collect()
    };
    RawTable {
        columns: table.columns.clone(),
        rows,
    }
}

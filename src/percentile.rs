use std::fmt;

use uuid::Uuid;

use crate::error::LedgerError;
use crate::store::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percentile {
    /// "Top N%" where N is never below 1.
    Top(u32),
    NoBenchmark,
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Percentile::Top(value) => write!(f, "Top {value}%"),
            Percentile::NoBenchmark => f.write_str("No benchmark available"),
        }
    }
}

/// Ranks `score` against the full cohort distribution, which must already
/// contain the submitted score.
pub fn rank_percentile(score: i32, scores: &[i32]) -> Percentile {
    if scores.is_empty() {
        return Percentile::NoBenchmark;
    }

    let mut sorted = scores.to_vec();
    sorted.sort_unstable();

    let total = sorted.len();
    let rank = sorted.iter().filter(|&&other| other > score).count();
    let share = (rank as f64 / total as f64 * 100.0).round() as u32;

    Percentile::Top(share.max(1))
}

pub async fn compute_percentile<L: Ledger + ?Sized>(
    ledger: &L,
    module_id: Uuid,
    cohort: &str,
    score: i32,
) -> Result<Percentile, LedgerError> {
    let has_data = ledger
        .cohort_stats(module_id, cohort)
        .await?
        .is_some_and(|stats| stats.has_data());
    if !has_data {
        return Ok(Percentile::NoBenchmark);
    }

    let scores = ledger.cohort_scores(module_id, cohort).await?;
    Ok(rank_percentile(score, &scores))
}

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::CohortStats;
use crate::store::Ledger;

/// A change to one (module, cohort) pair, applied under the store's lock
/// together with the pair's current score set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CohortUpdate {
    Completion { score: i32 },
    Removal { score: i32 },
    Reconcile,
}

impl CohortStats {
    /// Applies `update` given every score currently recorded for the pair.
    pub fn apply(self, update: CohortUpdate, scores: &[i32]) -> CohortStats {
        match update {
            CohortUpdate::Completion { score } => self.with_completion(score, scores),
            CohortUpdate::Removal { score } => self.with_removal(score, scores),
            CohortUpdate::Reconcile => self.reconciled(scores),
        }
    }

    pub fn with_completion(mut self, score: i32, scores: &[i32]) -> CohortStats {
        self.total_score += i64::from(score);
        self.count += 1;
        self.recompute_extrema(scores);
        self
    }

    pub fn with_removal(mut self, score: i32, scores: &[i32]) -> CohortStats {
        self.total_score = (self.total_score - i64::from(score)).max(0);
        self.count = (self.count - 1).max(0);

        if self.count == 0 {
            return CohortStats::default();
        }

        self.recompute_extrema(scores);
        self
    }

    /// Overwrites min/max from `scores` when the pair has data; empty pairs
    /// are left untouched.
    pub fn reconciled(mut self, scores: &[i32]) -> CohortStats {
        if self.count > 0 {
            self.recompute_extrema(scores);
        }
        self
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.total_score as f64 / f64::from(self.count))
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }

    // An empty score set while count > 0 means the ledger and the aggregate
    // disagree; extrema fall back to "no data" until the next sweep.
    fn recompute_extrema(&mut self, scores: &[i32]) {
        self.min_score = scores.iter().copied().min();
        self.max_score = scores.iter().copied().max();
    }
}

pub async fn apply_completion<L: Ledger + ?Sized>(
    ledger: &L,
    module_id: Uuid,
    cohort: &str,
    score: i32,
) -> Result<CohortStats, LedgerError> {
    let stats = ledger
        .update_cohort(module_id, cohort, CohortUpdate::Completion { score })
        .await?;

    info!(
        module = %module_id,
        cohort,
        score,
        count = stats.count,
        total = stats.total_score,
        "cohort stats updated after completion"
    );
    Ok(stats)
}

pub async fn apply_removal<L: Ledger + ?Sized>(
    ledger: &L,
    module_id: Uuid,
    cohort: &str,
    score: i32,
) -> Result<CohortStats, LedgerError> {
    let stats = ledger
        .update_cohort(module_id, cohort, CohortUpdate::Removal { score })
        .await?;

    if stats.has_data() {
        info!(
            module = %module_id,
            cohort,
            score,
            count = stats.count,
            total = stats.total_score,
            "cohort stats updated after removal"
        );
    } else {
        debug!(module = %module_id, cohort, "cohort emptied, stats reset");
    }
    Ok(stats)
}

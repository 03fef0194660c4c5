use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregate::CohortUpdate;
use crate::error::LedgerError;
use crate::store::Ledger;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub repaired: usize,
}

/// Recomputes min/max for every (module, cohort) pair that has data.
pub async fn sweep<L: Ledger + ?Sized>(ledger: &L) -> Result<SweepSummary, LedgerError> {
    let mut summary = SweepSummary::default();

    for (key, before) in ledger.list_cohorts().await? {
        if !before.has_data() {
            continue;
        }
        summary.examined += 1;

        let after = ledger
            .update_cohort(key.module_id, &key.age_group, CohortUpdate::Reconcile)
            .await?;
        if after.min_score != before.min_score || after.max_score != before.max_score {
            summary.repaired += 1;
            debug!(
                module = %key.module_id,
                cohort = %key.age_group,
                min = ?after.min_score,
                max = ?after.max_score,
                "repaired drifted extrema"
            );
        }
    }

    Ok(summary)
}

/// Sweeps on a fixed interval until `shutdown` resolves. Sweeps run one at a
/// time; ticks missed while a sweep is still running are skipped.
pub async fn run<L, F>(ledger: &L, every: Duration, shutdown: F)
where
    L: Ledger + ?Sized,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut shutdown = std::pin::pin!(shutdown);

    info!(interval_ms = every.as_millis() as u64, "reconciler started");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("reconciler stopped");
                return;
            }
            _ = ticker.tick() => match sweep(ledger).await {
                Ok(summary) if summary.repaired > 0 => {
                    info!(examined = summary.examined, repaired = summary.repaired, "sweep repaired cohort stats");
                }
                Ok(summary) => debug!(examined = summary.examined, "sweep found no drift"),
                Err(err) => warn!(error = %err, "reconcile sweep failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle;
    use crate::models::{Actor, CohortKey, CohortStats, NewUser, Role};
    use crate::store::memory::MemoryLedger;

    async fn enrol(ledger: &MemoryLedger, email: &str, age_group: &str) -> Actor {
        let user = lifecycle::signup(
            ledger,
            NewUser {
                email: email.to_string(),
                username: Some("learner".to_string()),
                password_hash: "hash".to_string(),
                role: Role::Learner,
                consented: true,
                age_group: Some(age_group.to_string()),
            },
        )
        .await
        .unwrap();
        Actor::new(user.id)
    }

    fn corrupt(ledger: &MemoryLedger, module_id: uuid::Uuid, age_group: &str) {
        let key = CohortKey {
            module_id,
            age_group: age_group.to_string(),
        };
        let mut state = ledger.state();
        let stats = state.stats.get_mut(&key).unwrap();
        stats.min_score = Some(-5);
        stats.max_score = None;
    }

    async fn seeded() -> (MemoryLedger, uuid::Uuid) {
        let ledger = MemoryLedger::new();
        let module = ledger.add_module("network-basics", 20);
        for (i, score) in [14, 6, 19].into_iter().enumerate() {
            let actor = enrol(&ledger, &format!("l{i}@example.com"), "13-15").await;
            lifecycle::complete_module(&ledger, &actor, "network-basics", score)
                .await
                .unwrap();
        }
        let actor = enrol(&ledger, "older@example.com", "16-18").await;
        lifecycle::complete_module(&ledger, &actor, "network-basics", 2)
            .await
            .unwrap();
        (ledger, module)
    }

    #[tokio::test]
    async fn sweep_repairs_drifted_extrema() {
        let (ledger, module) = seeded().await;
        corrupt(&ledger, module, "13-15");

        let summary = sweep(&ledger).await.unwrap();
        assert_eq!(summary, SweepSummary { examined: 2, repaired: 1 });

        let stats = ledger.stats_for(module, "13-15");
        assert_eq!(stats.min_score, Some(6));
        assert_eq!(stats.max_score, Some(19));
        assert_eq!(stats.total_score, 39);
        assert_eq!(stats.count, 3);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let (ledger, _) = seeded().await;

        sweep(&ledger).await.unwrap();
        let first: Vec<_> = ledger.state().stats.clone().into_iter().collect();
        let summary = sweep(&ledger).await.unwrap();
        let second: Vec<_> = ledger.state().stats.clone().into_iter().collect();

        assert_eq!(first, second);
        assert_eq!(summary.repaired, 0);
    }

    #[tokio::test]
    async fn sweep_skips_empty_cohorts_and_clears_orphaned_extrema() {
        let (ledger, module) = seeded().await;
        let orphan = CohortKey {
            module_id: module,
            age_group: "25+".to_string(),
        };
        let empty = CohortKey {
            module_id: module,
            age_group: "19-24".to_string(),
        };
        ledger.state().stats.insert(
            orphan,
            CohortStats {
                total_score: 7,
                count: 1,
                min_score: Some(7),
                max_score: Some(7),
            },
        );
        ledger.state().stats.insert(empty, CohortStats::default());

        let summary = sweep(&ledger).await.unwrap();
        assert_eq!(summary.examined, 3);

        let orphaned = ledger.stats_for(module, "25+");
        assert_eq!(orphaned.count, 1);
        assert_eq!(orphaned.min_score, None);
        assert_eq!(orphaned.max_score, None);
        assert_eq!(ledger.stats_for(module, "19-24"), CohortStats::default());
    }

    #[tokio::test]
    async fn run_sweeps_until_shutdown() {
        let (ledger, module) = seeded().await;
        corrupt(&ledger, module, "16-18");

        run(
            &ledger,
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_millis(60)),
        )
        .await;

        let stats = ledger.stats_for(module, "16-18");
        assert_eq!(stats.min_score, Some(2));
        assert_eq!(stats.max_score, Some(2));
    }
}

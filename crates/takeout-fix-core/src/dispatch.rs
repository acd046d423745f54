//! Bounded-parallel dispatch of companion groups.
//!
//! Groups run on a dedicated rayon pool sized to the resolved worker count.
//! Outcomes flow through a channel to a single aggregator thread, the only
//! writer of the summary.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::media::CompanionGroup;
use crate::outcome::Outcome;
use crate::repair::{self, GroupPlan, RepairContext};
use crate::report::Aggregator;
use crate::sidecar::{self, SidecarIndex};
use crate::ThrottledProgress;

/// Default share of logical cores, in percent.
const DEFAULT_CORE_SHARE: usize = 75;

/// Worker count the run uses unless oversubscription is allowed.
pub fn default_parallelism() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cores * DEFAULT_CORE_SHARE / 100).max(1)
}

/// Requested count, capped at the default unless `allow_oversubscribe`.
pub fn resolve_parallelism(requested: Option<usize>, allow_oversubscribe: bool) -> usize {
    let cap = default_parallelism();
    match requested {
        None | Some(0) => cap,
        Some(n) if n > cap && !allow_oversubscribe => {
            tracing::warn!(
                requested = n,
                cap,
                "limiting workers; pass the oversubscribe option to go higher"
            );
            cap
        }
        Some(n) => n,
    }
}

/// Resolve the sidecar of every group up front, against the read-only index.
pub fn plan_groups(groups: Vec<CompanionGroup>, index: &SidecarIndex) -> Vec<GroupPlan> {
    groups
        .into_par_iter()
        .map(|group| {
            let sidecar = sidecar::resolve_group(&group, index);
            GroupPlan { group, sidecar }
        })
        .collect()
}

/// Run every plan on `workers` threads, feeding outcomes into `aggregator`.
/// Once `cancel` fires no new group starts; groups in flight finish.
pub fn dispatch(
    plans: &[GroupPlan],
    ctx: &RepairContext,
    workers: usize,
    cancel: Option<&CancellationToken>,
    aggregator: Aggregator,
    progress: &ThrottledProgress,
) -> anyhow::Result<Aggregator> {
    let total: u64 = plans.iter().map(|p| p.group.len() as u64).sum();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("repair-{}", i))
        .build()?;
    tracing::info!(groups = plans.len(), files = total, workers, "repairing");

    let processed = AtomicU64::new(0);
    let (tx, rx) = mpsc::channel::<Outcome>();

    let aggregator = std::thread::scope(|s| {
        let processed = &processed;
        let collector = s.spawn(move || {
            let mut aggregator = aggregator;
            for outcome in rx {
                aggregator.record(outcome);
                let current = processed.fetch_add(1, Ordering::Relaxed);
                progress.report("repair", current, total, "Repairing files");
            }
            aggregator
        });

        pool.install(|| {
            plans.par_iter().for_each_with(tx, |tx, plan| {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    return;
                }
                for outcome in run_group(plan, ctx) {
                    // The collector outlives every sender
                    let _ = tx.send(outcome);
                }
            });
        });

        collector
            .join()
            .map_err(|_| anyhow::anyhow!("outcome collector panicked"))
    })?;

    Ok(aggregator)
}

/// Per-member panics are handled inside the transaction; this catches the rest.
fn run_group(plan: &GroupPlan, ctx: &RepairContext) -> Vec<Outcome> {
    match panic::catch_unwind(AssertUnwindSafe(|| repair::repair_group(plan, ctx))) {
        Ok(outcomes) => outcomes,
        Err(_) => plan
            .group
            .members
            .iter()
            .map(|m| Outcome::error(m, "Worker crashed while preparing the group", None))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_parallelism() {
        let cap = default_parallelism();
        assert!(cap >= 1);
        assert_eq!(resolve_parallelism(None, false), cap);
        assert_eq!(resolve_parallelism(Some(0), false), cap);
        assert_eq!(resolve_parallelism(Some(1), false), 1);
        assert_eq!(resolve_parallelism(Some(cap + 8), false), cap);
        assert_eq!(resolve_parallelism(Some(cap + 8), true), cap + 8);
    }
}

use crate::execution::unit::{UnitReport, UnitRunner};
use model::{core::identifiers::UnitId, execution::errors::FailureKind, records::unit::WorkUnit};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::Semaphore,
    task::{Id, JoinSet},
};
use tracing::{error, info};

/// Runs units on a bounded pool. Units that never got a slot before
/// cancellation come back as not started; a unit whose task dies comes back
/// failed, so every unit handed in is accounted for.
pub async fn spawn(runner: Arc<UnitRunner>, units: Vec<WorkUnit>) -> Vec<UnitReport> {
    let limit = runner.config.concurrency.max_concurrent_units.max(1);
    info!(units = units.len(), limit, "Launching unit workers");

    let semaphore = Arc::new(Semaphore::new(limit));
    let cancel = runner.ctx.cancel.clone();
    let mut tasks = JoinSet::new();
    let mut reports = Vec::with_capacity(units.len());
    let mut running: HashMap<Id, UnitId> = HashMap::new();

    for unit in units {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            reports.push(UnitReport::not_started(unit.id));
            continue;
        };

        let unit_id = unit.id.clone();
        let runner = runner.clone();
        let handle = tasks.spawn(async move {
            let _permit = permit;
            runner.run(unit).await
        });
        running.insert(handle.id(), unit_id);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, report)) => {
                running.remove(&id);
                reports.push(report);
            }
            Err(e) => {
                let Some(unit_id) = running.remove(&e.id()) else {
                    error!(error = %e, "Untracked unit task did not complete");
                    continue;
                };
                error!(unit = %unit_id, error = %e, "Unit task did not complete");
                runner.ctx.metrics.increment_units_failed(1);
                let mut report = UnitReport::new(unit_id);
                report.fail(None, FailureKind::Internal, format!("unit task ended abnormally: {e}"));
                reports.push(report);
            }
        }
    }
    reports
}

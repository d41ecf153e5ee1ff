use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tracing::{debug, error, info, info_span, Instrument};

use super::{strategy::InstallOptions, worker};
use crate::{
    serialization::{artifact_set::ArtifactSet, config::Credential, host_list::HostTarget},
    states::batch_state::{BatchProgress, BatchSummary, DeploymentOutcome},
    transport::Connector,
};

pub static WORKER_ABORTED: &str = "worker task aborted";

/// Every outcome of a finished batch, in completion order.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<DeploymentOutcome>,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_outcomes(&self.outcomes)
    }
}

/// Fans host workers out over a bounded pool.
pub struct Orchestrator<C: Connector> {
    connector: Arc<C>,
    options: InstallOptions,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(connector: C, options: InstallOptions) -> Orchestrator<C> {
        Orchestrator {
            connector: Arc::new(connector),
            options,
        }
    }

    /// Deploys to every host with at most `max_concurrency` workers admitted
    /// at once, and returns only when all of them have finished. A failing
    /// host never cancels its siblings.
    pub async fn run_batch(
        &self,
        hosts: &[HostTarget],
        credentials: Vec<Credential>,
        artifacts: Arc<ArtifactSet>,
        max_concurrency: usize,
    ) -> BatchReport {
        let total = hosts.len();
        let max_concurrency = max_concurrency.max(1);
        info!(total, max_concurrency, "starting batch");

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let credentials: Arc<[Credential]> = credentials.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<DeploymentOutcome>();

        let collector = tokio::spawn(async move {
            let mut progress = BatchProgress::new(total);
            let mut outcomes = Vec::with_capacity(total);
            while let Some(outcome) = rx.recv().await {
                progress.record(&outcome);
                info!(
                    host = %outcome.host,
                    succeeded = outcome.succeeded,
                    completed = progress.completed,
                    total = progress.total,
                    "host finished"
                );
                outcomes.push(outcome);
            }
            outcomes
        });

        let mut set = JoinSet::new();
        for host in hosts.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let connector = Arc::clone(&self.connector);
            let credentials = Arc::clone(&credentials);
            let artifacts = Arc::clone(&artifacts);
            let options = self.options;
            let tx = tx.clone();
            let span = info_span!("host", address = %host.address);

            set.spawn(
                async move {
                    debug!("waiting for a worker slot");
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(permit) => {
                            let outcome = worker::run(
                                connector.as_ref(),
                                &host,
                                &credentials,
                                &artifacts,
                                options,
                            )
                            .await;
                            drop(permit);
                            outcome
                        }
                        Err(e) => DeploymentOutcome::failure(&host.address, e.to_string()),
                    };
                    // the collector outlives every sender
                    let _ = tx.send(outcome);
                }
                .instrument(span),
            );
        }
        drop(tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "host worker did not finish");
            }
        }

        let mut outcomes = match collector.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(error = %e, "outcome collector failed");
                Vec::new()
            }
        };
        fill_missing(hosts, &mut outcomes);

        BatchReport { outcomes }
    }
}

/// Adds a failure for every host whose worker died before reporting, so each
/// host ends up with exactly one outcome.
fn fill_missing(hosts: &[HostTarget], outcomes: &mut Vec<DeploymentOutcome>) {
    let mut reported: HashMap<&str, usize> = HashMap::new();
    for outcome in outcomes.iter() {
        *reported.entry(outcome.host.as_str()).or_default() += 1;
    }

    let mut missing = Vec::new();
    for host in hosts {
        match reported.get_mut(host.address.as_str()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => missing.push(DeploymentOutcome::failure(&host.address, WORKER_ABORTED)),
        }
    }
    outcomes.extend(missing);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_missing_adds_one_failure_per_unreported_host() {
        let hosts = vec![
            HostTarget::new("a"),
            HostTarget::new("b"),
            HostTarget::new("a"),
        ];
        let mut outcomes = vec![DeploymentOutcome::success("a")];

        fill_missing(&hosts, &mut outcomes);

        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes[1..],
            [
                DeploymentOutcome::failure("b", WORKER_ABORTED),
                DeploymentOutcome::failure("a", WORKER_ABORTED),
            ]
        );
    }

    #[test]
    fn fill_missing_leaves_complete_batches_alone() {
        let hosts = vec![HostTarget::new("a"), HostTarget::new("b")];
        let mut outcomes = vec![
            DeploymentOutcome::failure("b", "no credential authenticated"),
            DeploymentOutcome::success("a"),
        ];
        fill_missing(&hosts, &mut outcomes);
        assert_eq!(outcomes.len(), 2);
    }
}

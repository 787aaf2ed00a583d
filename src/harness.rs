use std::sync::Arc;

use anyhow::Result;
use tracing::{Instrument, error, info, info_span};

use crate::codec::Codec;
use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::protocol::{Action, RunId, SessionState};
use crate::session::{OperationResult, SessionClient, WorkerIdentity};

const USER_ID_STRIDE: u32 = 10_000;

/// How a worker ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Login went through and the single operation ran (or was abandoned).
    Completed(OperationResult),
    /// Connect or login failed; no operation was sent.
    Aborted(SessionError),
    /// The worker task panicked.
    Crashed(String),
}

#[derive(Debug)]
pub struct WorkerReport {
    pub identity: WorkerIdentity,
    pub session_id: Option<u32>,
    pub state: SessionState,
    pub outcome: WorkerOutcome,
}

/// Totals over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub workers: usize,
    pub completed: usize,
    pub aborted: usize,
    /// Operations answered with RESPONSE_SUCCESS.
    pub succeeded: usize,
    /// Operations answered with RESPONSE_FAILURE.
    pub rejected: usize,
    /// Operations abandoned on a transport, integrity or protocol fault.
    pub failed: usize,
}

impl RunSummary {
    pub fn from_reports(reports: &[WorkerReport]) -> Self {
        let mut summary = Self {
            workers: reports.len(),
            ..Self::default()
        };
        for report in reports {
            match &report.outcome {
                WorkerOutcome::Completed(op) => {
                    summary.completed += 1;
                    match op {
                        Ok(resp) if resp.is_success() => summary.succeeded += 1,
                        Ok(_) => summary.rejected += 1,
                        Err(_) => summary.failed += 1,
                    }
                }
                WorkerOutcome::Aborted(_) | WorkerOutcome::Crashed(_) => summary.aborted += 1,
            }
        }
        summary
    }
}

/// Synthetic user ids, unique within one run: `seed % 10000 + index * 10000`.
///
/// Not unique across runs; two runs can draw overlapping seeds.
pub fn user_identities(count: usize, seed: u32) -> Vec<WorkerIdentity> {
    (0..count)
        .map(|index| WorkerIdentity {
            index,
            user_id: (seed % USER_ID_STRIDE).wrapping_add((index as u32).wrapping_mul(USER_ID_STRIDE)),
        })
        .collect()
}

/// Runs N independent workers against one server.
pub struct WorkerHarness {
    config: Arc<ClientConfig>,
    codec: Codec,
    run_id: RunId,
}

impl WorkerHarness {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let codec = config.codec()?;
        Ok(Self {
            config: Arc::new(config),
            codec,
            run_id: RunId::new(),
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Run `count` workers with a random identity seed.
    pub async fn run(&self, count: usize, action: Action) -> Vec<WorkerReport> {
        self.run_with_seed(count, action, rand::random()).await
    }

    /// Spawn every worker, then wait for all of them. One worker failing
    /// never cancels the others.
    pub async fn run_with_seed(&self, count: usize, action: Action, seed: u32) -> Vec<WorkerReport> {
        info!(
            run = %self.run_id,
            workers = count,
            %action,
            "Starting {count} workers against {}:{}",
            self.config.host,
            self.config.port
        );

        let handles: Vec<_> = user_identities(count, seed)
            .into_iter()
            .map(|identity| {
                let config = self.config.clone();
                let codec = self.codec.clone();
                let span = info_span!(
                    "worker",
                    run = %self.run_id,
                    worker = identity.index,
                    user_id = identity.user_id
                );
                let handle =
                    tokio::spawn(run_worker(config, codec, identity, action).instrument(span));
                (identity, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(count);
        for (identity, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!("[w{}] Worker task failed: {e}", identity.index);
                    WorkerReport {
                        identity,
                        session_id: None,
                        state: SessionState::Aborted,
                        outcome: WorkerOutcome::Crashed(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }

        let summary = RunSummary::from_reports(&reports);
        info!(
            run = %self.run_id,
            completed = summary.completed,
            aborted = summary.aborted,
            succeeded = summary.succeeded,
            rejected = summary.rejected,
            failed = summary.failed,
            "All workers finished"
        );
        reports
    }
}

async fn run_worker(
    config: Arc<ClientConfig>,
    codec: Codec,
    identity: WorkerIdentity,
    action: Action,
) -> WorkerReport {
    info!("[w{}] Worker started for user {}, action: {action}", identity.index, identity.user_id);

    let mut client = match SessionClient::connect(&config, codec, identity).await {
        Ok(client) => client,
        Err(e) => {
            return WorkerReport {
                identity,
                session_id: None,
                state: SessionState::Aborted,
                outcome: WorkerOutcome::Aborted(e),
            };
        }
    };

    let outcome = match client.run(action).await {
        Ok(op) => WorkerOutcome::Completed(op),
        Err(e) => WorkerOutcome::Aborted(e),
    };

    WorkerReport {
        identity,
        session_id: Some(client.session_id()).filter(|&id| id != 0),
        state: client.state(),
        outcome,
    }
}

//! Participant Coordinator
//!
//! Fans one transition instruction out to every participant concurrently.
//! Each send is bounded by the configured timeout and nothing is retried
//! within one call: a participant that times out, is unreachable or answers
//! with an error is reported in `PartialFailure` and the whole request is
//! retried by the caller. Participants that did acknowledge are not rolled
//! back.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use super::types::{InstructionReply, Participant, ParticipantClient, ParticipantStatus};
use crate::errors::{TransitionError, TransitionResult};
use crate::flag::{FeatureLevels, TargetLevel};
use crate::lock::{held_resources, with_held};
use crate::observability::Logger;

/// Per-participant outcome of a successful propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    pub target_version: String,
    /// `(participant id, status)` in directory order.
    pub statuses: Vec<(String, ParticipantStatus)>,
}

impl PropagationReport {
    pub fn acknowledged(&self) -> usize {
        self.statuses
            .iter()
            .filter(|(_, status)| status.is_acknowledged())
            .count()
    }

    /// Ids of participants that did not acknowledge, in directory order.
    pub fn failed(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|(_, status)| !status.is_acknowledged())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Sends transition instructions to participants.
pub struct ParticipantCoordinator {
    client: Arc<dyn ParticipantClient>,
    timeout: Duration,
    levels: FeatureLevels,
}

impl ParticipantCoordinator {
    pub fn new(client: Arc<dyn ParticipantClient>, timeout: Duration, levels: FeatureLevels) -> Self {
        Self {
            client,
            timeout,
            levels,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Instruct every participant to move to `target`.
    ///
    /// Succeeds only if all of them acknowledge. An empty list succeeds.
    pub async fn propagate(
        &self,
        target: TargetLevel,
        participants: &[Participant],
    ) -> TransitionResult<PropagationReport> {
        let target_version = self.levels.version_of(target).to_string();
        let mut statuses = vec![ParticipantStatus::Pending; participants.len()];

        // Sends run on behalf of the calling attempt, so an in-process
        // participant that routes back to this node sees the lock as held.
        let held = held_resources();
        let mut join_set = JoinSet::new();
        for (index, participant) in participants.iter().cloned().enumerate() {
            let client = Arc::clone(&self.client);
            let version = target_version.clone();
            let timeout = self.timeout;
            join_set.spawn(with_held(held.clone(), async move {
                let sent = client.send_transition_instruction(&participant, &version);
                let status = match tokio::time::timeout(timeout, sent).await {
                    Ok(InstructionReply::Ack) => ParticipantStatus::Acknowledged,
                    Ok(InstructionReply::Nack { code, reason }) => {
                        ParticipantStatus::Rejected(format!("{code}: {reason}"))
                    }
                    Ok(InstructionReply::Unreachable(reason)) => {
                        ParticipantStatus::Unreachable(reason)
                    }
                    Err(_) => ParticipantStatus::TimedOut,
                };
                (index, status)
            }));
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, status)) => statuses[index] = status,
                // The slot stays Pending and counts as a failure.
                Err(err) => {
                    let detail = err.to_string();
                    Logger::error("fcv.participant.task_failed", &[("error", detail.as_str())]);
                }
            }
        }

        let report = PropagationReport {
            target_version,
            statuses: participants
                .iter()
                .map(|p| p.id.clone())
                .zip(statuses)
                .collect(),
        };

        for (id, status) in &report.statuses {
            let status_field = status.to_string();
            let fields = [
                ("participant", id.as_str()),
                ("status", status_field.as_str()),
                ("target_version", report.target_version.as_str()),
            ];
            if status.is_acknowledged() {
                Logger::info("fcv.participant.acknowledged", &fields);
            } else {
                Logger::warn("fcv.participant.not_acknowledged", &fields);
            }
        }

        let failed = report.failed();
        if failed.is_empty() {
            Ok(report)
        } else {
            Err(TransitionError::PartialFailure { failed })
        }
    }
}

//! In-process participant client
//!
//! Delivers instructions straight to participant controllers living in the
//! same process. Used for single-binary test clusters and by embedders that
//! run several roles together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::types::{InstructionFuture, InstructionReply, Participant, ParticipantClient};
use crate::controller::TransitionController;

#[derive(Default)]
pub struct LocalParticipantClient {
    controllers: Mutex<HashMap<String, Arc<TransitionController>>>,
}

impl LocalParticipantClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route instructions for participant `id` to `controller`.
    ///
    /// May be called after the client has been handed to a coordinator.
    pub fn register(&self, id: impl Into<String>, controller: Arc<TransitionController>) {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), controller);
    }

    pub fn with(self, id: impl Into<String>, controller: Arc<TransitionController>) -> Self {
        self.register(id, controller);
        self
    }
}

impl ParticipantClient for LocalParticipantClient {
    fn send_transition_instruction<'a>(
        &'a self,
        participant: &'a Participant,
        target_version: &'a str,
    ) -> InstructionFuture<'a> {
        Box::pin(async move {
            let routed = self
                .controllers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&participant.id)
                .cloned();
            let Some(controller) = routed else {
                return InstructionReply::Unreachable(format!(
                    "no local controller registered for '{}'",
                    participant.id
                ));
            };
            match controller.request_transition(target_version).await {
                Ok(_) => InstructionReply::Ack,
                Err(err) => InstructionReply::Nack {
                    code: err.code().to_string(),
                    reason: err.to_string(),
                },
            }
        })
    }
}

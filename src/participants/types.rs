//! Participant model and the traits the coordinator consumes

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// A node that receives transition instructions from the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub address: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// What a participant did with the current attempt's instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantStatus {
    /// No answer recorded (also the state after a panicked send task).
    Pending,
    Acknowledged,
    /// The participant answered with an error.
    Rejected(String),
    /// No answer within the per-participant timeout.
    TimedOut,
    /// The participant could not be reached.
    Unreachable(String),
}

impl ParticipantStatus {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::Rejected(_) => "rejected",
            Self::TimedOut => "timed_out",
            Self::Unreachable(_) => "unreachable",
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) | Self::Unreachable(reason) => {
                write!(f, "{} ({})", self.as_str(), reason)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// A participant's answer to one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionReply {
    Ack,
    /// The participant ran the transition and it failed; `code` is its error tag.
    Nack { code: String, reason: String },
    Unreachable(String),
}

/// Future returned by `ParticipantClient`.
pub type InstructionFuture<'a> = Pin<Box<dyn Future<Output = InstructionReply> + Send + 'a>>;

/// Sends a transition instruction to one participant.
///
/// Implementations do not apply timeouts; the coordinator bounds every call.
pub trait ParticipantClient: Send + Sync {
    fn send_transition_instruction<'a>(
        &'a self,
        participant: &'a Participant,
        target_version: &'a str,
    ) -> InstructionFuture<'a>;
}

/// Source of the current participant list.
pub trait MembershipDirectory: Send + Sync {
    /// Participants in directory order.
    fn participants(&self) -> Vec<Participant>;
}

/// A directory with a fixed participant list.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    participants: Vec<Participant>,
}

impl StaticDirectory {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self { participants }
    }
}

impl MembershipDirectory for StaticDirectory {
    fn participants(&self) -> Vec<Participant> {
        self.participants.clone()
    }
}

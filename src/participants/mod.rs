//! Coordinator-to-participant propagation
//!
//! - `ParticipantCoordinator`: concurrent fan-out with per-participant timeouts
//! - `ParticipantClient` / `MembershipDirectory`: the seams to the network
//!   and to cluster membership
//! - `LocalParticipantClient`, `TcpParticipantClient` and `ParticipantServer`:
//!   in-process and JSON-line TCP transports

mod coordinator;
mod local;
mod tcp;
mod types;

pub use coordinator::{ParticipantCoordinator, PropagationReport};
pub use local::LocalParticipantClient;
pub use tcp::{InstructionRequest, InstructionResponse, ParticipantServer, TcpParticipantClient};
pub use types::{
    InstructionFuture, InstructionReply, MembershipDirectory, Participant, ParticipantClient,
    ParticipantStatus, StaticDirectory,
};

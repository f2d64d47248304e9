//! JSON-line TCP transport for participant instructions
//!
//! One request per line, one reply per line:
//!
//! ```text
//! -> {"target_version":"8.0"}
//! <- {"status":"ack"}
//! <- {"status":"nack","code":"FCV_FATAL_FAILURE","reason":"..."}
//! ```
//!
//! A connection may carry any number of requests. The client opens a fresh
//! connection per instruction; the coordinator's timeout bounds the whole
//! exchange.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::types::{InstructionFuture, InstructionReply, Participant, ParticipantClient};
use crate::controller::TransitionController;
use crate::observability::Logger;

/// Wire request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRequest {
    pub target_version: String,
}

/// Wire reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstructionResponse {
    Ack,
    Nack { code: String, reason: String },
}

/// Sends instructions to `Participant::address` over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpParticipantClient;

impl TcpParticipantClient {
    pub fn new() -> Self {
        Self
    }

    async fn exchange(address: &str, target_version: &str) -> io::Result<InstructionResponse> {
        let stream = TcpStream::connect(address).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(&InstructionRequest {
            target_version: target_version.to_string(),
        })?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reply = String::new();
        let read = BufReader::new(read_half).read_line(&mut reply).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            ));
        }
        serde_json::from_str(reply.trim_end()).map_err(io::Error::from)
    }
}

impl ParticipantClient for TcpParticipantClient {
    fn send_transition_instruction<'a>(
        &'a self,
        participant: &'a Participant,
        target_version: &'a str,
    ) -> InstructionFuture<'a> {
        Box::pin(async move {
            match Self::exchange(&participant.address, target_version).await {
                Ok(InstructionResponse::Ack) => InstructionReply::Ack,
                Ok(InstructionResponse::Nack { code, reason }) => {
                    InstructionReply::Nack { code, reason }
                }
                Err(err) => InstructionReply::Unreachable(format!("{}: {}", participant.address, err)),
            }
        })
    }
}

/// Accepts instructions and applies them to a participant controller.
pub struct ParticipantServer {
    listener: TcpListener,
    controller: Arc<TransitionController>,
}

impl ParticipantServer {
    pub async fn bind(address: &str, controller: Arc<TransitionController>) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            controller,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the task is dropped or accepting fails.
    pub async fn serve(self) -> io::Result<()> {
        let address = self.local_addr()?.to_string();
        Logger::info("fcv.server.listening", &[("address", address.as_str())]);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let controller = Arc::clone(&self.controller);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, controller).await {
                    let peer = peer.to_string();
                    let detail = err.to_string();
                    Logger::warn(
                        "fcv.server.connection_failed",
                        &[("error", detail.as_str()), ("peer", peer.as_str())],
                    );
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    controller: Arc<TransitionController>,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<InstructionRequest>(&line) {
            Ok(request) => match controller.request_transition(&request.target_version).await {
                Ok(_) => InstructionResponse::Ack,
                Err(err) => InstructionResponse::Nack {
                    code: err.code().to_string(),
                    reason: err.to_string(),
                },
            },
            Err(err) => InstructionResponse::Nack {
                code: "FCV_MALFORMED_REQUEST".to_string(),
                reason: err.to_string(),
            },
        };

        let mut reply = serde_json::to_string(&response)?;
        reply.push('\n');
        write_half.write_all(reply.as_bytes()).await?;
        write_half.flush().await?;
    }
    Ok(())
}

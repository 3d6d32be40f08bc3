use crate::pipeline::FramePipeline;
use crate::telemetry::Metrics;
use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use thiserror::Error;

/// The only message shape spoken on the wire, in both directions:
/// `{"frame": "<base64-encoded JPEG bytes>"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FrameEnvelope {
    pub frame: String,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("Invalid base64 frame payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Unsupported binary message")]
    BinaryMessage,
}

/// One client connection's lifecycle. The loop is fully sequential: a frame
/// is decoded, inferred, annotated, and sent back before the next message is
/// read. Sessions are isolated; they share only the pipeline's read-only
/// adapters.
pub struct Session {
    pipeline: Arc<FramePipeline>,
    metrics: Arc<Metrics>,
}

impl Session {
    pub fn new(pipeline: Arc<FramePipeline>, metrics: Arc<Metrics>) -> Self {
        Self { pipeline, metrics }
    }

    pub async fn run(self, mut socket: WebSocket) {
        tracing::info!("Session opened");
        self.metrics.record_session_opened();

        while let Some(message) = socket.recv().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::info!("Transport error, closing session: {e}");
                    break;
                }
            };

            match message {
                Message::Text(text) => {
                    let frame_bytes = match parse_envelope(text.as_str()) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::error!("Protocol error, closing session: {e}");
                            break;
                        }
                    };

                    let started = Instant::now();
                    match self.pipeline.process(&frame_bytes) {
                        Ok(annotated) => {
                            self.metrics
                                .record_frame(started.elapsed().as_millis() as u64);
                            let reply = encode_envelope(&annotated);
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                tracing::info!("Send failed, closing session");
                                break;
                            }
                        }
                        // Frame-scoped failure: drop the output, keep the
                        // session open for the next message.
                        Err(e) => {
                            self.metrics.record_frame_dropped();
                            tracing::error!("Dropping frame: {e}");
                        }
                    }
                }
                Message::Binary(_) => {
                    tracing::error!(
                        "Protocol error, closing session: {}",
                        ProtocolError::BinaryMessage
                    );
                    break;
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        tracing::info!("Session closed");
    }
}

fn parse_envelope(text: &str) -> Result<Vec<u8>, ProtocolError> {
    let envelope: FrameEnvelope = serde_json::from_str(text)?;
    Ok(BASE64.decode(envelope.frame.as_bytes())?)
}

fn encode_envelope(frame_bytes: &[u8]) -> String {
    let envelope = FrameEnvelope {
        frame: BASE64.encode(frame_bytes),
    };
    // A struct of one string field always serialises.
    serde_json::to_string(&envelope).unwrap_or_default()
}

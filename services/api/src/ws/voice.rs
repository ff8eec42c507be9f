//! Glue between the WebSocket session and the voice chunk sequencer.
//!
//! Chunks arrive base64-encoded with explicit sequence numbers; transcription
//! fires immediately per chunk while the sequencer guarantees the transcript
//! is assembled in order. Stopping the recording feeds the assembled text
//! through the ordinary message cycle.

use crate::state::AppState;
use crate::ws::{cycle, protocol::ServerMessage};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use mentor_core::quota::Tier;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-connection recording state.
#[derive(Default)]
pub struct VoiceControl {
    active: Option<Uuid>,
}

impl VoiceControl {
    pub async fn start(
        &mut self,
        state: &AppState,
        session_id: Uuid,
        user_id: &str,
    ) -> anyhow::Result<()> {
        if self.active.is_some() {
            let _ = state
                .registry
                .send(
                    session_id,
                    ServerMessage::Error {
                        message: "A recording is already in progress.".to_string(),
                    },
                )
                .await;
            return Ok(());
        }
        let voice_session_id = state.sequencer.open_session(user_id).await;
        self.active = Some(voice_session_id);
        let _ = state
            .registry
            .send(session_id, ServerMessage::VoiceStarted { voice_session_id })
            .await;
        Ok(())
    }

    pub async fn chunk(
        &mut self,
        state: &AppState,
        session_id: Uuid,
        seq: u32,
        data: &str,
    ) -> anyhow::Result<()> {
        let Some(voice_session_id) = self.active else {
            warn!(%session_id, "voice chunk received with no active recording");
            return Ok(());
        };
        let audio = match BASE64.decode(data) {
            Ok(audio) => Bytes::from(audio),
            Err(e) => {
                let _ = state
                    .registry
                    .send(
                        session_id,
                        ServerMessage::Error {
                            message: format!("Audio chunk {} is not valid base64: {}", seq, e),
                        },
                    )
                    .await;
                return Ok(());
            }
        };
        if let Err(e) = state.sequencer.submit_chunk(voice_session_id, seq, audio).await {
            warn!(%voice_session_id, seq, error = %e, "chunk rejected");
        }
        Ok(())
    }

    /// Closes the recording, waits for in-flight transcriptions, then runs
    /// the transcript through the message cycle as a user message.
    pub async fn stop(
        &mut self,
        state: &AppState,
        session_id: Uuid,
        user_id: &str,
        tier: Tier,
    ) -> anyhow::Result<()> {
        let Some(voice_session_id) = self.active.take() else {
            warn!(%session_id, "voice stop received with no active recording");
            return Ok(());
        };
        let text = match state.sequencer.close_session(voice_session_id).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%voice_session_id, error = %e, "failed to close voice session");
                return Ok(());
            }
        };
        let _ = state
            .registry
            .send(session_id, ServerMessage::TranscriptFinal { text: text.clone() })
            .await;

        if text.trim().is_empty() {
            info!(%voice_session_id, "empty transcript, nothing to process");
            return Ok(());
        }
        cycle::handle_user_message(state, session_id, user_id, tier, &text).await
    }

    /// Called on disconnect: drains the recording in the background so
    /// captured audio is not silently dropped mid-transcription.
    pub fn abandon(&mut self, state: &AppState) {
        if let Some(voice_session_id) = self.active.take() {
            let sequencer = state.sequencer.clone();
            tokio::spawn(async move {
                match sequencer.close_session(voice_session_id).await {
                    Ok(text) => {
                        info!(%voice_session_id, chars = text.len(), "drained abandoned recording")
                    }
                    Err(e) => warn!(%voice_session_id, error = %e, "failed to drain recording"),
                }
            });
        }
    }
}

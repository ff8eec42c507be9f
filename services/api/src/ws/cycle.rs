//! The message cycle: everything that happens between an inbound user
//! message and the events fanned out to the user's sessions.
//!
//! Order matters here. The quota gate runs before anything touches the
//! completion provider, the user turn is appended (and fanned out) before
//! the provider call, and directives execute sequentially in the order the
//! parser found them so later ones observe earlier active-entity updates.

use crate::state::AppState;
use crate::ws::protocol::ServerMessage;
use mentor_core::context::{ConversationTurn, Role};
use mentor_core::parser;
use mentor_core::quota::{QuotaError, Tier};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

/// Remaining-message count at which clients start seeing quota warnings.
const QUOTA_WARNING_THRESHOLD: u32 = 5;

/// Handles a single inbound user message end to end.
///
/// Per-directive failures never fail the reply: the display text and the
/// other directives' events are still delivered. Only infrastructure
/// failures (the registry losing the session, for instance) bubble up.
pub async fn handle_user_message(
    state: &AppState,
    session_id: Uuid,
    user_id: &str,
    tier: Tier,
    text: &str,
) -> anyhow::Result<()> {
    // Quota first: a rejected message must not consume a completion call.
    match state.quota.check_and_increment(user_id, tier).await {
        Ok(decision) => {
            if let Some(remaining) = decision.remaining {
                if remaining <= QUOTA_WARNING_THRESHOLD {
                    state
                        .fanout
                        .publish(user_id, ServerMessage::QuotaWarning { remaining })
                        .await;
                }
            }
        }
        Err(e @ QuotaError::Exceeded { .. }) => {
            info!(user_id, "message rejected by quota gate");
            let _ = state
                .registry
                .send(
                    session_id,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                )
                .await;
            return Ok(());
        }
        Err(QuotaError::Store(e)) => {
            warn!(user_id, error = %e, "usage store failure");
            let _ = state
                .registry
                .send(
                    session_id,
                    ServerMessage::Error {
                        message: "Could not verify your message quota. Please retry.".to_string(),
                    },
                )
                .await;
            return Ok(());
        }
    }

    let user_turn = ConversationTurn::new(user_id, Role::User, text);
    let context = state.context.append_turn(user_turn.clone()).await;
    state
        .fanout
        .publish(user_id, ServerMessage::TurnAdded { turn: user_turn })
        .await;

    let window: Vec<ConversationTurn> = context.recent_turns.iter().cloned().collect();
    let raw = match state.completion.complete(&state.system_prompt, &window).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(user_id, error = %e, "completion call failed");
            let _ = state
                .registry
                .send(
                    session_id,
                    ServerMessage::Error {
                        message: "The assistant is unavailable right now. Please retry."
                            .to_string(),
                    },
                )
                .await;
            return Ok(());
        }
    };

    // The assistant turn id is fixed before parsing so directive ids derived
    // from it stay stable if this reply is ever re-parsed.
    let assistant_turn_id = Uuid::new_v4();
    let parsed = parser::parse(assistant_turn_id, &raw);
    for warning in &parsed.warnings {
        // Expected, recoverable model output mismatch; logged, never shown.
        warn!(user_id, %assistant_turn_id, warning = %warning, "dropped action block");
    }

    let assistant_turn = ConversationTurn {
        turn_id: assistant_turn_id,
        user_id: user_id.to_string(),
        role: Role::Assistant,
        text: parsed.display_text.clone(),
        created_at: Utc::now(),
        action_refs: parsed.directives.iter().map(|d| d.action_id).collect(),
    };
    state.context.append_turn(assistant_turn.clone()).await;
    state
        .fanout
        .publish(
            user_id,
            ServerMessage::TurnAdded {
                turn: assistant_turn,
            },
        )
        .await;

    for directive in &parsed.directives {
        let record = state.executor.execute(user_id, directive).await;
        state
            .fanout
            .publish(user_id, ServerMessage::from_record(&record))
            .await;
    }

    Ok(())
}

//! Intent/Action Parser
//!
//! The assistant is instructed to embed action blocks in its replies between
//! the fixed markers `<<action>>` and `<</action>>`, each containing one JSON
//! object. This module locates the marker pairs, hands the interior to a JSON
//! decoder, and validates the declared `type` against the typed payload
//! schemas. Blocks that fail any of those steps are dropped with a warning;
//! the conversation continues with the display text alone.

use crate::action::{ActionDirective, ActionPayload};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

pub const ACTION_OPEN: &str = "<<action>>";
pub const ACTION_CLOSE: &str = "<</action>>";

/// Non-fatal problems encountered while extracting action blocks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseWarning {
    #[error("action block opened at byte {position} was never closed")]
    UnclosedBlock { position: usize },
    #[error("action block is not valid JSON: {detail}")]
    MalformedJson { detail: String },
    #[error("unknown action type '{declared}'")]
    UnknownType { declared: String },
    #[error("payload for '{declared}' failed validation: {detail}")]
    InvalidPayload { declared: String, detail: String },
}

/// The outcome of parsing one raw assistant reply.
#[derive(Debug, Clone)]
pub struct ParsedReply {
    /// The reply with action blocks stripped and whitespace runs collapsed.
    pub display_text: String,
    /// Directives in the order their blocks appeared in the text.
    pub directives: Vec<ActionDirective>,
    pub warnings: Vec<ParseWarning>,
}

/// Untyped shape of an action block, decoded before schema validation.
#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    declared: String,
    #[serde(default)]
    action_id: Option<Uuid>,
    #[serde(default)]
    payload: Value,
}

/// Extracts action directives from a raw assistant reply.
///
/// Directive ids are stable across re-parses: an explicit `action_id` in the
/// block wins, otherwise the id is derived from `(source_turn_id, block
/// index)`, so retrying a whole turn against identical model output produces
/// identical ids and the executor's idempotency applies.
pub fn parse(source_turn_id: Uuid, raw: &str) -> ParsedReply {
    let mut display = String::with_capacity(raw.len());
    let mut directives = Vec::new();
    let mut warnings = Vec::new();
    let mut rest = raw;
    let mut consumed = 0usize;
    let mut block_index = 0u32;

    while let Some(open) = rest.find(ACTION_OPEN) {
        display.push_str(&rest[..open]);
        let after_open = &rest[open + ACTION_OPEN.len()..];
        let Some(close) = after_open.find(ACTION_CLOSE) else {
            // A dangling open marker means the model truncated its own block.
            // Drop everything from the marker on rather than leaking raw JSON
            // into the display text.
            warnings.push(ParseWarning::UnclosedBlock {
                position: consumed + open,
            });
            rest = "";
            break;
        };
        let body = &after_open[..close];
        match decode_block(source_turn_id, block_index, body) {
            Ok(directive) => directives.push(directive),
            Err(warning) => warnings.push(warning),
        }
        block_index += 1;
        consumed += open + ACTION_OPEN.len() + close + ACTION_CLOSE.len();
        rest = &after_open[close + ACTION_CLOSE.len()..];
    }
    display.push_str(rest);

    ParsedReply {
        display_text: squeeze_whitespace(&display),
        directives,
        warnings,
    }
}

fn decode_block(
    source_turn_id: Uuid,
    block_index: u32,
    body: &str,
) -> Result<ActionDirective, ParseWarning> {
    let raw: RawBlock =
        serde_json::from_str(body.trim()).map_err(|e| ParseWarning::MalformedJson {
            detail: e.to_string(),
        })?;

    let tagged = serde_json::json!({ "type": raw.declared, "payload": raw.payload });
    let payload: ActionPayload = match serde_json::from_value(tagged) {
        Ok(payload) => payload,
        Err(e) => {
            let detail = e.to_string();
            // serde reports an unrecognized tag as "unknown variant"; that is
            // the drop-and-warn case for action types we have no schema for.
            return if detail.contains("unknown variant") {
                Err(ParseWarning::UnknownType {
                    declared: raw.declared,
                })
            } else {
                Err(ParseWarning::InvalidPayload {
                    declared: raw.declared,
                    detail,
                })
            };
        }
    };

    let action_id = raw
        .action_id
        .unwrap_or_else(|| derive_action_id(source_turn_id, block_index));

    Ok(ActionDirective {
        action_id,
        source_turn_id,
        payload,
    })
}

/// Deterministic id for blocks that carry no explicit `action_id`.
fn derive_action_id(source_turn_id: Uuid, block_index: u32) -> Uuid {
    let name = format!("{}/{}", source_turn_id, block_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Collapses the whitespace runs left behind by stripped blocks: horizontal
/// runs become one space, runs containing two or more newlines become a
/// single blank line, and the ends are trimmed.
fn squeeze_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if !c.is_whitespace() {
            out.push(c);
            continue;
        }
        let mut newlines = usize::from(c == '\n');
        while let Some(&next) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            newlines += usize::from(next == '\n');
            chars.next();
        }
        if newlines >= 2 {
            out.push_str("\n\n");
        } else if newlines == 1 {
            out.push('\n');
        } else {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

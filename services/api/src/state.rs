//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the engine components and the external collaborator
//! clients. All fields are public to be accessible from other modules.

use crate::config::Config;
use crate::ws::{fanout::EventFanout, registry::SessionRegistry};
use mentor_core::{
    context::ContextStore, executor::ActionExecutor, llm::CompletionClient, quota::QuotaGate,
    transcript::VoiceSequencer,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub fanout: Arc<EventFanout>,
    pub context: Arc<ContextStore>,
    pub executor: Arc<ActionExecutor>,
    pub sequencer: Arc<VoiceSequencer>,
    pub quota: Arc<QuotaGate>,
    pub completion: Arc<dyn CompletionClient>,
    pub system_prompt: Arc<String>,
    pub config: Arc<Config>,
}

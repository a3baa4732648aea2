//! Shared Application State
//!
//! The `AppState` struct holds the shared, clonable resources every
//! handler needs: the durable store, the session registry, the access
//! guard, the remote capability clients and their admission gates.

use crate::config::Config;
use parley_core::gate::CallGate;
use parley_core::guard::AccessGuard;
use parley_core::llm::LanguageClient;
use parley_core::session::SessionRegistry;
use parley_core::speech::SpeechClient;
use parley_core::store::SessionStore;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub registry: Arc<SessionRegistry>,
    pub guard: AccessGuard,
    pub speech: Arc<dyn SpeechClient>,
    pub llm: Arc<dyn LanguageClient>,
    pub transcription_gate: Arc<CallGate>,
    pub synthesis_gate: Arc<CallGate>,
    pub config: Arc<Config>,
}

//! Shared application state passed to all API handlers.

use std::sync::Arc;

use cce_domain::config::Config;
use cce_memory::{EpisodicStore, UserFactStore};
use cce_providers::SearchProvider;
use cce_sessions::TierStore;

use crate::cancel::CancelMap;
use crate::orchestrator::Orchestrator;
use crate::session_manager::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub tier_store: Arc<TierStore>,
    pub episodic_store: Arc<EpisodicStore>,
    pub user_fact_store: Arc<UserFactStore>,
    pub session_manager: Arc<SessionManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub cancel_map: Arc<CancelMap>,
}

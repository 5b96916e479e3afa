use std::fmt;
use std::sync::Arc;

use neonvend_core::database::ports::LedgerStore;
use neonvend_core::{CreditIngestor, LeaseManager, RedemptionEngine, SessionDirectory};

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn LedgerStore>,
    pub sessions: Arc<SessionDirectory>,
    pub leases: Arc<LeaseManager>,
    pub credits: Arc<CreditIngestor>,
    pub redemptions: Arc<RedemptionEngine>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn credits(&self) -> &CreditIngestor {
        &self.credits
    }

    pub fn redemptions(&self) -> &RedemptionEngine {
        &self.redemptions
    }
}

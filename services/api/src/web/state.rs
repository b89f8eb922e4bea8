//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use nodues_core::{
    AccountStore, AssignmentService, ClearanceGenerator, ClearanceStore, ClearanceTracker,
    RosterAggregator, RosterStore,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<dyn AccountStore>,
    pub aggregator: Arc<RosterAggregator>,
    pub generator: Arc<ClearanceGenerator>,
    pub tracker: Arc<ClearanceTracker>,
    pub assignments: Arc<AssignmentService>,
}

impl AppState {
    /// Wires every workflow service to the given stores.
    pub fn new(
        config: Arc<Config>,
        roster: Arc<dyn RosterStore>,
        clearances: Arc<dyn ClearanceStore>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        let department = config.department.clone();
        let timeout = config.store_timeout;

        Self {
            aggregator: Arc::new(RosterAggregator::new(roster.clone(), department.clone(), timeout)),
            generator: Arc::new(ClearanceGenerator::new(
                roster.clone(),
                clearances.clone(),
                department.clone(),
                timeout,
            )),
            tracker: Arc::new(
                ClearanceTracker::new(roster.clone(), clearances, department.clone(), timeout)
                    .with_max_attempts(config.transition_attempts),
            ),
            assignments: Arc::new(AssignmentService::new(roster, department, timeout)),
            accounts,
            config,
        }
    }
}

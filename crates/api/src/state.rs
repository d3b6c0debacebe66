use chrono_tz::Tz;
use sentinel_core::Config;
use sentinel_detection::{EscalationEngine, IngestPipeline, ItsEngine, Repository};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repository: Arc<dyn Repository>,
    pub pipeline: Arc<IngestPipeline>,
    pub its: Arc<ItsEngine>,
    pub escalation: Arc<EscalationEngine>,
    /// Display timezone applied to every timestamp on the read side.
    pub display_tz: Tz,
}

//! Structured-output generation for plant records.
//!
//! [`engine::StructuredClient`] obtains schema-conformant JSON from the
//! generative text service across three escalating tiers; [`parse`] digs the
//! JSON out of whatever response shape came back; [`orchestrator`] decides
//! which field groups of a record are stale and regenerates them.

mod deadline;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod parse;
pub mod prompt;
pub mod protocol;

pub use engine::{AttemptOutcome, GenerationReport, RegenerationRequest, StructuredClient, Tier};
pub use error::{GenerationError, OrchestratorError, TransportError};
pub use orchestrator::{Orchestrator, RefreshOutcome, RefreshPlan};
pub use protocol::{Envelope, HttpTransport, Transport};

use fernbook_core::GeneratorSettings;

/// Client talking HTTP to the service configured in `settings`.
pub fn http_client(
    settings: &GeneratorSettings,
) -> Result<StructuredClient<HttpTransport>, TransportError> {
    Ok(StructuredClient::new(HttpTransport::from_settings(settings)?))
}

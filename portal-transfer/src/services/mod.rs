//! Transfer services
//!
//! Leaf-first: retry policy, remote UI driver, record selector and
//! outcome sink, then the job registry, the orchestrator and the
//! service facade used by the HTTP API.

pub mod driver;
pub mod job_registry;
pub mod orchestrator;
pub mod outcome_sink;
pub mod record_selector;
pub mod retry;
pub mod transfer_service;

pub use driver::{DriverError, DriverFactory, PortalDriver, SubmitOutcome};
pub use job_registry::{JobHandle, JobRegistry};
pub use orchestrator::TransferOrchestrator;
pub use outcome_sink::{OutcomeSink, SqliteOutcomeSink};
pub use record_selector::{RecordSelector, SqliteRecordSelector};
pub use retry::{retry, retry_while, RetryError, RetryPolicy};
pub use transfer_service::{StartedJob, TransferService, TransferServiceError};

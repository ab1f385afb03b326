//! Data models for transfer jobs and records

pub mod transfer_job;
pub mod transfer_record;

pub use portal_common::events::{JobStatus, TransferError, TransferSummary};
pub use transfer_job::{StateTransition, TransferFilters, TransferJob, TransferProgress};
pub use transfer_record::{PortalFields, TransferRecord};

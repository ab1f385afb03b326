//! Remote UI driver
//!
//! One driver owns one automated browser session against the portal. The
//! orchestrator depends only on [`PortalDriver`]; the WebDriver backend in
//! [`portal`] is one implementation of it.

pub mod portal;
pub mod webdriver;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::RuntimeSettings;
use crate::models::TransferRecord;
use crate::services::retry::RetryError;

pub use portal::{WebDriverPortal, WebDriverPortalFactory};

/// Result of submitting one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The portal reported success
    Submitted,
    /// Business failure: entity not found, submission rejected
    Rejected { reason: String },
}

/// Driver failures
#[derive(Debug, Error)]
pub enum DriverError {
    /// The environment could not produce a browser session
    #[error("Failed to launch browser session: {0}")]
    Launch(String),

    /// The WebDriver server could not be reached
    #[error("WebDriver transport error: {0}")]
    Transport(String),

    /// The browser session is gone (window closed, driver restarted)
    #[error("Browser session lost: {0}")]
    SessionLost(String),

    /// An operation was attempted without a live session
    #[error("No browser session")]
    NoSession,

    #[error("Element not found: {locator}")]
    ElementNotFound { locator: String },

    /// The status element still shows what it showed before the submit
    #[error("Portal showed no fresh status after submit")]
    NoFreshStatus,

    /// Any other W3C error response
    #[error("WebDriver error '{error}': {message}")]
    Protocol { error: String, message: String },

    /// The human did not complete the login handshake in time
    #[error("Login handshake not completed within {}s", .0.as_secs())]
    HandshakeTimeout(Duration),

    /// The page after login is not a known logged-in page
    #[error("Unrecognized page after login: {0}")]
    UnrecognizedLanding(String),

    /// A retry-wrapped interaction failed on every attempt
    #[error(transparent)]
    Exhausted(Box<RetryError<DriverError>>),
}

impl DriverError {
    /// Whether this failure means the session itself is unusable
    ///
    /// Session-fatal errors abort the whole job; everything else is a
    /// per-record failure.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            DriverError::Launch(_)
            | DriverError::Transport(_)
            | DriverError::SessionLost(_)
            | DriverError::NoSession
            | DriverError::HandshakeTimeout(_)
            | DriverError::UnrecognizedLanding(_) => true,
            DriverError::ElementNotFound { .. }
            | DriverError::NoFreshStatus
            | DriverError::Protocol { .. } => false,
            DriverError::Exhausted(retry) => retry.source.is_session_fatal(),
        }
    }
}

impl From<RetryError<DriverError>> for DriverError {
    fn from(err: RetryError<DriverError>) -> Self {
        DriverError::Exhausted(Box::new(err))
    }
}

/// Operations on one remote portal session
///
/// Calls are strictly sequential; a driver is owned by exactly one job run.
#[async_trait]
pub trait PortalDriver: Send {
    /// Launch the session, apply timeouts and identity, open the landing page
    ///
    /// Failure is fatal and not retried.
    async fn initialize(&mut self) -> Result<(), DriverError>;

    /// Wait for the human-completed login handshake
    ///
    /// Blocks until the page leaves the login screen or the handshake
    /// ceiling elapses, then validates the resulting URL.
    async fn authenticate(&mut self) -> Result<(), DriverError>;

    /// Click through the menu path to the bulk entry form
    async fn navigate_to_entry_point(&mut self) -> Result<(), DriverError>;

    /// Enter one record
    ///
    /// Business failures come back as [`SubmitOutcome::Rejected`]; `Err` is
    /// reserved for infrastructure failures.
    async fn submit_record(&mut self, record: &TransferRecord) -> Result<SubmitOutcome, DriverError>;

    /// Tear down the session
    ///
    /// Safe to call from any state and more than once.
    async fn close(&mut self);
}

/// Creates one driver per job
pub trait DriverFactory: Send + Sync {
    fn create(&self, job_id: Uuid, settings: &RuntimeSettings) -> Box<dyn PortalDriver>;
}

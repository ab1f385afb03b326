//! Portal driver on top of WebDriver
//!
//! Every element the driver touches comes from [`PortalLayout`]; every
//! timeout and retry budget comes from [`RuntimeSettings`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::webdriver::{capabilities, xpath_literal, ElementRef, WebDriverClient, WebDriverSession};
use super::{DriverError, DriverFactory, PortalDriver, SubmitOutcome};
use crate::config::{Locator, PortalLayout, RuntimeSettings, WebDriverConfig};
use crate::models::TransferRecord;

/// Drives the portal through one WebDriver session
pub struct WebDriverPortal {
    job_id: Uuid,
    client: WebDriverClient,
    webdriver: WebDriverConfig,
    layout: Arc<PortalLayout>,
    settings: RuntimeSettings,
    session: Option<WebDriverSession>,
}

impl WebDriverPortal {
    pub fn new(
        job_id: Uuid,
        client: WebDriverClient,
        webdriver: WebDriverConfig,
        layout: Arc<PortalLayout>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            job_id,
            client,
            webdriver,
            layout,
            settings,
            session: None,
        }
    }

    fn session(&self) -> Result<&WebDriverSession, DriverError> {
        self.session.as_ref().ok_or(DriverError::NoSession)
    }

    async fn open_session(&mut self) -> Result<(), DriverError> {
        let caps = capabilities(&self.webdriver, &self.layout.user_agent);
        let request_timeout = self.settings.navigation_timeout + self.settings.operation_timeout;
        let session = self.client.new_session(caps, request_timeout).await?;

        info!(
            job_id = %self.job_id,
            session_id = %session.session_id(),
            browser = %self.webdriver.browser,
            "Browser session started"
        );

        // Stored before configuring so close() can tear it down if a later step fails
        self.session = Some(session);
        let session = self.session()?;

        session
            .set_timeouts(self.settings.operation_timeout, self.settings.navigation_timeout)
            .await?;
        session
            .set_window_size(self.layout.viewport_width, self.layout.viewport_height)
            .await?;
        session.navigate(&self.layout.landing_url).await?;

        Ok(())
    }

    /// Fill the entry form for one record, submit it and return the status text
    async fn enter_record(&self, record: &TransferRecord) -> Result<String, DriverError> {
        let session = self.session()?;
        let layout = self.layout.as_ref();
        let fields = &record.fields;

        fill(session, &layout.search_input, &fields.lookup_key).await?;
        let button = session.find_element(&layout.search_button).await?;
        session.click(&button).await?;

        // A result that is not rendered yet looks the same as a missing one
        let result_locator = layout.search_result.with_key(&fields.lookup_key);
        let locator = &result_locator;
        self.settings
            .open_retry()
            .run_while(
                move || async move {
                    let row = session.find_element(locator).await?;
                    session.click(&row).await
                },
                is_retryable,
            )
            .await?;

        select_option(session, &layout.category_select, &fields.category).await?;

        // Subcategory options load after the category changes
        self.settings
            .open_retry()
            .labeled("select subcategory")
            .run_while(
                move || select_option(session, &layout.subcategory_select, &fields.subcategory),
                is_retryable,
            )
            .await?;

        fill(session, &layout.summary_input, &fields.summary).await?;
        fill(session, &layout.date_input, &fields.date_text()).await?;
        fill(session, &layout.time_input, &fields.time_text()).await?;
        fill(session, &layout.duration_input, &fields.duration_minutes.to_string()).await?;
        fill(
            session,
            &layout.participants_input,
            &fields.participant_count.to_string(),
        )
        .await?;

        let before = self.status_snapshot(session).await?;

        let submit = session.find_element(&layout.submit_button).await?;
        session.click(&submit).await?;

        tokio::time::sleep(self.settings.submit_settle).await;

        // The banner of the previous record must not count for this one
        let before = &before;
        self.settings
            .status_retry()
            .run_while(
                move || fresh_status(session, &layout.status_message, before),
                is_retryable,
            )
            .await
            .map_err(DriverError::from)
    }

    /// Status element and text as they are before a submit
    async fn status_snapshot(&self, session: &WebDriverSession) -> Result<StatusSnapshot, DriverError> {
        // Before the first submit the element may not exist; don't wait for it
        session.set_implicit_wait(Duration::ZERO).await?;
        let found = session.find_elements(&self.layout.status_message).await;
        session.set_implicit_wait(self.settings.operation_timeout).await?;

        let Some(element) = found?.into_iter().next() else {
            return Ok(StatusSnapshot::default());
        };

        let text = match session.text(&element).await {
            Ok(text) => text,
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(_) => String::new(),
        };

        Ok(StatusSnapshot {
            element: Some(element),
            text,
        })
    }
}

#[derive(Debug, Default)]
struct StatusSnapshot {
    element: Option<ElementRef>,
    text: String,
}

/// Read the status text once it is known to come from the latest submit
///
/// Fresh means the element was replaced or its text changed.
async fn fresh_status(
    session: &WebDriverSession,
    locator: &Locator,
    before: &StatusSnapshot,
) -> Result<String, DriverError> {
    let element = session.find_element(locator).await?;
    let text = session.text(&element).await?;

    let replaced = before.element.as_ref() != Some(&element);
    if replaced || text.trim() != before.text.trim() {
        Ok(text)
    } else {
        Err(DriverError::NoFreshStatus)
    }
}

/// Session-fatal failures are not worth another attempt
fn is_retryable(err: &DriverError) -> bool {
    !err.is_session_fatal()
}

async fn fill(session: &WebDriverSession, locator: &Locator, text: &str) -> Result<(), DriverError> {
    let element = session.find_element(locator).await?;
    session.clear(&element).await?;
    session.send_keys(&element, text).await
}

/// Pick the option of a `<select>` whose visible text is `option_text`
async fn select_option(
    session: &WebDriverSession,
    select: &Locator,
    option_text: &str,
) -> Result<(), DriverError> {
    let element = session.find_element(select).await?;
    let option = Locator::xpath(format!(
        ".//option[normalize-space(.)={}]",
        xpath_literal(option_text.trim())
    ));
    let option = session.find_child(&element, &option).await?;
    session.click(&option).await
}

/// Poll until the page URL differs from `login_url`, returning the new URL
async fn wait_for_navigation(
    session: &WebDriverSession,
    login_url: &str,
    poll: Duration,
) -> Result<String, DriverError> {
    loop {
        tokio::time::sleep(poll).await;
        let url = session.current_url().await?;
        if url != login_url {
            return Ok(url);
        }
    }
}

#[async_trait]
impl PortalDriver for WebDriverPortal {
    async fn initialize(&mut self) -> Result<(), DriverError> {
        if self.session.is_some() {
            return Ok(());
        }

        self.open_session().await.map_err(|e| match e {
            launch @ DriverError::Launch(_) => launch,
            other => DriverError::Launch(other.to_string()),
        })
    }

    async fn authenticate(&mut self) -> Result<(), DriverError> {
        let session = self.session()?;
        let login_url = session.current_url().await?;

        if let Err(e) = session.find_element(&self.layout.handshake_code).await {
            if e.is_session_fatal() {
                return Err(e);
            }
            warn!(job_id = %self.job_id, error = %e, "Handshake code not visible on landing page");
        }

        let ceiling = self.settings.handshake_timeout;
        info!(
            job_id = %self.job_id,
            timeout_s = ceiling.as_secs(),
            "Waiting for login handshake"
        );

        let landed = tokio::time::timeout(
            ceiling,
            wait_for_navigation(session, &login_url, self.settings.handshake_poll),
        )
        .await
        .map_err(|_| DriverError::HandshakeTimeout(ceiling))??;

        if !self.layout.is_logged_in_url(&landed) {
            return Err(DriverError::UnrecognizedLanding(landed));
        }

        info!(job_id = %self.job_id, url = %landed, "Login handshake completed");
        Ok(())
    }

    async fn navigate_to_entry_point(&mut self) -> Result<(), DriverError> {
        let session = self.session()?;
        let policy = self.settings.navigation_retry();

        for step in &self.layout.menu_path {
            policy
                .labeled(format!("navigate: {}", step.name))
                .run_while(
                    move || async move {
                        let element = session.find_element(&step.locator).await?;
                        session.click(&element).await
                    },
                    is_retryable,
                )
                .await?;

            debug!(job_id = %self.job_id, step = %step.name, "Menu step done");
        }

        info!(job_id = %self.job_id, "Reached entry form");
        Ok(())
    }

    async fn submit_record(&mut self, record: &TransferRecord) -> Result<SubmitOutcome, DriverError> {
        let outcome = match self.enter_record(record).await {
            Ok(status_text) if self.layout.is_success_status(&status_text) => SubmitOutcome::Submitted,
            Ok(status_text) if status_text.trim().is_empty() => SubmitOutcome::Rejected {
                reason: "Portal showed no status after submit".to_string(),
            },
            Ok(status_text) => SubmitOutcome::Rejected {
                reason: format!("Portal rejected record: {}", status_text.trim()),
            },
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => SubmitOutcome::Rejected {
                reason: e.to_string(),
            },
        };

        if let Some(button) = &self.layout.new_entry_button {
            let session = self.session()?;
            let reset = async {
                let element = session.find_element(button).await?;
                session.click(&element).await
            };
            if let Err(e) = reset.await {
                if e.is_session_fatal() {
                    return Err(e);
                }
                warn!(
                    job_id = %self.job_id,
                    record_key = %record.key,
                    error = %e,
                    "Could not reset entry form"
                );
            }
        }

        Ok(outcome)
    }

    async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match session.delete().await {
            Ok(()) => info!(job_id = %self.job_id, "Browser session closed"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "Failed to close browser session"),
        }
    }
}

/// Creates a [`WebDriverPortal`] per job
pub struct WebDriverPortalFactory {
    client: WebDriverClient,
    webdriver: WebDriverConfig,
    layout: Arc<PortalLayout>,
}

impl WebDriverPortalFactory {
    pub fn new(webdriver: WebDriverConfig, layout: PortalLayout) -> Result<Self, DriverError> {
        let client = WebDriverClient::new(&webdriver.url)?;
        Ok(Self {
            client,
            webdriver,
            layout: Arc::new(layout),
        })
    }
}

impl DriverFactory for WebDriverPortalFactory {
    fn create(&self, job_id: Uuid, settings: &RuntimeSettings) -> Box<dyn PortalDriver> {
        Box::new(WebDriverPortal::new(
            job_id,
            self.client.clone(),
            self.webdriver.clone(),
            self.layout.clone(),
            settings.clone(),
        ))
    }
}

//! Configuration for portal-transfer
//!
//! Two tiers:
//! 1. **TOML bootstrap** ([`ServiceConfig`]): port, root folder, logging, the
//!    WebDriver endpoint and the portal layout (URLs and UI locators).
//!    Read once at startup.
//! 2. **Database runtime** ([`RuntimeSettings`]): timeouts and retry
//!    budgets from the `settings` table, loaded at the start of every job.
//!    Missing values fall back to built-in defaults and are written back.
//!
//! Timeouts and retry counts are tuned per portal, so none of them are
//! hardcoded in the driver.

use portal_common::config::LoggingConfig;
use portal_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::db::settings;
use crate::services::driver::webdriver::xpath_literal;
use crate::services::retry::RetryPolicy;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5740;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub webdriver: WebDriverConfig,

    #[serde(default)]
    pub portal: PortalLayout,

    /// How long shutdown waits for running jobs to close their sessions
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            root_folder: None,
            logging: LoggingConfig::default(),
            webdriver: WebDriverConfig::default(),
            portal: PortalLayout::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// WebDriver endpoint used to launch browser sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebDriverConfig {
    /// Base URL of a W3C WebDriver server (chromedriver, geckodriver, grid)
    #[serde(default = "default_webdriver_url")]
    pub url: String,
    /// `chrome` or `firefox`
    #[serde(default = "default_browser")]
    pub browser: String,
    /// Headless sessions cannot show the handshake code to a human, so this
    /// defaults to false
    #[serde(default)]
    pub headless: bool,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            browser: default_browser(),
            headless: false,
        }
    }
}

fn default_webdriver_url() -> String {
    "http://127.0.0.1:9515".to_string()
}

fn default_browser() -> String {
    "chrome".to_string()
}

/// Element location strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    Css,
    Xpath,
    LinkText,
}

impl LocatorStrategy {
    /// W3C WebDriver `using` value
    pub fn as_webdriver(&self) -> &'static str {
        match self {
            LocatorStrategy::Css => "css selector",
            LocatorStrategy::Xpath => "xpath",
            LocatorStrategy::LinkText => "link text",
        }
    }
}

/// Query that finds one element on the remote page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(default = "default_strategy")]
    pub strategy: LocatorStrategy,
    pub value: String,
}

fn default_strategy() -> LocatorStrategy {
    LocatorStrategy::Css
}

impl Locator {
    pub fn css(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Css,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Xpath,
            value: value.into(),
        }
    }

    pub fn link_text(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::LinkText,
            value: value.into(),
        }
    }

    /// Substitute `{key}` in the locator value
    ///
    /// In XPath locators the key becomes a quoted literal, so a template
    /// may write either `{key}` or `'{key}'`.
    pub fn with_key(&self, key: &str) -> Self {
        let value = match self.strategy {
            LocatorStrategy::Xpath => {
                let literal = xpath_literal(key);
                self.value
                    .replace("'{key}'", &literal)
                    .replace("\"{key}\"", &literal)
                    .replace("{key}", &literal)
            }
            LocatorStrategy::Css | LocatorStrategy::LinkText => self.value.replace("{key}", key),
        };
        Self {
            strategy: self.strategy,
            value,
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.strategy.as_webdriver(), self.value)
    }
}

/// One click of the menu path to the entry form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuStep {
    pub name: String,
    pub locator: Locator,
}

/// Portal URLs, identity and UI locators
///
/// The portal has no stability contract; every locator lives here so a
/// portal redesign is a config change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalLayout {
    /// Landing page that shows the login handshake code
    pub landing_url: String,
    /// Substrings of URLs that mean "logged in"
    pub logged_in_url_patterns: Vec<String>,
    /// Element showing the scannable handshake code
    pub handshake_code: Locator,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
    /// Clicks from the home page to the bulk entry form
    pub menu_path: Vec<MenuStep>,
    pub search_input: Locator,
    pub search_button: Locator,
    /// Search result for one student; `{key}` is the lookup key
    pub search_result: Locator,
    pub category_select: Locator,
    pub subcategory_select: Locator,
    pub summary_input: Locator,
    pub date_input: Locator,
    pub time_input: Locator,
    pub duration_input: Locator,
    pub participants_input: Locator,
    pub submit_button: Locator,
    /// Element whose text reports the submission result
    pub status_message: Locator,
    /// Case-insensitive substrings of the status text that mean success
    pub success_markers: Vec<String>,
    /// Clicked after each record to get a fresh form, when the portal needs it
    pub new_entry_button: Option<Locator>,
}

impl Default for PortalLayout {
    fn default() -> Self {
        Self {
            landing_url: "https://portal.example.edu/login".to_string(),
            logged_in_url_patterns: vec!["/main".to_string(), "/home".to_string()],
            handshake_code: Locator::css("#qr-login img"),
            viewport_width: 1366,
            viewport_height: 900,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            menu_path: vec![
                MenuStep {
                    name: "Student guidance".to_string(),
                    locator: Locator::link_text("Student guidance"),
                },
                MenuStep {
                    name: "Counseling records".to_string(),
                    locator: Locator::link_text("Counseling records"),
                },
                MenuStep {
                    name: "Bulk entry".to_string(),
                    locator: Locator::css("#menu-bulk-entry"),
                },
            ],
            search_input: Locator::css("#student-search"),
            search_button: Locator::css("#student-search-btn"),
            search_result: Locator::xpath(
                "//table[@id='search-results']//tr[td[normalize-space(.)={key}]]",
            ),
            category_select: Locator::css("select#counsel-category"),
            subcategory_select: Locator::css("select#counsel-subcategory"),
            summary_input: Locator::css("textarea#counsel-summary"),
            date_input: Locator::css("input#counsel-date"),
            time_input: Locator::css("input#counsel-time"),
            duration_input: Locator::css("input#counsel-duration"),
            participants_input: Locator::css("input#counsel-participants"),
            submit_button: Locator::css("button#counsel-save"),
            status_message: Locator::css(".result-message"),
            success_markers: vec!["saved".to_string(), "success".to_string()],
            new_entry_button: None,
        }
    }
}

impl PortalLayout {
    /// Whether `url` is one of the known logged-in pages
    pub fn is_logged_in_url(&self, url: &str) -> bool {
        self.logged_in_url_patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && url.contains(pattern.as_str()))
    }

    /// Whether the status text reports success
    pub fn is_success_status(&self, status_text: &str) -> bool {
        let lowered = status_text.to_lowercase();
        self.success_markers
            .iter()
            .any(|marker| !marker.is_empty() && lowered.contains(&marker.to_lowercase()))
    }
}

/// Runtime settings keys in the `settings` table
pub mod keys {
    pub const OPERATION_TIMEOUT_MS: &str = "transfer_operation_timeout_ms";
    pub const NAVIGATION_TIMEOUT_MS: &str = "transfer_navigation_timeout_ms";
    pub const HANDSHAKE_TIMEOUT_MS: &str = "transfer_handshake_timeout_ms";
    pub const HANDSHAKE_POLL_MS: &str = "transfer_handshake_poll_ms";
    pub const NAV_RETRY_ATTEMPTS: &str = "transfer_nav_retry_attempts";
    pub const NAV_RETRY_DELAY_MS: &str = "transfer_nav_retry_delay_ms";
    pub const OPEN_RETRY_ATTEMPTS: &str = "transfer_open_retry_attempts";
    pub const OPEN_RETRY_DELAY_MS: &str = "transfer_open_retry_delay_ms";
    pub const SUBMIT_SETTLE_MS: &str = "transfer_submit_settle_ms";
}

/// Per-job timeouts and retry budgets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Implicit wait for locating elements
    pub operation_timeout: Duration,
    /// Page load timeout
    pub navigation_timeout: Duration,
    /// Ceiling on the human handshake
    pub handshake_timeout: Duration,
    /// How often the driver checks whether the handshake page navigated
    pub handshake_poll: Duration,
    pub nav_retry_attempts: u32,
    pub nav_retry_delay: Duration,
    pub open_retry_attempts: u32,
    pub open_retry_delay: Duration,
    /// Pause between submit and reading the status element
    pub submit_settle: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(180),
            handshake_poll: Duration::from_millis(500),
            nav_retry_attempts: 3,
            nav_retry_delay: Duration::from_millis(1000),
            open_retry_attempts: 3,
            open_retry_delay: Duration::from_millis(1500),
            submit_settle: Duration::from_millis(1000),
        }
    }
}

impl RuntimeSettings {
    /// Load runtime settings from the database
    ///
    /// For each setting: read it; if missing use the built-in default and
    /// write the default back so the table documents the effective value.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let settings = Self {
            operation_timeout: load_ms(pool, keys::OPERATION_TIMEOUT_MS, defaults.operation_timeout)
                .await?,
            navigation_timeout: load_ms(pool, keys::NAVIGATION_TIMEOUT_MS, defaults.navigation_timeout)
                .await?,
            handshake_timeout: load_ms(pool, keys::HANDSHAKE_TIMEOUT_MS, defaults.handshake_timeout)
                .await?,
            handshake_poll: load_ms(pool, keys::HANDSHAKE_POLL_MS, defaults.handshake_poll).await?,
            nav_retry_attempts: settings::get_or_init(
                pool,
                keys::NAV_RETRY_ATTEMPTS,
                defaults.nav_retry_attempts,
            )
            .await?,
            nav_retry_delay: load_ms(pool, keys::NAV_RETRY_DELAY_MS, defaults.nav_retry_delay).await?,
            open_retry_attempts: settings::get_or_init(
                pool,
                keys::OPEN_RETRY_ATTEMPTS,
                defaults.open_retry_attempts,
            )
            .await?,
            open_retry_delay: load_ms(pool, keys::OPEN_RETRY_DELAY_MS, defaults.open_retry_delay)
                .await?,
            submit_settle: load_ms(pool, keys::SUBMIT_SETTLE_MS, defaults.submit_settle).await?,
        };

        info!(
            handshake_timeout_s = settings.handshake_timeout.as_secs(),
            nav_retry_attempts = settings.nav_retry_attempts,
            open_retry_attempts = settings.open_retry_attempts,
            "Runtime settings loaded"
        );

        Ok(settings)
    }

    /// Retry policy for menu clicks on the way to the entry form
    pub fn navigation_retry(&self) -> RetryPolicy {
        RetryPolicy::new("navigate", self.nav_retry_attempts, self.nav_retry_delay)
    }

    /// Retry policy for finding and opening a record's target entity
    pub fn open_retry(&self) -> RetryPolicy {
        RetryPolicy::new("open record", self.open_retry_attempts, self.open_retry_delay)
    }

    /// Wait for the status element to reflect the latest submit
    ///
    /// Shares the open-record budget; both wait on the portal re-rendering.
    pub fn status_retry(&self) -> RetryPolicy {
        RetryPolicy::new("read status", self.open_retry_attempts, self.open_retry_delay)
    }
}

async fn load_ms(pool: &SqlitePool, key: &str, default: Duration) -> Result<Duration> {
    let ms: u64 = settings::get_or_init(pool, key, default.as_millis() as u64).await?;
    Ok(Duration::from_millis(ms))
}

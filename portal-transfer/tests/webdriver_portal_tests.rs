//! WebDriver portal driver against an in-process W3C WebDriver server
//!
//! The server keeps a tiny page model: every locator resolves to an
//! element unless it is scripted as missing, and clicks can rewrite the
//! status element or kill the session.

mod helpers;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::{Json, Router};
use helpers::record;
use portal_transfer::config::{PortalLayout, RuntimeSettings, WebDriverConfig};
use portal_transfer::services::driver::WebDriverPortalFactory;
use portal_transfer::services::{DriverError, DriverFactory, PortalDriver, SubmitOutcome};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

const SESSION_ID: &str = "wd-session-1";
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a4e4b6f5e0b";
const LANDING: &str = "https://portal.test/login";

/// What clicking an element does to the page
#[derive(Clone, Debug)]
enum Effect {
    /// Write `text` into the element at `target`, creating it if absent
    SetText { target: String, text: String },
    /// Swap the element at `target` for a new one showing `text`
    Replace { target: String, text: String },
    KillSession,
}

#[derive(Default)]
struct Page {
    current_url: String,
    /// Answers for successive `GET /url`; the current URL once drained
    url_script: VecDeque<String>,
    /// Locator values that answer "no such element" this many more times
    missing: HashMap<String, u32>,
    /// Locator values with no element at all
    absent: HashSet<String>,
    /// Locator value to current element id
    ids: HashMap<String, String>,
    texts: HashMap<String, String>,
    stale: HashSet<String>,
    /// Per locator value, consumed one per click
    effects: HashMap<String, VecDeque<Effect>>,
    lookups: HashMap<String, u32>,
    session_dead: bool,
    deletes: u32,
    next_id: u32,
}

impl Page {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("el-{}", self.next_id)
    }

    fn element_for(&mut self, value: &str) -> Option<String> {
        *self.lookups.entry(value.to_string()).or_default() += 1;

        if let Some(remaining) = self.missing.get_mut(value) {
            if *remaining > 0 {
                *remaining -= 1;
                return None;
            }
        }
        if self.absent.contains(value) {
            return None;
        }
        if let Some(id) = self.ids.get(value) {
            return Some(id.clone());
        }
        let id = self.new_id();
        self.ids.insert(value.to_string(), id.clone());
        Some(id)
    }

    fn click(&mut self, element_id: &str) {
        let locator = self
            .ids
            .iter()
            .find(|(_, id)| id.as_str() == element_id)
            .map(|(value, _)| value.clone());
        let Some(effect) = locator.and_then(|value| self.effects.get_mut(&value)?.pop_front()) else {
            return;
        };

        match effect {
            Effect::SetText { target, text } => {
                self.absent.remove(&target);
                let id = match self.ids.get(&target).cloned() {
                    Some(id) => id,
                    None => {
                        let id = self.new_id();
                        self.ids.insert(target, id.clone());
                        id
                    }
                };
                self.texts.insert(id, text);
            }
            Effect::Replace { target, text } => {
                self.absent.remove(&target);
                if let Some(old) = self.ids.remove(&target) {
                    self.stale.insert(old);
                }
                let id = self.new_id();
                self.ids.insert(target, id.clone());
                self.texts.insert(id, text);
            }
            Effect::KillSession => self.session_dead = true,
        }
    }
}

type SharedPage = Arc<Mutex<Page>>;

fn ok(value: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "value": value })))
}

fn w3c_error(status: StatusCode, error: &str, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "value": { "error": error, "message": message } })),
    )
}

fn element(id: &str) -> Value {
    let mut value = json!({});
    value[ELEMENT_KEY] = json!(id);
    value
}

async fn handle(
    State(page): State<SharedPage>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let mut page = page.lock().unwrap();

    let path = uri.path();
    if path == "/session" && method == Method::POST {
        page.current_url = "about:blank".to_string();
        return ok(json!({ "sessionId": SESSION_ID, "capabilities": {} }));
    }

    let prefix = format!("/session/{}", SESSION_ID);
    let Some(rest) = path.strip_prefix(&prefix) else {
        return w3c_error(StatusCode::NOT_FOUND, "unknown command", path);
    };
    if page.session_dead {
        return w3c_error(StatusCode::NOT_FOUND, "invalid session id", "session deleted");
    }

    let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
    let using_value = body["value"].as_str().unwrap_or_default().to_string();

    match (method, parts.as_slice()) {
        (Method::DELETE, []) => {
            page.deletes += 1;
            page.session_dead = true;
            ok(Value::Null)
        }
        (Method::POST, ["timeouts"]) | (Method::POST, ["window", "rect"]) => ok(Value::Null),
        (Method::POST, ["url"]) => {
            page.current_url = body["url"].as_str().unwrap_or_default().to_string();
            ok(Value::Null)
        }
        (Method::GET, ["url"]) => {
            if let Some(next) = page.url_script.pop_front() {
                page.current_url = next;
            }
            ok(json!(page.current_url))
        }
        (Method::POST, ["element"]) => match page.element_for(&using_value) {
            Some(id) => ok(element(&id)),
            None => w3c_error(StatusCode::NOT_FOUND, "no such element", "Unable to locate element"),
        },
        (Method::POST, ["elements"]) => {
            let present = !page.absent.contains(&using_value);
            match present.then(|| page.element_for(&using_value)).flatten() {
                Some(id) => ok(json!([element(&id)])),
                None => ok(json!([])),
            }
        }
        (Method::POST, ["element", _, "element"]) => {
            let id = page.new_id();
            ok(element(&id))
        }
        (Method::POST, ["element", id, "click"]) => {
            let id = id.to_string();
            page.click(&id);
            ok(Value::Null)
        }
        (Method::POST, ["element", _, "clear"]) | (Method::POST, ["element", _, "value"]) => {
            ok(Value::Null)
        }
        (Method::GET, ["element", id, "text"]) => {
            if page.stale.contains(*id) {
                return w3c_error(
                    StatusCode::NOT_FOUND,
                    "stale element reference",
                    "element is not attached to the page document",
                );
            }
            let text = page.texts.get(*id).cloned().unwrap_or_default();
            ok(json!(text))
        }
        _ => w3c_error(StatusCode::NOT_FOUND, "unknown command", path),
    }
}

struct FakeWebDriver {
    url: String,
    page: SharedPage,
}

impl FakeWebDriver {
    async fn start(page: Page) -> Self {
        let page = Arc::new(Mutex::new(page));
        let app = Router::new().fallback(handle).with_state(page.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, page }
    }

    fn lookups(&self, locator_value: &str) -> u32 {
        self.page
            .lock()
            .unwrap()
            .lookups
            .get(locator_value)
            .copied()
            .unwrap_or(0)
    }

    fn deletes(&self) -> u32 {
        self.page.lock().unwrap().deletes
    }

    fn driver(&self, settings: &RuntimeSettings) -> Box<dyn PortalDriver> {
        let webdriver = WebDriverConfig {
            url: self.url.clone(),
            ..WebDriverConfig::default()
        };
        WebDriverPortalFactory::new(webdriver, layout())
            .unwrap()
            .create(Uuid::new_v4(), settings)
    }
}

fn layout() -> PortalLayout {
    PortalLayout {
        landing_url: LANDING.to_string(),
        ..PortalLayout::default()
    }
}

fn fast_settings() -> RuntimeSettings {
    RuntimeSettings {
        operation_timeout: Duration::from_secs(1),
        navigation_timeout: Duration::from_secs(1),
        handshake_timeout: Duration::from_secs(2),
        handshake_poll: Duration::from_millis(10),
        nav_retry_attempts: 3,
        nav_retry_delay: Duration::from_millis(10),
        open_retry_attempts: 3,
        open_retry_delay: Duration::from_millis(10),
        submit_settle: Duration::ZERO,
    }
}

/// Page where the status element only appears after a submit
fn entry_page() -> Page {
    let mut page = Page::default();
    page.absent.insert(layout().status_message.value);
    page
}

fn on_submit(page: &mut Page, effects: Vec<Effect>) {
    page.effects
        .insert(layout().submit_button.value, effects.into_iter().collect());
}

fn status_text(text: &str) -> Effect {
    Effect::SetText {
        target: layout().status_message.value,
        text: text.to_string(),
    }
}

/// Launch and skip the handshake by starting on a logged-in page
async fn logged_in(fake: &FakeWebDriver, settings: &RuntimeSettings) -> Box<dyn PortalDriver> {
    fake.page.lock().unwrap().url_script =
        VecDeque::from(vec![LANDING.to_string(), "https://portal.test/main".to_string()]);
    let mut driver = fake.driver(settings);
    driver.initialize().await.unwrap();
    driver.authenticate().await.unwrap();
    driver
}

#[tokio::test]
async fn test_handshake_times_out_when_page_never_leaves_login() {
    let fake = FakeWebDriver::start(Page::default()).await;
    let settings = RuntimeSettings {
        handshake_timeout: Duration::from_millis(200),
        ..fast_settings()
    };
    let mut driver = fake.driver(&settings);

    driver.initialize().await.unwrap();
    let started = Instant::now();
    let err = driver.authenticate().await.unwrap_err();

    assert!(matches!(err, DriverError::HandshakeTimeout(_)));
    assert!(err.is_session_fatal());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));

    driver.close().await;
    assert_eq!(fake.deletes(), 1);
}

#[tokio::test]
async fn test_unrecognized_page_after_login_is_fatal() {
    let mut page = Page::default();
    page.url_script = VecDeque::from(vec![
        LANDING.to_string(),
        LANDING.to_string(),
        "https://portal.test/error?code=7".to_string(),
    ]);
    let fake = FakeWebDriver::start(page).await;
    let mut driver = fake.driver(&fast_settings());

    driver.initialize().await.unwrap();
    let err = driver.authenticate().await.unwrap_err();

    match &err {
        DriverError::UnrecognizedLanding(url) => assert!(url.contains("/error")),
        other => panic!("expected unrecognized landing, got {other}"),
    }
    assert!(err.is_session_fatal());
    driver.close().await;
}

#[tokio::test]
async fn test_handshake_completes_on_logged_in_page() {
    let mut page = Page::default();
    page.url_script = VecDeque::from(vec![
        LANDING.to_string(),
        LANDING.to_string(),
        LANDING.to_string(),
        "https://portal.test/main?tab=home".to_string(),
    ]);
    let fake = FakeWebDriver::start(page).await;
    let mut driver = fake.driver(&fast_settings());

    driver.initialize().await.unwrap();
    driver.authenticate().await.unwrap();
    driver.close().await;
}

#[tokio::test]
async fn test_menu_step_is_retried_until_it_appears() {
    let mut page = Page::default();
    page.missing.insert("Counseling records".to_string(), 2);
    let fake = FakeWebDriver::start(page).await;
    let mut driver = logged_in(&fake, &fast_settings()).await;

    driver.navigate_to_entry_point().await.unwrap();

    assert_eq!(fake.lookups("Student guidance"), 1);
    assert_eq!(fake.lookups("Counseling records"), 3);
    assert_eq!(fake.lookups("#menu-bulk-entry"), 1);
    driver.close().await;
}

#[tokio::test]
async fn test_menu_step_exhausts_its_attempts() {
    let mut page = Page::default();
    page.missing.insert("Counseling records".to_string(), 10);
    let fake = FakeWebDriver::start(page).await;
    let mut driver = logged_in(&fake, &fast_settings()).await;

    let err = driver.navigate_to_entry_point().await.unwrap_err();

    match &err {
        DriverError::Exhausted(retry) => {
            assert_eq!(retry.attempts, 3);
            assert!(retry.label.contains("Counseling records"));
        }
        other => panic!("expected exhausted retry, got {other}"),
    }
    assert_eq!(fake.lookups("Counseling records"), 3);
    assert_eq!(fake.lookups("#menu-bulk-entry"), 0);
    driver.close().await;
}

#[tokio::test]
async fn test_search_result_rendered_late_is_opened_and_saved() {
    let record = record("cs-1");
    let result_locator = layout().search_result.with_key(&record.fields.lookup_key).value;

    let mut page = entry_page();
    page.missing.insert(result_locator.clone(), 1);
    on_submit(&mut page, vec![status_text("Record saved.")]);
    let fake = FakeWebDriver::start(page).await;
    let mut driver = logged_in(&fake, &fast_settings()).await;
    driver.navigate_to_entry_point().await.unwrap();

    let outcome = driver.submit_record(&record).await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Submitted);
    assert_eq!(fake.lookups(&result_locator), 2);
    driver.close().await;
}

#[tokio::test]
async fn test_missing_student_is_rejected_not_fatal() {
    let record = record("cs-9");
    let result_locator = layout().search_result.with_key(&record.fields.lookup_key).value;

    let mut page = entry_page();
    page.absent.insert(result_locator.clone());
    let fake = FakeWebDriver::start(page).await;
    let mut driver = logged_in(&fake, &fast_settings()).await;

    let outcome = driver.submit_record(&record).await.unwrap();

    match outcome {
        SubmitOutcome::Rejected { reason } => assert!(reason.contains("open record failed after 3")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(fake.lookups(&result_locator), 3);
    driver.close().await;
}

#[tokio::test]
async fn test_status_text_is_classified() {
    let mut page = entry_page();
    on_submit(&mut page, vec![status_text("Required field missing: summary")]);
    let fake = FakeWebDriver::start(page).await;
    let mut driver = logged_in(&fake, &fast_settings()).await;

    let outcome = driver.submit_record(&record("cs-1")).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Rejected {
            reason: "Portal rejected record: Required field missing: summary".to_string()
        }
    );
    driver.close().await;
}

#[tokio::test]
async fn test_previous_banner_does_not_count_as_success() {
    let mut page = entry_page();
    // The second submit is swallowed and leaves the first banner in place
    on_submit(&mut page, vec![status_text("Record saved.")]);
    let fake = FakeWebDriver::start(page).await;
    let mut driver = logged_in(&fake, &fast_settings()).await;

    let first = driver.submit_record(&record("cs-1")).await.unwrap();
    let second = driver.submit_record(&record("cs-2")).await.unwrap();

    assert_eq!(first, SubmitOutcome::Submitted);
    match second {
        SubmitOutcome::Rejected { reason } => assert!(reason.contains("no fresh status")),
        other => panic!("expected rejection, got {other:?}"),
    }
    driver.close().await;
}

#[tokio::test]
async fn test_replaced_banner_with_same_text_counts_as_fresh() {
    let target = layout().status_message.value;
    let mut page = entry_page();
    on_submit(
        &mut page,
        vec![
            status_text("Record saved."),
            Effect::Replace {
                target,
                text: "Record saved.".to_string(),
            },
        ],
    );
    let fake = FakeWebDriver::start(page).await;
    let mut driver = logged_in(&fake, &fast_settings()).await;

    assert_eq!(driver.submit_record(&record("cs-1")).await.unwrap(), SubmitOutcome::Submitted);
    assert_eq!(driver.submit_record(&record("cs-2")).await.unwrap(), SubmitOutcome::Submitted);
    driver.close().await;
}

#[tokio::test]
async fn test_session_loss_during_submit_is_fatal_without_retrying() {
    let record = record("cs-1");
    let mut page = entry_page();
    page.effects.insert(
        layout().search_button.value,
        VecDeque::from(vec![Effect::KillSession]),
    );
    let fake = FakeWebDriver::start(page).await;
    let settings = RuntimeSettings {
        open_retry_delay: Duration::from_secs(5),
        ..fast_settings()
    };
    let mut driver = logged_in(&fake, &settings).await;

    let started = Instant::now();
    let err = driver.submit_record(&record).await.unwrap_err();

    assert!(err.is_session_fatal());
    match &err {
        DriverError::Exhausted(retry) => assert_eq!(retry.attempts, 1),
        other => panic!("expected a single failed attempt, got {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    // Deleting a dead session fails quietly; close stays idempotent
    driver.close().await;
    driver.close().await;
    assert_eq!(fake.deletes(), 0);
}

#[tokio::test]
async fn test_close_deletes_session_once() {
    let fake = FakeWebDriver::start(Page::default()).await;
    let mut driver = fake.driver(&fast_settings());

    driver.initialize().await.unwrap();
    driver.close().await;
    driver.close().await;

    assert_eq!(fake.deletes(), 1);
}

//! Shared test fixtures: scripted portal driver, recording outcome sink,
//! in-memory database with seeded counseling sessions.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use portal_common::events::{JobSubscription, TransferEvent};
use portal_transfer::config::RuntimeSettings;
use portal_transfer::models::{PortalFields, TransferRecord};
use portal_transfer::services::{
    DriverError, DriverFactory, JobHandle, OutcomeSink, PortalDriver, SubmitOutcome,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// How the fake portal behaves during the login handshake
#[derive(Clone, Debug, Default)]
pub enum Handshake {
    #[default]
    Completes,
    /// Never completes; the bounded wait expires after the given time
    TimesOut(Duration),
    /// Never completes and never times out
    Hangs,
}

/// Behaviour of the fake driver
#[derive(Clone, Default)]
pub struct Script {
    pub fail_launch: bool,
    pub handshake: Handshake,
    pub fail_navigation: bool,
    /// Records the portal rejects
    pub reject_keys: HashSet<String>,
    /// Record whose submission kills the session
    pub session_dies_on: Option<String>,
    /// Request cancellation after this many submissions
    pub cancel_after: Option<(usize, JobHandle)>,
}

impl Script {
    pub fn rejecting(keys: &[&str]) -> Self {
        Self {
            reject_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Calls observed by fake drivers
#[derive(Default)]
pub struct DriverProbe {
    pub created: AtomicUsize,
    pub initialized: AtomicUsize,
    pub closes: AtomicUsize,
    pub submitted: Mutex<Vec<String>>,
}

impl DriverProbe {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

/// In-process stand-in for a browser session
pub struct FakeDriver {
    script: Script,
    probe: Arc<DriverProbe>,
    open: bool,
}

impl FakeDriver {
    pub fn new(script: Script, probe: Arc<DriverProbe>) -> Self {
        Self {
            script,
            probe,
            open: false,
        }
    }

    fn require_session(&self) -> Result<(), DriverError> {
        if self.open {
            Ok(())
        } else {
            Err(DriverError::NoSession)
        }
    }
}

#[async_trait]
impl PortalDriver for FakeDriver {
    async fn initialize(&mut self) -> Result<(), DriverError> {
        self.probe.initialized.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_launch {
            return Err(DriverError::Launch("browser binary not found".to_string()));
        }
        self.open = true;
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<(), DriverError> {
        self.require_session()?;
        match self.script.handshake.clone() {
            Handshake::Completes => Ok(()),
            Handshake::TimesOut(ceiling) => {
                tokio::time::sleep(ceiling).await;
                Err(DriverError::HandshakeTimeout(ceiling))
            }
            Handshake::Hangs => std::future::pending().await,
        }
    }

    async fn navigate_to_entry_point(&mut self) -> Result<(), DriverError> {
        self.require_session()?;
        if self.script.fail_navigation {
            return Err(DriverError::ElementNotFound {
                locator: "link text=Counseling records".to_string(),
            });
        }
        Ok(())
    }

    async fn submit_record(&mut self, record: &TransferRecord) -> Result<SubmitOutcome, DriverError> {
        self.require_session()?;

        if self.script.session_dies_on.as_deref() == Some(record.key.as_str()) {
            self.open = false;
            return Err(DriverError::SessionLost("invalid session id".to_string()));
        }

        let count = {
            let mut submitted = self.probe.submitted.lock().unwrap();
            submitted.push(record.key.clone());
            submitted.len()
        };

        if let Some((after, handle)) = &self.script.cancel_after {
            if count == *after {
                handle.request_cancel().await;
            }
        }

        if self.script.reject_keys.contains(&record.key) {
            Ok(SubmitOutcome::Rejected {
                reason: format!("Student {} not found", record.fields.lookup_key),
            })
        } else {
            Ok(SubmitOutcome::Submitted)
        }
    }

    async fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
    }
}

/// Factory handing out [`FakeDriver`]s that share one probe
pub struct FakeDriverFactory {
    pub script: Script,
    pub probe: Arc<DriverProbe>,
}

impl FakeDriverFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            probe: Arc::new(DriverProbe::default()),
        }
    }
}

impl DriverFactory for FakeDriverFactory {
    fn create(&self, _job_id: Uuid, _settings: &RuntimeSettings) -> Box<dyn PortalDriver> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeDriver::new(self.script.clone(), self.probe.clone()))
    }
}

/// Outcome sink that keeps everything in memory
#[derive(Default)]
pub struct RecordingSink {
    pub transferred: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl OutcomeSink for RecordingSink {
    async fn mark_transferred(
        &self,
        record_key: &str,
        _transferred_at: DateTime<Utc>,
    ) -> portal_common::Result<()> {
        self.transferred.lock().unwrap().push(record_key.to_string());
        Ok(())
    }

    async fn log_error(
        &self,
        record_key: &str,
        _job_id: Uuid,
        message: &str,
    ) -> portal_common::Result<()> {
        self.errors
            .lock()
            .unwrap()
            .push((record_key.to_string(), message.to_string()));
        Ok(())
    }
}

/// Single-connection in-memory database with all tables
pub async fn memory_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    portal_transfer::db::init_tables(&pool)
        .await
        .expect("Failed to initialize tables");
    pool
}

/// Insert one counseling session
pub async fn seed_session(pool: &SqlitePool, id: &str, date: &str, time: &str, status: &str) {
    sqlx::query(
        r#"
        INSERT INTO counseling_sessions (
            id, student_id, student_name, session_date, session_time, status,
            category, subcategory, summary, duration_minutes, participant_count
        ) VALUES (?, ?, ?, ?, ?, ?, 'Career', 'Course selection', 'Discussed electives', 30, 1)
        "#,
    )
    .bind(id)
    .bind(format!("S-{}", id))
    .bind(format!("Student {}", id))
    .bind(date)
    .bind(time)
    .bind(status)
    .execute(pool)
    .await
    .expect("Failed to seed counseling session");
}

/// Seed cs-1..cs-3, all completed, on consecutive days
pub async fn seed_three(pool: &SqlitePool) {
    seed_session(pool, "cs-1", "2024-03-04", "09:00", "completed").await;
    seed_session(pool, "cs-2", "2024-03-05", "10:30", "completed").await;
    seed_session(pool, "cs-3", "2024-03-06", "13:15", "completed").await;
}

/// A record built without the database
pub fn record(key: &str) -> TransferRecord {
    let fields = PortalFields {
        lookup_key: format!("S-{}", key),
        category: "Career".to_string(),
        subcategory: "Course selection".to_string(),
        summary: "Discussed electives".to_string(),
        session_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        duration_minutes: 30,
        participant_count: 1,
    };
    TransferRecord {
        key: key.to_string(),
        label: format!("Student {} (2024-03-04 09:00)", key),
        fields,
    }
}

/// Drain a subscription up to and including the terminal event
pub async fn collect_events(subscription: &mut JobSubscription) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("Timed out waiting for job events");
        match next {
            Some(event) => {
                let terminal = event.kind.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            None => break,
        }
    }
    events
}

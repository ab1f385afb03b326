//! One unit of transfer work: a counseling session to be entered in the portal

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A record selected for transfer
///
/// Selected once per job and never mutated; the outcome goes to the
/// outcome sink, not back onto the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Identifying key of the local session record
    pub key: String,
    /// Human-readable label for logs and the dashboard
    pub label: String,
    /// Values already mapped to the portal's entry form
    pub fields: PortalFields,
}

/// Field values of the portal's entry form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalFields {
    /// Key the portal's search box finds the student by
    pub lookup_key: String,
    /// Top-level category selector
    pub category: String,
    /// Dependent subcategory selector
    pub subcategory: String,
    /// Free-text session summary
    pub summary: String,
    pub session_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub participant_count: u32,
}

impl PortalFields {
    /// Date formatted the way the portal's date input expects it
    pub fn date_text(&self) -> String {
        self.session_date.format("%Y-%m-%d").to_string()
    }

    /// Time formatted as HH:MM
    pub fn time_text(&self) -> String {
        self.start_time.format("%H:%M").to_string()
    }
}

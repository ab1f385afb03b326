//! Counseling session queries used for record selection

use chrono::{NaiveDate, NaiveTime};
use portal_common::{Error, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::warn;

use crate::models::{PortalFields, TransferFilters, TransferRecord};

/// Select completed sessions eligible for transfer
///
/// Ordered by date, then time, then id, so repeated runs advance through
/// the backlog in the same order. Dates and times are compared after
/// parsing, since the stored text is not always zero-padded. Rows whose
/// date or time cannot be parsed are skipped with a warning.
pub async fn select_eligible(
    pool: &SqlitePool,
    filters: &TransferFilters,
) -> Result<Vec<TransferRecord>> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT id, student_id, student_name, session_date, session_time,
               category, subcategory, summary, duration_minutes, participant_count
        FROM counseling_sessions
        WHERE status = 'completed'
        "#,
    );

    if filters.only_not_transferred {
        query.push(" AND transferred_at IS NULL");
    }

    if let Some(ids) = &filters.record_ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        query.push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");
    }

    let rows = query.build().fetch_all(pool).await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        match row_to_record(row) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Skipping counseling session with unreadable schedule"),
        }
    }

    records.retain(|record| {
        let date = record.fields.session_date;
        filters.start_date.map_or(true, |start| date >= start)
            && filters.end_date.map_or(true, |end| date <= end)
    });

    records.sort_by(|a, b| {
        (a.fields.session_date, a.fields.start_time, &a.key)
            .cmp(&(b.fields.session_date, b.fields.start_time, &b.key))
    });

    Ok(records)
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<TransferRecord> {
    let key: String = row.get("id");
    let student_name: String = row.get("student_name");

    let date_text: String = row.get("session_date");
    let session_date = NaiveDate::parse_from_str(date_text.trim(), "%Y-%m-%d").map_err(|e| {
        Error::InvalidInput(format!("Session {} has invalid date {:?}: {}", key, date_text, e))
    })?;

    let time_text: String = row.get("session_time");
    let start_time = parse_time(time_text.trim()).ok_or_else(|| {
        Error::InvalidInput(format!("Session {} has invalid time {:?}", key, time_text))
    })?;

    let duration: i64 = row.get("duration_minutes");
    let participants: i64 = row.get("participant_count");

    let fields = PortalFields {
        lookup_key: row.get("student_id"),
        category: row.get("category"),
        subcategory: row.get("subcategory"),
        summary: row.get("summary"),
        session_date,
        start_time,
        duration_minutes: duration.max(0) as u32,
        participant_count: participants.max(0) as u32,
    };

    Ok(TransferRecord {
        label: format!("{} ({} {})", student_name, fields.date_text(), fields.time_text()),
        key,
        fields,
    })
}

/// Accepts `HH:MM` and `HH:MM:SS`
fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .ok()
}

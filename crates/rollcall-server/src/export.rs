//! CSV export of the presence log.
//!
//! Date and time columns are rendered in a [`DisplayZone`], matching what
//! the scan receipts showed.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use rollcall_core::{PresenceEvent, RecordStore, StoreError};

use crate::presentation::DisplayZone;

const HEADER: [&str; 6] =
    ["Registration Number", "Student Name", "IP Address", "Date", "Time", "Full Timestamp"];

/// Errors from exporting the presence log.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Reading events failed
    #[error("failed to read presence log: {0}")]
    Store(#[from] StoreError),

    /// Writing the file failed
    #[error("failed to write export: {0}")]
    Io(#[from] io::Error),

    /// The blocking writer task did not complete
    #[error("export writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// `attendance_export_<YYYYmmdd_HHMMSS>.csv` for an export taken at `now`.
pub fn default_export_name(now: DateTime<Utc>) -> String {
    format!("attendance_export_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Write `events` as CSV with a header row, in the order given.
pub fn write_csv<W: Write>(
    events: &[PresenceEvent],
    zone: DisplayZone,
    mut out: W,
) -> io::Result<()> {
    write_row(&mut out, HEADER)?;

    for event in events {
        let at = event.recorded_at;
        write_row(&mut out, [
            event.identity_id.as_str(),
            event.name.as_str(),
            &event.origin.to_string(),
            &zone.date(at),
            &zone.time_of_day(at),
            &zone.format(at, "%Y-%m-%d %H:%M:%S"),
        ])?;
    }

    out.flush()
}

/// Export every event in `store`, newest first, to `path`.
///
/// The file is written on the blocking pool. Returns the number of exported
/// events.
pub async fn export_to_path<S: RecordStore + ?Sized>(
    store: &S,
    path: &Path,
    zone: DisplayZone,
) -> Result<usize, ExportError> {
    let events = store.list_events().await?;
    let count = events.len();

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = File::create(&target)?;
        write_csv(&events, zone, BufWriter::new(file))
    })
    .await??;

    tracing::info!(count, path = %path.display(), "attendance exported");
    Ok(count)
}

fn write_row<W: Write, const N: usize>(out: &mut W, fields: [&str; N]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write_field(out, field)?;
    }
    out.write_all(b"\r\n")
}

fn write_field<W: Write>(out: &mut W, field: &str) -> io::Result<()> {
    if field.contains([',', '"', '\r', '\n']) {
        write!(out, "\"{}\"", field.replace('"', "\"\""))
    } else {
        out.write_all(field.as_bytes())
    }
}

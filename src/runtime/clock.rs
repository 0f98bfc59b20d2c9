//! Wall-clock helpers for run metadata.

use std::time::{Duration, SystemTime};

pub fn wall_time_iso_utc() -> String {
    // Metadata only (startedAt/finishedAt/updatedAt); never feeds a test decision.
    let now = SystemTime::now();
    let dt: time::OffsetDateTime = now.into();
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Renders an elapsed time the way the summary line shows it (`0:01:02.345`).
pub fn format_elapsed(d: Duration) -> String {
    let total_ms = duration_ms(d);
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{hours}:{minutes:02}:{seconds:02}.{millis:03}")
}

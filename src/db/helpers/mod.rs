use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};

/// Rejects negative values read back from an INTEGER column.
pub fn non_negative(value: i64, field: &str) -> Result<i64> {
    u64::try_from(value)
        .map(|_| value)
        .map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Stored durations are whole milliseconds and never negative.
pub fn duration_to_ms(duration: Duration, field: &str) -> Result<i64> {
    let ms = duration.num_milliseconds();
    if ms < 0 {
        return Err(anyhow!("{field} must not be negative (got {ms} ms)"));
    }
    Ok(ms)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

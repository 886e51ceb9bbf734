//! Report aggregator.
//!
//! The builders in `daily` and `summary` are pure functions of a record
//! slice. `Reporter` performs the single window query and hands the result
//! to them.

pub mod aggregate;
pub mod daily;
pub mod summary;

pub use daily::build_daily_digest;
pub use summary::build_long_summary;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::RecordStore;

/// Default daily window.
pub const DAILY_WINDOW_HOURS: u32 = 24;

/// Default long-summary window.
pub const DEFAULT_SUMMARY_DAYS: u32 = 21;

/// Largest long-summary window accepted from users and configuration.
pub const MAX_SUMMARY_DAYS: u32 = 365;

/// Start of a window of `span` ending at `now`. A span reaching past the
/// representable range covers everything.
pub fn window_start(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(span)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Record counts for the two report windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub daily_hours: u32,
    pub daily_count: u64,
    pub summary_days: u32,
    pub summary_count: u64,
}

/// Builds reports from the record store.
pub struct Reporter {
    store: Arc<dyn RecordStore>,
    daily_hours: u32,
    summary_days: u32,
}

impl Reporter {
    pub fn new(store: Arc<dyn RecordStore>, summary_days: u32) -> Self {
        Self {
            store,
            daily_hours: DAILY_WINDOW_HOURS,
            summary_days,
        }
    }

    pub fn with_daily_hours(mut self, hours: u32) -> Self {
        self.daily_hours = hours;
        self
    }

    /// Configured long-summary window, used when no explicit window is given.
    pub fn summary_days(&self) -> u32 {
        self.summary_days
    }

    /// Digest of the last `daily_hours` hours.
    pub async fn daily_digest(&self) -> Result<String, DatabaseError> {
        let since = window_start(Utc::now(), Duration::hours(i64::from(self.daily_hours)));
        let records = self.store.query_window(since).await?;
        info!(hours = self.daily_hours, records = records.len(), "Building daily digest");
        Ok(build_daily_digest(&records, self.daily_hours))
    }

    /// Summary of the last `days` days.
    pub async fn long_summary(&self, days: u32) -> Result<String, DatabaseError> {
        let since = window_start(Utc::now(), Duration::days(i64::from(days)));
        let records = self.store.query_window(since).await?;
        info!(days, records = records.len(), "Building long summary");
        Ok(build_long_summary(&records, days))
    }

    /// Record counts for both windows.
    pub async fn stats(&self) -> Result<WindowStats, DatabaseError> {
        let now = Utc::now();
        let daily_count = self
            .store
            .count_since(window_start(now, Duration::hours(i64::from(self.daily_hours))))
            .await?;
        let summary_count = self
            .store
            .count_since(window_start(now, Duration::days(i64::from(self.summary_days))))
            .await?;
        Ok(WindowStats {
            daily_hours: self.daily_hours,
            daily_count,
            summary_days: self.summary_days,
            summary_count,
        })
    }
}

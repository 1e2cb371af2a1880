use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

pub mod archive;
pub mod garmin;
pub mod strava;
pub mod sync;

pub use garmin::GarminTarget;
pub use strava::StravaTarget;
pub use sync::{UploadJob, UploadStats};

/// Result of a single upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// Destination throttled the account; recoverable after the hinted delay.
    RateLimited { retry_after_secs: u64 },
    /// Destination refused the file (duplicate, malformed). Not retried.
    Rejected(String),
}

/// A destination platform that accepts track-file uploads.
#[async_trait]
pub trait UploadTarget {
    fn name(&self) -> &'static str;

    /// Start time of the destination's most recent activity, used as the
    /// upload watermark. `None` means the destination has no activities yet.
    async fn latest_start_time(&self) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Attempt one upload. Failures come back as outcomes, not errors, so the
    /// orchestrator can apply its retry and skip policy uniformly.
    async fn upload(&self, path: &Path, name: &str) -> UploadOutcome;
}

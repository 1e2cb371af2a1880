use super::{UploadOutcome, UploadTarget, archive};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// A local GPX file that parsed cleanly and has a start time.
#[derive(Debug, Clone)]
pub struct TrackCandidate {
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct UploadStats {
    pub uploaded: usize,
    pub rejected: usize,
    pub still_rate_limited: usize,
}

// Pause between files to stay under unstated burst limits.
const COURTESY_DELAY: Duration = Duration::from_secs(1);

/// Uploads local track files newer than the destination's watermark, oldest
/// first, one at a time.
///
/// Destinations enforce a global per-account rate limit, so this is a
/// deliberately blocking single-worker queue: a rate-limit hint suspends the
/// whole queue, and the same file is retried exactly once before moving on.
pub struct UploadJob<'a, T: UploadTarget> {
    target: &'a T,
    dir: &'a Path,
    upload_all: bool,
    archive_after: bool,
}

impl<'a, T: UploadTarget> UploadJob<'a, T> {
    pub fn new(target: &'a T, dir: &'a Path, upload_all: bool, archive_after: bool) -> Self {
        UploadJob {
            target,
            dir,
            upload_all,
            archive_after,
        }
    }

    pub async fn sync_uploads(&self) -> Result<UploadStats> {
        let watermark = if self.upload_all {
            DateTime::<Utc>::UNIX_EPOCH
        } else {
            match self.target.latest_start_time().await? {
                Some(t) => t,
                None => {
                    info!("{} has no activities yet, uploading everything", self.target.name());
                    DateTime::<Utc>::UNIX_EPOCH
                }
            }
        };
        info!("{} watermark: {watermark}", self.target.name());

        let candidates = filter_candidates(scan_track_files(self.dir), watermark);
        info!("{} track files to upload", candidates.len());

        let mut stats = UploadStats::default();
        for candidate in &candidates {
            self.upload_one(candidate, &mut stats).await;
            tokio::time::sleep(COURTESY_DELAY).await;
        }

        info!(
            "upload summary for {}: uploaded {}, rejected {}, rate limited {}",
            self.target.name(),
            stats.uploaded,
            stats.rejected,
            stats.still_rate_limited
        );

        if self.archive_after && !candidates.is_empty() {
            let moved = archive::move_to_subdirectory(self.dir, archive::ARCHIVE_SUBDIR)?;
            info!("archived {moved} files to {}/", archive::ARCHIVE_SUBDIR);
        }
        Ok(stats)
    }

    async fn upload_one(&self, candidate: &TrackCandidate, stats: &mut UploadStats) {
        let mut outcome = self.target.upload(&candidate.path, &candidate.name).await;

        if let UploadOutcome::RateLimited { retry_after_secs } = outcome {
            warn!(
                "{} rate limited, retrying {} in {retry_after_secs}s",
                self.target.name(),
                candidate.path.display()
            );
            tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
            outcome = self.target.upload(&candidate.path, &candidate.name).await;
        }

        match outcome {
            UploadOutcome::Uploaded => {
                info!("uploaded {}", candidate.path.display());
                stats.uploaded += 1;
            }
            UploadOutcome::RateLimited { .. } => {
                // Second hint in a row; leave the file for the next run.
                warn!("{} still rate limited, skipping {}", self.target.name(), candidate.path.display());
                stats.still_rate_limited += 1;
            }
            UploadOutcome::Rejected(reason) => {
                warn!("{} rejected {}: {reason}", self.target.name(), candidate.path.display());
                stats.rejected += 1;
            }
        }
    }
}

/// Parse every top-level `.gpx` file in the directory. Corrupt files and
/// files without a start time are warned about and skipped; they are not
/// upload failures.
pub fn scan_track_files(dir: &Path) -> Vec<TrackCandidate> {
    let mut candidates = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return candidates;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("gpx") {
            continue;
        }
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("cannot open {}: {e}", path.display());
                continue;
            }
        };
        let gpx = match gpx::read(std::io::BufReader::new(file)) {
            Ok(gpx) => gpx,
            Err(e) => {
                warn!("cannot parse {}: {e}", path.display());
                continue;
            }
        };
        let Some(start_time) = track_start_time(&gpx) else {
            warn!("{} has no timestamps, skipping", path.display());
            continue;
        };
        let name = gpx
            .tracks
            .first()
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default());

        candidates.push(TrackCandidate {
            path,
            start_time,
            name,
        });
    }
    candidates
}

/// Keep files strictly newer than the watermark, oldest first so the
/// destination receives them in chronological order.
pub fn filter_candidates(
    mut candidates: Vec<TrackCandidate>,
    watermark: DateTime<Utc>,
) -> Vec<TrackCandidate> {
    candidates.retain(|c| c.start_time > watermark);
    candidates.sort_by_key(|c| c.start_time);
    candidates
}

/// Earliest waypoint timestamp in the document.
fn track_start_time(gpx: &gpx::Gpx) -> Option<DateTime<Utc>> {
    gpx.tracks
        .iter()
        .flat_map(|t| t.segments.iter())
        .flat_map(|s| s.points.iter())
        .filter_map(|p| p.time.clone())
        .map(|t| time::OffsetDateTime::from(t).unix_timestamp())
        .min()
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
}

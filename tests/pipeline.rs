use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use runsync::codoon_client::{ActivityDetail, ActivityStub, TrackPoint};
use runsync::config::Config;
use runsync::errors::SourceError;
use runsync::sync::{ActivitySource, SyncJob};
use runsync::upload::sync::scan_track_files;
use runsync::upload::{UploadJob, UploadOutcome, UploadTarget};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempdir::TempDir;

struct ThreeActivitySource;

#[async_trait]
impl ActivitySource for ThreeActivitySource {
    async fn list_activities(&self) -> Result<Vec<ActivityStub>, SourceError> {
        Ok((1..=3)
            .map(|id| ActivityStub {
                log_id: id,
                sports_type: 1,
                route_id: json!(format!("route-{id}")),
            })
            .collect())
    }

    async fn activity_detail(&self, stub: &ActivityStub) -> Result<ActivityDetail, SourceError> {
        // Local civil times; day encodes the activity id. Three raw points,
        // the last of which is the sentinel.
        let points = (0..3)
            .map(|i| TrackPoint {
                latitude: 31.2,
                longitude: 121.4,
                elevation: Some(10.0),
                time_stamp: format!("2023-05-0{}T08:00:{i:02}", stub.log_id),
            })
            .collect();
        Ok(ActivityDetail {
            id: stub.log_id,
            sports_type: 1,
            start_time: Some(format!("2023-05-0{}T08:00:00", stub.log_id)),
            end_time: Some(format!("2023-05-0{}T09:00:00", stub.log_id)),
            points,
        })
    }
}

struct RecordingTarget {
    watermark: Option<DateTime<Utc>>,
    uploads: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl UploadTarget for RecordingTarget {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn latest_start_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.watermark)
    }

    async fn upload(&self, path: &Path, _name: &str) -> UploadOutcome {
        self.uploads.lock().unwrap().push(path.to_path_buf());
        UploadOutcome::Uploaded
    }
}

#[tokio::test(start_paused = true)]
async fn test_sync_then_upload_end_to_end() {
    let tmp = TempDir::new("pipeline").unwrap();
    let config = Config {
        gpx_dir: tmp.path().to_path_buf(),
        ..Config::default()
    };

    // Activity 2 is already exported; its content does not matter for dedup.
    std::fs::write(tmp.path().join("2.gpx"), "pre-existing").unwrap();

    let job = SyncJob::new(ThreeActivitySource, &config).unwrap();
    let stats = job.sync_all().await.unwrap();
    assert_eq!(stats.exported, 2);
    assert!(tmp.path().join("1.gpx").exists());
    assert!(tmp.path().join("3.gpx").exists());

    // Each exported track drops the sentinel: 3 raw points, 2 waypoints.
    let candidates = scan_track_files(tmp.path());
    assert_eq!(candidates.len(), 2, "the stale 2.gpx is skipped as unparseable");

    // The destination's newest activity is "1" (08:00 Beijing = 00:00 UTC).
    let watermark = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
    let target = RecordingTarget {
        watermark: Some(watermark),
        uploads: Mutex::new(Vec::new()),
    };

    let upload_job = UploadJob::new(&target, tmp.path(), false, false);
    let upload_stats = upload_job.sync_uploads().await.unwrap();

    assert_eq!(upload_stats.uploaded, 1);
    let uploads = target.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].ends_with("3.gpx"));
}

#[tokio::test(start_paused = true)]
async fn test_empty_destination_uploads_everything() {
    let tmp = TempDir::new("pipeline").unwrap();
    let config = Config {
        gpx_dir: tmp.path().to_path_buf(),
        ..Config::default()
    };

    SyncJob::new(ThreeActivitySource, &config)
        .unwrap()
        .sync_all()
        .await
        .unwrap();

    let target = RecordingTarget {
        watermark: None,
        uploads: Mutex::new(Vec::new()),
    };
    let stats = UploadJob::new(&target, tmp.path(), false, false)
        .sync_uploads()
        .await
        .unwrap();

    assert_eq!(stats.uploaded, 3);
    // Oldest first.
    let uploads = target.uploads.lock().unwrap();
    assert!(uploads[0].ends_with("1.gpx"));
    assert!(uploads[2].ends_with("3.gpx"));
}

use crate::codoon_client::{ActivityDetail, ActivityStub, CodoonClient};
use crate::config::Config;
use crate::errors::SourceError;
use crate::export::{Exporter, Sport, parse_source_time};
use crate::normalize::Normalizer;
use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Seam between the orchestrator and the source platform.
#[async_trait]
pub trait ActivitySource {
    async fn list_activities(&self) -> Result<Vec<ActivityStub>, SourceError>;
    async fn activity_detail(&self, stub: &ActivityStub) -> Result<ActivityDetail, SourceError>;
}

#[async_trait]
impl ActivitySource for CodoonClient {
    async fn list_activities(&self) -> Result<Vec<ActivityStub>, SourceError> {
        CodoonClient::list_activities(self).await
    }

    async fn activity_detail(&self, stub: &ActivityStub) -> Result<ActivityDetail, SourceError> {
        CodoonClient::activity_detail(self, stub).await
    }
}

#[derive(Debug, Default)]
pub struct SyncStats {
    pub exported: usize,
    pub skipped_existing: usize,
    pub skipped_empty: usize,
    pub failed: usize,
}

/// Pulls the remote activity history and exports every activity that is not
/// yet present in the local GPX directory.
pub struct SyncJob<S: ActivitySource> {
    source: S,
    exporter: Exporter,
    normalizer: Normalizer,
    only_run: bool,
}

impl<S: ActivitySource> SyncJob<S> {
    pub fn new(source: S, config: &Config) -> Result<Self> {
        Ok(SyncJob {
            source,
            exporter: Exporter::new(config)?,
            normalizer: Normalizer::from_config(config),
            only_run: config.only_run,
        })
    }

    /// One full extraction pass. Per-activity failures are logged and the
    /// record stays un-exported so the next run retries it; only auth and
    /// protocol errors abort the pass.
    pub async fn sync_all(&self) -> Result<SyncStats> {
        let existing = list_exported_ids(self.exporter.dir());

        let mut stubs = self.source.list_activities().await?;
        if self.only_run {
            stubs.retain(|s| s.sports_type == 1);
        }
        info!("{} activities listed remotely", stubs.len());

        let mut stats = SyncStats::default();
        let missing: Vec<&ActivityStub> = stubs
            .iter()
            .filter(|s| !existing.contains(&s.log_id.to_string()))
            .collect();
        stats.skipped_existing = stubs.len() - missing.len();
        info!("{} activities to export", missing.len());

        let pb = ProgressBar::new(missing.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        for stub in missing {
            pb.set_message(format!("activity {}", stub.log_id));
            self.sync_one(stub, &mut stats).await?;
            pb.inc(1);
        }
        pb.finish_with_message("sync complete");

        info!(
            "sync summary: exported {}, already present {}, empty {}, failed {}",
            stats.exported, stats.skipped_existing, stats.skipped_empty, stats.failed
        );
        Ok(stats)
    }

    async fn sync_one(&self, stub: &ActivityStub, stats: &mut SyncStats) -> Result<()> {
        let mut detail = match self.source.activity_detail(stub).await {
            Ok(detail) => detail,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!("skipping activity {}: {e}", stub.log_id);
                stats.failed += 1;
                return Ok(());
            }
        };

        if self.only_run && detail.sports_type != 1 {
            stats.skipped_empty += 1;
            return Ok(());
        }

        // Incomplete remote records are expected, not an error.
        let Some(start_time) = detail.start_time.as_deref().and_then(parse_source_time) else {
            info!("activity {} has no start time, skipping", detail.id);
            stats.skipped_empty += 1;
            return Ok(());
        };
        if detail.points.is_empty() {
            info!("activity {} has no points, skipping", detail.id);
            stats.skipped_empty += 1;
            return Ok(());
        }

        self.normalizer.normalize(&mut detail.points, start_time);

        let sport = Sport::from_code(detail.sports_type);
        match self
            .exporter
            .export(detail.id, sport, start_time, &detail.points)
        {
            Ok(path) => {
                info!("exported activity {} to {}", detail.id, path.display());
                stats.exported += 1;
            }
            Err(e) => {
                // Left un-exported on purpose; the next run retries it.
                warn!("export of activity {} failed: {e}", detail.id);
                stats.failed += 1;
            }
        }
        Ok(())
    }
}

/// Ids of activities already exported, from the directory's filename stems.
/// Archive subfolders count too, so uploading (which archives) never causes a
/// re-export. Hidden files are ignored.
pub fn list_exported_ids(dir: &Path) -> HashSet<String> {
    let mut ids = HashSet::new();
    collect_stems(dir, &mut ids, true);
    ids
}

fn collect_stems(dir: &Path, ids: &mut HashSet<String>, descend: bool) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            if descend {
                collect_stems(&path, ids, false);
            }
        } else if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            ids.insert(stem.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codoon_client::TrackPoint;
    use serde_json::json;
    use std::sync::Mutex;
    use tempdir::TempDir;

    struct FakeSource {
        stubs: Vec<ActivityStub>,
        detail_calls: Mutex<Vec<i64>>,
    }

    impl FakeSource {
        fn new(ids: &[i64]) -> Self {
            FakeSource {
                stubs: ids
                    .iter()
                    .map(|&id| ActivityStub {
                        log_id: id,
                        sports_type: 1,
                        route_id: json!(format!("route-{id}")),
                    })
                    .collect(),
                detail_calls: Mutex::new(Vec::new()),
            }
        }

        fn points(id: i64) -> Vec<TrackPoint> {
            (0..3)
                .map(|i| TrackPoint {
                    latitude: 31.0 + id as f64 * 0.01,
                    longitude: 121.0,
                    elevation: Some(5.0),
                    time_stamp: format!("2023-05-0{id}T08:00:{i:02}"),
                })
                .collect()
        }
    }

    #[async_trait]
    impl ActivitySource for FakeSource {
        async fn list_activities(&self) -> Result<Vec<ActivityStub>, SourceError> {
            Ok(self.stubs.clone())
        }

        async fn activity_detail(&self, stub: &ActivityStub) -> Result<ActivityDetail, SourceError> {
            self.detail_calls.lock().unwrap().push(stub.log_id);
            Ok(ActivityDetail {
                id: stub.log_id,
                sports_type: stub.sports_type,
                start_time: Some(format!("2023-05-0{}T08:00:00", stub.log_id)),
                end_time: Some(format!("2023-05-0{}T09:00:00", stub.log_id)),
                points: Self::points(stub.log_id),
            })
        }
    }

    fn config(dir: &Path) -> Config {
        Config {
            gpx_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_exported_ids_scan() {
        let tmp = TempDir::new("ids").unwrap();
        fs::write(tmp.path().join("100.gpx"), "x").unwrap();
        fs::write(tmp.path().join(".hidden.gpx"), "x").unwrap();
        fs::create_dir(tmp.path().join("archive")).unwrap();
        fs::write(tmp.path().join("archive").join("200.gpx"), "x").unwrap();

        let ids = list_exported_ids(tmp.path());
        assert_eq!(ids, HashSet::from(["100".to_string(), "200".to_string()]));
    }

    #[tokio::test]
    async fn test_only_missing_activities_are_fetched_and_exported() {
        let tmp = TempDir::new("sync").unwrap();
        fs::write(tmp.path().join("2.gpx"), "already here").unwrap();

        let job = SyncJob::new(FakeSource::new(&[1, 2, 3]), &config(tmp.path())).unwrap();
        let stats = job.sync_all().await.unwrap();

        assert_eq!(stats.exported, 2);
        assert_eq!(stats.skipped_existing, 1);
        assert!(tmp.path().join("1.gpx").exists());
        assert!(tmp.path().join("3.gpx").exists());

        // Details are fetched lazily, only for the missing ids.
        let calls = job.source.detail_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_second_run_exports_nothing() {
        let tmp = TempDir::new("sync").unwrap();

        let job = SyncJob::new(FakeSource::new(&[1, 2, 3]), &config(tmp.path())).unwrap();
        let first = job.sync_all().await.unwrap();
        assert_eq!(first.exported, 3);

        let job = SyncJob::new(FakeSource::new(&[1, 2, 3]), &config(tmp.path())).unwrap();
        let second = job.sync_all().await.unwrap();
        assert_eq!(second.exported, 0);
        assert_eq!(second.skipped_existing, 3);
    }

    #[tokio::test]
    async fn test_failed_export_write_does_not_abort_the_pass() {
        let tmp = TempDir::new("sync").unwrap();
        // A directory squatting on the target path makes the write fail for
        // this one activity.
        fs::create_dir(tmp.path().join("2.gpx")).unwrap();

        let job = SyncJob::new(FakeSource::new(&[1, 2, 3]), &config(tmp.path())).unwrap();
        let stats = job.sync_all().await.unwrap();

        assert_eq!(stats.exported, 2);
        assert_eq!(stats.failed, 1);
        assert!(tmp.path().join("1.gpx").exists());
        assert!(tmp.path().join("3.gpx").exists());
    }

    #[tokio::test]
    async fn test_incomplete_records_are_skipped_without_error() {
        struct EmptySource;

        #[async_trait]
        impl ActivitySource for EmptySource {
            async fn list_activities(&self) -> Result<Vec<ActivityStub>, SourceError> {
                Ok(vec![
                    ActivityStub {
                        log_id: 1,
                        sports_type: 1,
                        route_id: json!("r1"),
                    },
                    ActivityStub {
                        log_id: 2,
                        sports_type: 1,
                        route_id: json!("r2"),
                    },
                ])
            }

            async fn activity_detail(
                &self,
                stub: &ActivityStub,
            ) -> Result<ActivityDetail, SourceError> {
                Ok(ActivityDetail {
                    id: stub.log_id,
                    sports_type: 1,
                    // id 1: no start time; id 2: no points
                    start_time: (stub.log_id == 2).then(|| "2023-05-02T08:00:00".to_string()),
                    end_time: None,
                    points: Vec::new(),
                })
            }
        }

        let tmp = TempDir::new("sync").unwrap();
        let job = SyncJob::new(EmptySource, &config(tmp.path())).unwrap();
        let stats = job.sync_all().await.unwrap();

        assert_eq!(stats.exported, 0);
        assert_eq!(stats.skipped_empty, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_only_run_filter_drops_other_sports() {
        let tmp = TempDir::new("sync").unwrap();
        let mut source = FakeSource::new(&[1, 2]);
        source.stubs[1].sports_type = 2;

        let mut cfg = config(tmp.path());
        cfg.only_run = true;
        let job = SyncJob::new(source, &cfg).unwrap();
        let stats = job.sync_all().await.unwrap();

        assert_eq!(stats.exported, 1);
        assert!(tmp.path().join("1.gpx").exists());
        assert!(!tmp.path().join("2.gpx").exists());
    }
}

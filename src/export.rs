use crate::codoon_client::TrackPoint;
use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, NaiveDateTime, Timelike, Utc};
use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use std::fs;
use std::path::{Path, PathBuf};

/// Source platform sport codes and their labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sport {
    Hiking,
    Running,
    Cycling,
    Other(i64),
}

impl Sport {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Sport::Hiking,
            1 => Sport::Running,
            2 => Sport::Cycling,
            other => Sport::Other(other),
        }
    }

    /// GPX track type.
    pub fn slug(self) -> String {
        match self {
            Sport::Hiking => "hiking".to_string(),
            Sport::Running => "running".to_string(),
            Sport::Cycling => "cycling".to_string(),
            Sport::Other(code) => code.to_string(),
        }
    }

    /// Display name in the platform's locale, used in the track name.
    pub fn localized(self) -> String {
        match self {
            Sport::Hiking => "徒步".to_string(),
            Sport::Running => "跑步".to_string(),
            Sport::Cycling => "骑行".to_string(),
            Sport::Other(code) => code.to_string(),
        }
    }
}

/// Time-of-day bucket for the local start hour, in the platform's locale.
pub fn time_period(hour: u32) -> &'static str {
    match hour {
        0..=5 => "凌晨",
        6..=8 => "早上",
        9..=11 => "上午",
        12..=13 => "中午",
        14..=17 => "下午",
        18..=19 => "傍晚",
        20..=23 => "晚上",
        _ => "深夜",
    }
}

/// Parse the source platform's civil timestamps (`2014-03-24T08:00:00`,
/// optionally with a fractional tail).
pub fn parse_source_time(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.split('.').next().unwrap_or(raw);
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S").ok()
}

/// Writes one GPX file per activity into the export directory.
///
/// The filename stem is the activity's source id; its presence on disk is the
/// only "already synced" marker the pipeline keeps.
pub struct Exporter {
    dir: PathBuf,
    tz: FixedOffset,
}

impl Exporter {
    pub fn new(config: &Config) -> Result<Self> {
        let tz = config
            .base_tz_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| anyhow!("invalid timezone offset: {}", config.base_tz_offset_hours))?;
        fs::create_dir_all(&config.gpx_dir)
            .with_context(|| format!("creating export dir {}", config.gpx_dir.display()))?;
        Ok(Exporter {
            dir: config.gpx_dir.clone(),
            tz,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{id}.gpx"))
    }

    /// Build and write the track file for one activity.
    pub fn export(
        &self,
        id: i64,
        sport: Sport,
        start_time: NaiveDateTime,
        points: &[TrackPoint],
    ) -> Result<PathBuf> {
        let gpx = self.build_track(sport, start_time, points);

        let mut buf = Vec::new();
        gpx::write(&gpx, &mut buf).with_context(|| format!("serializing activity {id}"))?;

        let path = self.path_for(id);
        fs::write(&path, buf).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    fn build_track(&self, sport: Sport, start_time: NaiveDateTime, points: &[TrackPoint]) -> Gpx {
        let mut segment = TrackSegment::new();
        // The feed appends one trailing point that is not a real sample.
        let samples = &points[..points.len().saturating_sub(1)];
        for point in samples {
            let mut waypoint = Waypoint::new(Point::new(point.longitude, point.latitude));
            waypoint.elevation = point.elevation;
            waypoint.time = parse_source_time(&point.time_stamp)
                .and_then(|naive| self.to_utc_timestamp(naive))
                .and_then(|ts| time::OffsetDateTime::from_unix_timestamp(ts).ok())
                .map(Into::into);
            segment.points.push(waypoint);
        }

        let mut track = Track::new();
        track.name = Some(format!(
            "{}{}",
            time_period(start_time.hour()),
            sport.localized()
        ));
        track.type_ = Some(sport.slug());
        track.segments.push(segment);

        Gpx {
            version: GpxVersion::Gpx11,
            creator: Some("runsync".to_string()),
            tracks: vec![track],
            ..Default::default()
        }
    }

    /// Source timestamps are civil times in the configured base timezone.
    fn to_utc_timestamp(&self, naive: NaiveDateTime) -> Option<i64> {
        naive
            .and_local_timezone(self.tz)
            .single()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }
}

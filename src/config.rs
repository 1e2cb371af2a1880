use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;

/// Runtime configuration, read from the environment (a `.env` file is loaded
/// by the CLI before this runs).
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the GPX files are exported to and uploaded from.
    pub gpx_dir: PathBuf,
    /// Fixed UTC offset of the timezone the source platform records civil
    /// times in. Codoon timestamps are Beijing time, hence +8.
    pub base_tz_offset_hours: i32,
    /// When set, GCJ-02 coordinates are corrected to WGS-84 for activities
    /// recorded before `gcj02_cutover`.
    pub trans_gcj02_to_wgs84: bool,
    /// Activities starting before this date carry GCJ-02 coordinates.
    pub gcj02_cutover: NaiveDate,
    /// Restrict the sync to running activities.
    pub only_run: bool,
}

const DEFAULT_GPX_DIR: &str = "GPX_OUT";
const DEFAULT_CUTOVER: &str = "2014-03-24";

impl Config {
    pub fn from_env() -> Result<Self> {
        let gpx_dir = env::var("GPX_DIR").unwrap_or_else(|_| DEFAULT_GPX_DIR.to_string());

        let base_tz_offset_hours = match env::var("BASE_TZ_OFFSET_HOURS") {
            Ok(v) => v
                .parse::<i32>()
                .with_context(|| format!("invalid BASE_TZ_OFFSET_HOURS: {v}"))?,
            Err(_) => 8,
        };

        let cutover = env::var("GCJ02_CUTOVER_DATE").unwrap_or_else(|_| DEFAULT_CUTOVER.to_string());
        let gcj02_cutover = NaiveDate::parse_from_str(&cutover, "%Y-%m-%d")
            .with_context(|| format!("invalid GCJ02_CUTOVER_DATE: {cutover}"))?;

        Ok(Config {
            gpx_dir: PathBuf::from(gpx_dir),
            base_tz_offset_hours,
            trans_gcj02_to_wgs84: env_flag("TRANS_GCJ02_TO_WGS84"),
            gcj02_cutover,
            only_run: env_flag("ONLY_RUN"),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gpx_dir: PathBuf::from(DEFAULT_GPX_DIR),
            base_tz_offset_hours: 8,
            trans_gcj02_to_wgs84: false,
            gcj02_cutover: NaiveDate::parse_from_str(DEFAULT_CUTOVER, "%Y-%m-%d")
                .expect("default cutover date parses"),
            only_run: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("True") | Ok("yes")
    )
}

use crate::codoon_client::TrackPoint;
use crate::config::Config;
use chrono::{NaiveDate, NaiveDateTime};
use std::f64::consts::PI;

// Krasovsky 1940 ellipsoid, as used by the GCJ-02 obfuscation.
const A: f64 = 6378245.0;
const EE: f64 = 0.00669342162296594323;

/// Corrects coordinates recorded under the GCJ-02 datum back to WGS-84.
///
/// The source platform switched datums on a known cutover date; only
/// activities that started strictly before it need correction, and only when
/// the operator opted in (maps rendered from GCJ-02 tiles do not want it).
pub struct Normalizer {
    enabled: bool,
    cutover: NaiveDate,
}

impl Normalizer {
    pub fn from_config(config: &Config) -> Self {
        Normalizer {
            enabled: config.trans_gcj02_to_wgs84,
            cutover: config.gcj02_cutover,
        }
    }

    pub fn applies_to(&self, start_time: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        match self.cutover.and_hms_opt(0, 0, 0) {
            Some(cutover) => start_time < cutover,
            None => false,
        }
    }

    /// Per-point, order-preserving correction. Elevation and timestamps pass
    /// through untouched.
    pub fn normalize(&self, points: &mut [TrackPoint], start_time: NaiveDateTime) {
        if !self.applies_to(start_time) {
            return;
        }
        for point in points {
            let (lat, lon) = gcj02_to_wgs84(point.latitude, point.longitude);
            point.latitude = lat;
            point.longitude = lon;
        }
    }
}

/// Single-point GCJ-02 -> WGS-84 correction (eviltransform algorithm).
/// Points outside mainland China were never obfuscated and pass through.
pub fn gcj02_to_wgs84(lat: f64, lon: f64) -> (f64, f64) {
    if out_of_china(lat, lon) {
        return (lat, lon);
    }
    let (d_lat, d_lon) = delta(lat, lon);
    (lat - d_lat, lon - d_lon)
}

fn out_of_china(lat: f64, lon: f64) -> bool {
    !(72.004..=137.8347).contains(&lon) || !(0.8293..=55.8271).contains(&lat)
}

fn delta(lat: f64, lon: f64) -> (f64, f64) {
    let d_lat = transform_lat(lon - 105.0, lat - 35.0);
    let d_lon = transform_lon(lon - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * PI;
    let mut magic = rad_lat.sin();
    magic = 1.0 - EE * magic * magic;
    let sqrt_magic = magic.sqrt();
    (
        (d_lat * 180.0) / ((A * (1.0 - EE)) / (magic * sqrt_magic) * PI),
        (d_lon * 180.0) / (A / sqrt_magic * rad_lat.cos() * PI),
    )
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lon(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shanghai_points() -> Vec<TrackPoint> {
        vec![TrackPoint {
            latitude: 31.2304,
            longitude: 121.4737,
            elevation: Some(4.0),
            time_stamp: "2013-06-01T08:00:00".to_string(),
        }]
    }

    fn normalizer(enabled: bool) -> Normalizer {
        Normalizer {
            enabled,
            cutover: NaiveDate::from_ymd_opt(2014, 3, 24).unwrap(),
        }
    }

    fn start(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn test_correction_shifts_chinese_coordinates() {
        let (lat, lon) = gcj02_to_wgs84(31.2304, 121.4737);
        assert!(lat != 31.2304 && lon != 121.4737);
        // GCJ-02 offsets are a few hundred meters at most.
        assert!((lat - 31.2304).abs() < 0.01);
        assert!((lon - 121.4737).abs() < 0.01);
    }

    #[test]
    fn test_points_outside_china_pass_through() {
        let (lat, lon) = gcj02_to_wgs84(48.8566, 2.3522);
        assert_eq!((lat, lon), (48.8566, 2.3522));
    }

    #[test]
    fn test_gated_by_cutover_date() {
        let n = normalizer(true);

        let mut before = shanghai_points();
        n.normalize(&mut before, start("2013-06-01T08:00:00"));
        assert_ne!(before[0].latitude, 31.2304);
        assert_eq!(before[0].elevation, Some(4.0));

        let mut after = shanghai_points();
        n.normalize(&mut after, start("2015-06-01T08:00:00"));
        assert_eq!(after[0].latitude, 31.2304);
        assert_eq!(after[0].longitude, 121.4737);
    }

    #[test]
    fn test_gated_by_global_flag() {
        let n = normalizer(false);
        let mut points = shanghai_points();
        n.normalize(&mut points, start("2013-06-01T08:00:00"));
        assert_eq!(points[0].latitude, 31.2304);
    }

    #[test]
    fn test_cutover_day_itself_is_not_corrected() {
        let n = normalizer(true);
        assert!(n.applies_to(start("2014-03-23T23:59:59")));
        assert!(!n.applies_to(start("2014-03-24T00:00:00")));
    }
}

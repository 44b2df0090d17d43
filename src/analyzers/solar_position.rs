//! Solar position from the NOAA solar calculator equations (Meeus based).
//!
//! Elevations are apparent: the NOAA atmospheric refraction correction is
//! applied on top of the geometric elevation. Accuracy is about 0.01° for
//! dates within a few decades of J2000.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use std::f64::consts::PI;

use crate::models::{Settings, UtcOffset};

const DEG: f64 = PI / 180.0;
const UNIX_EPOCH_JULIAN_DAY: f64 = 2440587.5;
const J2000_JULIAN_DAY: f64 = 2451545.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    /// Geometric elevation in degrees
    pub elevation: f64,
    /// Elevation corrected for atmospheric refraction
    pub apparent_elevation: f64,
    /// Degrees clockwise from north
    pub azimuth: f64,
    pub declination: f64,
    /// Minutes
    pub equation_of_time: f64,
}

/// Solar geometry for one site with a fixed UTC offset
#[derive(Debug, Clone, Copy)]
pub struct SolarPositionEngine {
    latitude: f64,
    longitude: f64,
    offset: UtcOffset,
}

impl SolarPositionEngine {
    pub fn new(latitude: f64, longitude: f64, offset: UtcOffset) -> Self {
        Self {
            latitude,
            longitude,
            offset,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.latitude, settings.longitude, settings.utc_offset)
    }

    /// Station-local wall clock time to UTC
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(self.offset.seconds()))))
    }

    /// Apparent elevation in degrees for naive local timestamps, input order kept
    pub fn apparent_elevation(&self, timestamps: &[NaiveDateTime]) -> Vec<f64> {
        timestamps
            .iter()
            .map(|ts| self.position_at(self.to_utc(*ts)).apparent_elevation)
            .collect()
    }

    /// Same as `apparent_elevation` for instants already in UTC
    pub fn apparent_elevation_utc(&self, instants: &[DateTime<Utc>]) -> Vec<f64> {
        instants
            .iter()
            .map(|instant| self.position_at(*instant).apparent_elevation)
            .collect()
    }

    pub fn position_at(&self, instant: DateTime<Utc>) -> SolarPosition {
        solar_position(instant, self.latitude, self.longitude)
    }
}

/// Julian day including the fraction of the day
pub fn julian_day(instant: DateTime<Utc>) -> f64 {
    let seconds = instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) * 1e-9;
    seconds / 86400.0 + UNIX_EPOCH_JULIAN_DAY
}

fn julian_century(jd: f64) -> f64 {
    (jd - J2000_JULIAN_DAY) / 36525.0
}

fn normalize_degrees(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

fn sun_mean_longitude(t: f64) -> f64 {
    normalize_degrees(280.46646 + t * (36000.76983 + t * 0.0003032))
}

fn sun_mean_anomaly(t: f64) -> f64 {
    357.52911 + t * (35999.05029 - t * 0.0001537)
}

fn earth_eccentricity(t: f64) -> f64 {
    0.016708634 - t * (0.000042037 + t * 0.0000001267)
}

fn sun_equation_of_center(t: f64) -> f64 {
    let m = sun_mean_anomaly(t) * DEG;
    m.sin() * (1.914602 - t * (0.004817 + t * 0.000014))
        + (2.0 * m).sin() * (0.019993 - t * 0.000101)
        + (3.0 * m).sin() * 0.000289
}

fn sun_apparent_longitude(t: f64) -> f64 {
    let omega = 125.04 - 1934.136 * t;
    sun_mean_longitude(t) + sun_equation_of_center(t) - 0.00569 - 0.00478 * (omega * DEG).sin()
}

fn obliquity_corrected(t: f64) -> f64 {
    let mean = 23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.00059 - t * 0.001813))) / 60.0) / 60.0;
    let omega = 125.04 - 1934.136 * t;
    mean + 0.00256 * (omega * DEG).cos()
}

fn solar_declination(t: f64) -> f64 {
    let e = obliquity_corrected(t) * DEG;
    let lambda = sun_apparent_longitude(t) * DEG;
    (e.sin() * lambda.sin()).asin() / DEG
}

/// Equation of time in minutes
fn equation_of_time(t: f64) -> f64 {
    let e = obliquity_corrected(t) * DEG;
    let l0 = sun_mean_longitude(t) * DEG;
    let ecc = earth_eccentricity(t);
    let m = sun_mean_anomaly(t) * DEG;
    let y = (e / 2.0).tan().powi(2);

    let eq = y * (2.0 * l0).sin() - 2.0 * ecc * m.sin()
        + 4.0 * ecc * y * m.sin() * (2.0 * l0).cos()
        - 0.5 * y * y * (4.0 * l0).sin()
        - 1.25 * ecc * ecc * (2.0 * m).sin();

    4.0 * eq / DEG
}

/// NOAA refraction correction in degrees for a geometric elevation
pub fn refraction_correction(elevation: f64) -> f64 {
    if elevation > 85.0 {
        return 0.0;
    }

    let te = (elevation * DEG).tan();
    let arcseconds = if elevation > 5.0 {
        58.1 / te - 0.07 / te.powi(3) + 0.000086 / te.powi(5)
    } else if elevation > -0.575 {
        1735.0 + elevation * (-518.2 + elevation * (103.4 + elevation * (-12.79 + elevation * 0.711)))
    } else {
        -20.772 / te
    };

    arcseconds / 3600.0
}

pub fn solar_position(instant: DateTime<Utc>, latitude: f64, longitude: f64) -> SolarPosition {
    let t = julian_century(julian_day(instant));
    let declination = solar_declination(t);
    let eot = equation_of_time(t);

    let minutes = f64::from(instant.num_seconds_from_midnight()) / 60.0
        + f64::from(instant.nanosecond()) * 1e-9 / 60.0;
    let true_solar_time = (minutes + eot + 4.0 * longitude).rem_euclid(1440.0);
    let hour_angle = if true_solar_time / 4.0 < 0.0 {
        true_solar_time / 4.0 + 180.0
    } else {
        true_solar_time / 4.0 - 180.0
    };

    let lat_r = latitude * DEG;
    let decl_r = declination * DEG;
    let ha_r = hour_angle * DEG;

    let cos_zenith = (lat_r.sin() * decl_r.sin() + lat_r.cos() * decl_r.cos() * ha_r.cos()).clamp(-1.0, 1.0);
    let zenith = cos_zenith.acos() / DEG;
    let elevation = 90.0 - zenith;

    let denominator = lat_r.cos() * (zenith * DEG).sin();
    let azimuth = if denominator.abs() > 1e-10 {
        let cos_az = ((lat_r.sin() * (zenith * DEG).cos() - decl_r.sin()) / denominator).clamp(-1.0, 1.0);
        let az = cos_az.acos() / DEG;
        if hour_angle > 0.0 {
            normalize_degrees(az + 180.0)
        } else {
            normalize_degrees(540.0 - az)
        }
    } else if latitude > 0.0 {
        180.0
    } else {
        0.0
    };

    SolarPosition {
        elevation,
        apparent_elevation: elevation + refraction_correction(elevation),
        azimuth,
        declination,
        equation_of_time: eot,
    }
}

/// Apparent elevation for a naive local series at one site
pub fn apparent_elevation(
    timestamps: &[NaiveDateTime],
    latitude: f64,
    longitude: f64,
    offset: UtcOffset,
) -> Vec<f64> {
    SolarPositionEngine::new(latitude, longitude, offset).apparent_elevation(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M").unwrap()
    }

    fn temixco() -> SolarPositionEngine {
        SolarPositionEngine::new(18.8394, -99.2356, UtcOffset::from_hours(-6).unwrap())
    }

    #[test]
    fn test_julian_day_at_j2000() {
        let instant = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((julian_day(instant) - J2000_JULIAN_DAY).abs() < 1e-9);
    }

    #[test]
    fn test_local_midnight_is_below_horizon() {
        let elevations = temixco().apparent_elevation(&[local("2023-01-01 00:00")]);
        assert!(elevations[0] < -30.0, "elevation {}", elevations[0]);
    }

    #[test]
    fn test_winter_noon_elevation() {
        // Solar noon at Temixco on Jan 1 is around 12:40 local
        let elevations = temixco().apparent_elevation(&[local("2023-01-01 12:40")]);
        assert!((elevations[0] - 48.2).abs() < 1.0, "elevation {}", elevations[0]);
    }

    #[test]
    fn test_equinox_peak_matches_colatitude() {
        let engine = SolarPositionEngine::new(30.0444, 31.2357, UtcOffset::from_hours(2).unwrap());
        let day: Vec<NaiveDateTime> = (0..24 * 12)
            .map(|i| local("2023-03-20 00:00") + Duration::minutes(i * 5))
            .collect();
        let peak = engine
            .apparent_elevation(&day)
            .into_iter()
            .fold(f64::MIN, f64::max);

        assert!((peak - 60.0).abs() < 0.5, "peak {}", peak);
    }

    #[test]
    fn test_output_keeps_input_order() {
        let engine = temixco();
        let series = [local("2023-06-01 13:00"), local("2023-06-01 01:00")];
        let elevations = engine.apparent_elevation(&series);

        assert_eq!(elevations.len(), 2);
        assert!(elevations[0] > 0.0);
        assert!(elevations[1] < 0.0);
    }

    #[test]
    fn test_utc_and_local_inputs_agree() {
        let engine = temixco();
        let ts = local("2023-06-01 09:30");
        let from_local = engine.apparent_elevation(&[ts]);
        let from_utc = engine.apparent_elevation_utc(&[engine.to_utc(ts)]);
        assert_eq!(from_local, from_utc);
        assert_eq!(engine.to_utc(ts).format("%H:%M").to_string(), "15:30");
    }

    #[test]
    fn test_morning_sun_is_in_the_east() {
        let engine = temixco();
        let position = engine.position_at(engine.to_utc(local("2023-06-01 08:00")));
        assert!(position.azimuth > 45.0 && position.azimuth < 135.0, "azimuth {}", position.azimuth);
    }

    #[test]
    fn test_refraction_correction() {
        assert_eq!(refraction_correction(90.0), 0.0);
        assert!((refraction_correction(10.0) - 0.0881).abs() < 0.001);
        assert!((refraction_correction(0.0) - 1735.0 / 3600.0).abs() < 1e-9);
        assert!(refraction_correction(-10.0) > 0.0);
    }
}

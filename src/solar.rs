//! Solar-relative time normalization.
//!
//! Radiation feeds publish samples against "true solar hour" rather than
//! civil time: hour 12 means the sun's transit at the station, not 12:00
//! UTC. This module converts a calendar date plus a solar-hour offset into
//! an absolute UTC epoch using the NOAA equation-of-time approximation.
//!
//! Accuracy is bounded by the approximation itself (sub-minute over the
//! year), which is well inside the hourly resolution of the feeds.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use thiserror::Error;

/// Errors from solar time conversion.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolarTimeError {
    /// Latitude outside [-90, 90] degrees
    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(f64),

    /// Longitude outside [-180, 180] degrees
    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(f64),

    /// Altitude below the lowest land surface or implausibly high
    #[error("altitude {0} m out of range [-500, 9000]")]
    AltitudeOutOfRange(f64),

    /// Solar hour outside [0, 24]
    #[error("solar hour {0} out of range [0, 24]")]
    SolarHourOutOfRange(f64),
}

/// Geographic position of a measuring station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationPosition {
    /// Latitude in degrees, north positive
    pub latitude: f64,
    /// Longitude in degrees, east positive
    pub longitude: f64,
    /// Altitude in meters above sea level
    pub altitude: f64,
}

impl StationPosition {
    /// Check that the position describes a point on (or near) the Earth's
    /// surface. Latitude and altitude do not shift the transit time, but a
    /// nonsensical position means the station metadata is corrupt and its
    /// timestamps cannot be trusted either.
    pub fn validate(&self) -> Result<(), SolarTimeError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(SolarTimeError::LatitudeOutOfRange(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(SolarTimeError::LongitudeOutOfRange(self.longitude));
        }
        if !(-500.0..=9000.0).contains(&self.altitude) {
            return Err(SolarTimeError::AltitudeOutOfRange(self.altitude));
        }
        Ok(())
    }
}

/// Equation of time in minutes for a given date (NOAA approximation).
///
/// Positive values mean the sundial runs ahead of clock time. The annual
/// range is roughly -14.2 to +16.4 minutes.
pub fn equation_of_time_minutes(date: NaiveDate) -> f64 {
    let day = date.ordinal() as f64;
    // Fractional year in radians, evaluated at local noon
    let gamma = 2.0 * std::f64::consts::PI / 365.0 * (day - 1.0 + 0.5);
    229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin())
}

/// UTC instant of the sun's transit (solar noon) at `longitude` on `date`.
pub fn solar_noon_utc(date: NaiveDate, longitude: f64) -> DateTime<Utc> {
    let minutes_after_midnight = 720.0 - 4.0 * longitude - equation_of_time_minutes(date);
    let midnight = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default());
    midnight + Duration::seconds((minutes_after_midnight * 60.0).round() as i64)
}

/// Convert a solar-hour offset on a calendar date into a whole-second UTC
/// epoch for the given station position.
///
/// `solar_hours` may be fractional and covers the closed range [0, 24].
/// Solar hour 12 maps exactly onto [`solar_noon_utc`]; other hours are
/// offset from it, so when the correction carries the instant across
/// midnight the resulting epoch moves to the adjacent calendar day instead
/// of wrapping within `date`. Consequently
/// `solar_to_epoch(p, d, 24.0) - solar_to_epoch(p, d, 0.0)` is exactly
/// 86 400 seconds.
pub fn solar_to_epoch(
    position: StationPosition,
    date: NaiveDate,
    solar_hours: f64,
) -> Result<i64, SolarTimeError> {
    position.validate()?;
    if !(0.0..=24.0).contains(&solar_hours) {
        return Err(SolarTimeError::SolarHourOutOfRange(solar_hours));
    }
    let noon = solar_noon_utc(date, position.longitude);
    let offset_secs = ((solar_hours - 12.0) * 3600.0).round() as i64;
    Ok((noon + Duration::seconds(offset_secs)).timestamp())
}

//! Solar-hour timestamping for a station near Madrid (lat 40.0, lon -3.0,
//! alt 650 m).

use chrono::NaiveDate;
use energy_data_harvester::solar::{
    equation_of_time_minutes, solar_noon_utc, solar_to_epoch, SolarTimeError, StationPosition,
};

const STATION: StationPosition = StationPosition {
    latitude: 40.0,
    longitude: -3.0,
    altitude: 650.0,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn solar_hour_twelve_is_the_transit() {
    for d in [
        date(2023, 1, 15),
        date(2023, 4, 1),
        date(2023, 6, 21),
        date(2023, 11, 3),
    ] {
        let noon = solar_noon_utc(d, STATION.longitude).timestamp();
        let epoch = solar_to_epoch(STATION, d, 12.0).unwrap();
        assert!(
            (epoch - noon).abs() <= 60,
            "{d}: solar hour 12 is {}s from transit",
            epoch - noon
        );
    }
}

#[test]
fn full_solar_day_spans_exactly_86400_seconds() {
    for d in [
        date(2023, 2, 12),
        date(2023, 6, 21),
        date(2023, 11, 3),
        date(2024, 2, 29),
    ] {
        let start = solar_to_epoch(STATION, d, 0.0).unwrap();
        let end = solar_to_epoch(STATION, d, 24.0).unwrap();
        assert_eq!(end - start, 86_400, "{d}");
    }
}

#[test]
fn equation_of_time_stays_in_annual_range() {
    let mut d = date(2023, 1, 1);
    while d < date(2024, 1, 1) {
        let eot = equation_of_time_minutes(d);
        assert!((-15.0..=17.0).contains(&eot), "{d}: {eot} minutes");
        d = d.succ_opt().unwrap();
    }
    // Early November runs the sundial furthest ahead of the clock
    assert!(equation_of_time_minutes(date(2023, 11, 3)) > 16.0);
    // Mid February runs it furthest behind
    assert!(equation_of_time_minutes(date(2023, 2, 12)) < -14.0);
}

#[test]
fn west_of_greenwich_transits_after_1200_utc() {
    // At lon -3 the mean transit is 12 minutes past 12:00 UTC
    let noon = solar_noon_utc(date(2023, 4, 16), -3.0);
    let half_day = noon.timestamp() % 86_400;
    assert!(half_day > 12 * 3600, "transit at {noon} is before 12:00 UTC");
}

#[test]
fn fractional_hours_offset_from_the_transit() {
    let d = date(2023, 6, 1);
    let noon = solar_to_epoch(STATION, d, 12.0).unwrap();
    assert_eq!(solar_to_epoch(STATION, d, 12.5).unwrap() - noon, 1800);
    assert_eq!(solar_to_epoch(STATION, d, 5.0).unwrap() - noon, -7 * 3600);
}

#[test]
fn corrupt_station_metadata_is_rejected() {
    let d = date(2023, 6, 1);
    let bad_lat = StationPosition { latitude: 91.0, ..STATION };
    assert_eq!(
        solar_to_epoch(bad_lat, d, 12.0),
        Err(SolarTimeError::LatitudeOutOfRange(91.0))
    );
    let bad_lon = StationPosition { longitude: -181.0, ..STATION };
    assert_eq!(
        solar_to_epoch(bad_lon, d, 12.0),
        Err(SolarTimeError::LongitudeOutOfRange(-181.0))
    );
    let bad_alt = StationPosition { altitude: 9500.0, ..STATION };
    assert_eq!(
        solar_to_epoch(bad_alt, d, 12.0),
        Err(SolarTimeError::AltitudeOutOfRange(9500.0))
    );
    assert_eq!(
        solar_to_epoch(STATION, d, 24.5),
        Err(SolarTimeError::SolarHourOutOfRange(24.5))
    );
    assert_eq!(
        solar_to_epoch(STATION, d, -0.1),
        Err(SolarTimeError::SolarHourOutOfRange(-0.1))
    );
}

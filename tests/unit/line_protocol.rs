//! Line-protocol rendering and point identity.

use chrono::{DateTime, TimeZone, Utc};
use energy_data_harvester::{CanonicalPoint, Precision, SeriesKey};

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 12, 30, 0).unwrap()
}

#[test]
fn renders_tags_and_fields_in_key_order() {
    let point = CanonicalPoint::new("esios_indicator")
        .tag("indicator", "1001")
        .tag("name", "PVPC")
        .field("value", 151.33)
        .field("geo_name", "Peninsula")
        .at(ts(), Precision::Seconds);
    assert_eq!(
        point.to_line_protocol(),
        format!(
            "esios_indicator,indicator=1001,name=PVPC geo_name=\"Peninsula\",value=151.33 {}",
            ts().timestamp()
        )
    );
}

#[test]
fn millisecond_series_emits_millisecond_timestamps() {
    let ts = ts() + chrono::Duration::milliseconds(250);
    let point = CanonicalPoint::new("station_kpi_hour")
        .tag("station_code", "NE=33")
        .field("radiation_intensity", 0.52)
        .at(ts, Precision::Milliseconds);
    assert!(point
        .to_line_protocol()
        .ends_with(&ts.timestamp_millis().to_string()));
    assert_eq!(point.truncated_timestamp(), ts.timestamp_millis());
}

#[test]
fn integer_and_boolean_fields_keep_their_types() {
    let point = CanonicalPoint::new("m")
        .field("count", 7i64)
        .field("ok", true)
        .at(ts(), Precision::Seconds);
    let line = point.to_line_protocol();
    assert!(line.contains("count=7i"));
    assert!(line.contains("ok=true"));
}

#[test]
fn special_characters_are_escaped() {
    let point = CanonicalPoint::new("weather_observation")
        .tag("ubi", "MADRID, RETIRO")
        .tag("idema", "3195")
        .field("note", "val=\"x\"")
        .at(ts(), Precision::Seconds);
    let line = point.to_line_protocol();
    assert!(line.starts_with("weather_observation,idema=3195,ubi=MADRID\\,\\ RETIRO "));
    assert!(line.contains("note=\"val=\\\"x\\\"\""));
}

#[test]
fn identical_identity_renders_identical_prefix() {
    // Same measurement + tags + truncated timestamp, different field value:
    // everything up to the field set matches, which is what makes a rewrite
    // replace the stored point
    let key = SeriesKey::new("energy_consumption")
        .with_tag("cups", "ES0021")
        .with_tag("frequency", "day");
    let a = CanonicalPoint::for_series(&key)
        .field("value", 1.0)
        .at(ts(), Precision::Seconds);
    let b = CanonicalPoint::for_series(&key)
        .field("value", 2.0)
        .at(ts(), Precision::Seconds);
    let prefix_a = a.to_line_protocol().split(' ').next().unwrap().to_string();
    let prefix_b = b.to_line_protocol().split(' ').next().unwrap().to_string();
    assert_eq!(prefix_a, prefix_b);
    assert_eq!(a.truncated_timestamp(), b.truncated_timestamp());
}

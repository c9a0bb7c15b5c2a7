//! Provider point mappers, fed with captured response shapes.

use chrono::{TimeZone, Utc};
use energy_data_harvester::harvest::Payload;
use energy_data_harvester::provider::aemet::{map_observations, map_radiation_csv};
use energy_data_harvester::provider::esios::map_indicator_values;
use energy_data_harvester::provider::fusionsolar::{map_device_entries, map_station_entries};
use energy_data_harvester::provider::ide::map_production_day;
use energy_data_harvester::{FieldValue, Precision};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn payload(value: Value) -> Payload {
    Payload::Json(value)
}

mod fusionsolar {
    use super::*;

    #[test]
    fn station_entries_keep_identity_and_scalars() {
        let body = payload(json!({
            "success": true,
            "data": [{
                "stationCode": "NE=33",
                "collectTime": 1685620800000i64,
                "dataItemMap": {
                    "radiation_intensity": 0.52,
                    "inverter_power": 12.4,
                    "theory_power": null
                }
            }]
        }));
        let points = map_station_entries(&body, "station_kpi_hour").unwrap();
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.measurement(), "station_kpi_hour");
        assert_eq!(
            point.tags().get("station_code").map(String::as_str),
            Some("NE=33")
        );
        assert_eq!(point.precision(), Precision::Milliseconds);
        assert_eq!(point.truncated_timestamp(), 1685620800000);
        // Null KPIs are skipped, not stored as zeros
        assert_eq!(point.fields().len(), 2);
        assert!(!point.fields().contains_key("theory_power"));
    }

    #[test]
    fn device_entries_take_identity_from_the_task() {
        let body = payload(json!({
            "data": [{
                "sn": "INV-77",
                "collectTime": 1685577600000i64,
                "dataItemMap": {"product_power": 31.2}
            }]
        }));
        let points = map_device_entries(&body, "NE=33", 1000000077).unwrap();
        let point = &points[0];
        assert_eq!(point.measurement(), "device_kpi_day");
        assert_eq!(
            point.tags().get("device_id").map(String::as_str),
            Some("1000000077")
        );
        assert_eq!(point.tags().get("sn").map(String::as_str), Some("INV-77"));
    }

    #[test]
    fn null_data_is_an_empty_window() {
        let body = payload(json!({"success": true, "data": null}));
        assert!(map_station_entries(&body, "station_kpi_year").unwrap().is_empty());
    }

    #[test]
    fn missing_collect_time_is_a_contract_error() {
        let body = payload(json!({
            "data": [{"stationCode": "NE=33", "dataItemMap": {"v": 1.0}}]
        }));
        assert!(map_station_entries(&body, "station_kpi_hour").is_err());
    }
}

mod ide {
    use super::*;

    fn production_entry() -> Value {
        json!([{
            "cups": "ES0021000000000001XY",
            "fechaDesde": "01-06-2023",
            "fechaHasta": "01-06-2023",
            "total": 12.5,
            "periodos": ["valle", "llano", "punta"],
            "totalesPeriodosTarifarios": [4.0, 5.0, 3.5],
            "valoresPeriodosTarifarios": [
                [0.4, null, null],
                [null, 0.6, null],
                [null, null, 0.7]
            ]
        }])
    }

    #[test]
    fn one_daily_plus_one_hourly_point_per_row() {
        let points = map_production_day(&payload(production_entry()), "fallback").unwrap();
        // 1 daily summary + 3 hourly rows
        assert_eq!(points.len(), 4);

        let daily = &points[0];
        assert_eq!(daily.tags().get("frequency").map(String::as_str), Some("day"));
        assert_eq!(
            daily.timestamp(),
            Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
        );
        // Tariff totals are expanded under their period names
        assert_eq!(daily.fields().get("valle"), Some(&FieldValue::Float(4.0)));
        assert_eq!(daily.fields().get("punta"), Some(&FieldValue::Float(3.5)));

        // Hour index i maps to midnight + (i + 1) hours
        let second_hour = &points[2];
        assert_eq!(
            second_hour.timestamp(),
            Utc.with_ymd_and_hms(2023, 6, 1, 2, 0, 0).unwrap()
        );
        assert_eq!(
            second_hour.fields().get("periodos"),
            Some(&FieldValue::Text("llano".to_string()))
        );
        assert_eq!(second_hour.fields().get("value"), Some(&FieldValue::Float(0.6)));
    }

    #[test]
    fn structural_keys_never_leak_into_fields() {
        let points = map_production_day(&payload(production_entry()), "fallback").unwrap();
        for point in &points {
            for leaked in [
                "valoresPeriodosTarifarios",
                "totalesPeriodosTarifarios",
                "fechaDesde",
                "fechaHasta",
                "periodos",
                "cups",
            ] {
                assert!(
                    !point.fields().contains_key(leaked),
                    "'{leaked}' leaked into {point:?}"
                );
            }
            assert_eq!(
                point.tags().get("cups").map(String::as_str),
                Some("ES0021000000000001XY")
            );
        }
    }

    #[test]
    fn all_null_hourly_rows_are_skipped() {
        let mut entry = production_entry();
        entry[0]["valoresPeriodosTarifarios"] = json!([[null, null, null]]);
        let points = map_production_day(&payload(entry), "fallback").unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn non_array_response_is_a_contract_error() {
        assert!(map_production_day(&payload(json!({"error": "denied"})), "x").is_err());
    }
}

mod esios {
    use super::*;

    #[test]
    fn indicator_values_carry_name_tags_and_drop_time_keys() {
        let body = payload(json!({
            "indicator": {
                "id": 1001,
                "name": "PVPC tarifa 2.0TD",
                "short_name": "PVPC",
                "values": [{
                    "value": 151.33,
                    "datetime": "2023-06-01T14:00:00.000+02:00",
                    "datetime_utc": "2023-06-01T12:00:00Z",
                    "tz_time": "2023-06-01T12:00:00.000Z",
                    "geo_id": 8741,
                    "geo_name": "Peninsula"
                }]
            }
        }));
        let points = map_indicator_values(&body).unwrap();
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.measurement(), "esios_indicator");
        assert_eq!(point.tags().get("indicator").map(String::as_str), Some("1001"));
        assert_eq!(point.tags().get("short_name").map(String::as_str), Some("PVPC"));
        assert_eq!(
            point.timestamp(),
            Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(point.fields().get("value"), Some(&FieldValue::Float(151.33)));
        for denied in ["datetime", "datetime_utc", "tz_time"] {
            assert!(!point.fields().contains_key(denied), "'{denied}' leaked");
        }
    }

    #[test]
    fn missing_indicator_object_is_a_contract_error() {
        assert!(map_indicator_values(&payload(json!({"values": []}))).is_err());
    }
}

mod aemet {
    use super::*;

    const RADIATION_CSV: &str = "\
\"RADIACION GLOBAL. Valores horarios en kJ/m2\"\n\
\"01-06-23\"\n\
;;Tipo;5;6;7;SUMA\n\
\"MADRID, RETIRO\";3195;GL;120;340;560;1020\n\
\"MADRID, RETIRO\";3195;UVB;;1.2;2.4;3.6\n\
\"ATLANTIS\";0000X;GL;99;99;99;297\n";

    fn stations() -> Vec<Value> {
        vec![json!({
            "idema": "3195",
            "ubi": "MADRID, RETIRO",
            "lat": 40.41,
            "lon": -3.68,
            "alt": 667.0,
            "fint": "2023-06-01T11:00:00",
            "ta": 24.6,
            "hr": 38.0,
            "geo850": {"value": 1560.0}
        })]
    }

    #[test]
    fn radiation_rows_become_solar_timed_points() {
        let (points, identifiers) = map_radiation_csv(RADIATION_CSV, &stations()).unwrap();
        // 3 GL values + 2 UVB values (first UVB cell is empty); the unknown
        // station's rows are dropped, and SUMA columns never map
        assert_eq!(points.len(), 5);
        assert_eq!(identifiers, BTreeSet::from(["3195".to_string()]));

        let gl: Vec<_> = points
            .iter()
            .filter(|p| p.tags().get("radiation_type").map(String::as_str) == Some("GL"))
            .collect();
        assert_eq!(gl.len(), 3);
        // Consecutive solar hours are exactly one hour apart
        assert_eq!(gl[1].timestamp() - gl[0].timestamp(), chrono::Duration::hours(1));
        assert_eq!(gl[0].fields().get("value"), Some(&FieldValue::Float(120.0)));
        assert_eq!(
            gl[0].tags().get("identifier").map(String::as_str),
            Some("3195")
        );
    }

    #[test]
    fn data_row_before_headers_is_rejected() {
        let headerless = "\"MADRID, RETIRO\";3195;GL;120;340\n";
        assert!(map_radiation_csv(headerless, &stations()).is_err());
    }

    #[test]
    fn observations_map_only_contributing_stations() {
        let mut all = stations();
        all.push(json!({
            "idema": "9999",
            "fint": "2023-06-01T11:00:00",
            "ta": 18.0
        }));
        let wanted = BTreeSet::from(["3195".to_string()]);
        let points = map_observations(&all, &wanted);
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.measurement(), "weather_observation");
        assert_eq!(point.tags().get("idema").map(String::as_str), Some("3195"));
        // Identity keys stay out of the field set; geo850 flattens to value
        assert!(!point.fields().contains_key("idema"));
        assert!(!point.fields().contains_key("fint"));
        assert_eq!(point.fields().get("geo850"), Some(&FieldValue::Float(1560.0)));
        assert_eq!(point.fields().get("ta"), Some(&FieldValue::Float(24.6)));
        assert_eq!(
            point.timestamp(),
            Utc.with_ymd_and_hms(2023, 6, 1, 11, 0, 0).unwrap()
        );
    }
}

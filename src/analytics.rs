//! Read-only views computed over the record log: summary statistics,
//! trend per numeric field, hourly activity and CSV export.

use crate::error::{HubError, Result};
use crate::record::Record;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const TREND_WINDOW: usize = 10;

pub const SENSOR_EXPORT: &str = "sensor_data";
pub const ACTUATOR_EXPORT: &str = "actuator_data";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    pub count: usize,
    pub mean: f64,
    /// sample standard deviation; absent with a single value
    pub std: Option<f64>,
    pub min: f64,
    #[serde(rename = "25%")]
    pub p25: f64,
    #[serde(rename = "50%")]
    pub p50: f64,
    #[serde(rename = "75%")]
    pub p75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub recent_avg: f64,
    pub overall_avg: f64,
    pub delta: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldStats {
    pub field: String,
    #[serde(flatten)]
    pub summary: FieldSummary,
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub total_readings: usize,
    pub first_timestamp: String,
    pub last_timestamp: String,
    pub fields: Vec<FieldStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyCount {
    pub hour: String,
    pub count: usize,
}

/// Fields whose every present, non-null value is a JSON number, in
/// first-appearance order.
pub fn numeric_columns(records: &[&Record]) -> Vec<String> {
    let mut columns: Vec<(String, bool)> = Vec::new();
    for record in records {
        for (key, value) in record.fields() {
            let numeric = matches!(value, Value::Number(_) | Value::Null);
            match columns.iter_mut().find(|(name, _)| name == key) {
                Some((_, ok)) => *ok &= numeric,
                None => columns.push((key.clone(), numeric)),
            }
        }
    }
    columns
        .into_iter()
        .filter(|(name, ok)| *ok && records.iter().any(|r| r.get(name).and_then(Value::as_f64).is_some()))
        .map(|(name, _)| name)
        .collect()
}

pub fn column_values(records: &[&Record], field: &str) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.get(field).and_then(Value::as_f64))
        .collect()
}

pub fn describe(values: &[f64]) -> Option<FieldSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let std = (count > 1).then(|| {
        let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    });

    Some(FieldSummary {
        count,
        mean,
        std,
        min: sorted[0],
        p25: quantile(&sorted, 0.25),
        p50: quantile(&sorted, 0.5),
        p75: quantile(&sorted, 0.75),
        max: sorted[count - 1],
    })
}

/// Linear interpolation between closest ranks over sorted input.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Average of `recent` against the average of all `values`. `recent` holds
/// the values found in the newest rows of the log, so it may be empty for a
/// sparse field.
pub fn trend(values: &[f64], recent: &[f64]) -> Option<Trend> {
    if values.len() < 2 || recent.is_empty() {
        return None;
    }
    let overall_avg = values.iter().sum::<f64>() / values.len() as f64;
    let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
    let direction = if recent_avg > overall_avg {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };
    Some(Trend {
        recent_avg,
        overall_avg,
        delta: recent_avg - overall_avg,
        direction,
    })
}

pub fn summarize(records: &[&Record]) -> Result<LogStats> {
    let (first, last) = match (records.first(), records.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(HubError::NotFound("No data available".to_string())),
    };

    // trend window counts rows, not values
    let recent_rows = &records[records.len().saturating_sub(TREND_WINDOW)..];

    let fields = numeric_columns(records)
        .into_iter()
        .filter_map(|field| {
            let values = column_values(records, &field);
            let summary = describe(&values)?;
            let field_trend = if records.len() > 1 {
                trend(&values, &column_values(recent_rows, &field))
            } else {
                None
            };
            Some(FieldStats {
                field,
                summary,
                trend: field_trend,
            })
        })
        .collect();

    Ok(LogStats {
        total_readings: records.len(),
        first_timestamp: first.timestamp().to_string(),
        last_timestamp: last.timestamp().to_string(),
        fields,
    })
}

/// Record counts per local clock hour, oldest hour first.
pub fn hourly_activity(records: &[&Record]) -> Vec<HourlyCount> {
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        let hour = record.received_at().format("%Y-%m-%d %H:00").to_string();
        *buckets.entry(hour).or_default() += 1;
    }
    buckets
        .into_iter()
        .map(|(hour, count)| HourlyCount { hour, count })
        .collect()
}

/// `{prefix}_YYYYmmdd_HHMMSS.csv`
pub fn export_file_name(prefix: &str, now: &DateTime<Local>) -> String {
    format!("{}_{}.csv", prefix, now.format("%Y%m%d_%H%M%S"))
}

/// CSV of the public record views.
pub fn to_csv(records: &[&Record]) -> String {
    let rows: Vec<_> = records.iter().map(|r| r.public_view()).collect();
    rows_to_csv(&rows)
}

/// Columns are the union of keys in first-appearance order; missing cells
/// are empty and nested values are written as JSON text.
pub fn rows_to_csv(rows: &[Map<String, Value>]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut out = String::new();
    push_line(&mut out, columns.iter().map(|c| csv_cell(c)));
    for row in rows {
        push_line(
            &mut out,
            columns.iter().map(|c| match row.get(*c) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => csv_cell(s),
                Some(other) => csv_cell(&other.to_string()),
            }),
        );
    }
    out
}

fn push_line(out: &mut String, cells: impl Iterator<Item = String>) {
    let line: Vec<String> = cells.collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

fn csv_cell(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(payload: Value, h: u32, m: u32) -> Record {
        let at = Local.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap();
        Record::from_value(payload, at).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn describe_matches_sample_statistics() {
        let s = describe(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(s.count, 4);
        assert!(close(s.mean, 2.5));
        assert!(close(s.std.unwrap(), 1.2909944487358056));
        assert!(close(s.min, 1.0));
        assert!(close(s.p25, 1.75));
        assert!(close(s.p50, 2.5));
        assert!(close(s.p75, 3.25));
        assert!(close(s.max, 4.0));
    }

    #[test]
    fn describe_single_value_has_no_std() {
        let s = describe(&[7.0]).unwrap();
        assert_eq!(s.std, None);
        assert!(close(s.p75, 7.0));
        assert!(describe(&[]).is_none());
    }

    #[test]
    fn trend_compares_last_ten_with_overall() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        let t = trend(&values, &values[10..]).unwrap();
        assert!(close(t.overall_avg, 10.5));
        assert!(close(t.recent_avg, 15.5));
        assert!(close(t.delta, 5.0));
        assert_eq!(t.direction, TrendDirection::Increasing);

        let flat = trend(&[3.0, 3.0], &[3.0, 3.0]).unwrap();
        assert_eq!(flat.direction, TrendDirection::Decreasing);
        assert!(trend(&[1.0], &[1.0]).is_none());
        assert!(trend(&[1.0, 2.0], &[]).is_none());
    }

    #[test]
    fn mixed_columns_are_not_numeric() {
        let a = record(json!({"temp": 20, "id": "A", "code": 1}), 10, 0);
        let b = record(json!({"temp": 22.5, "id": "B", "code": "x", "light": null}), 10, 1);
        let cols = numeric_columns(&[&a, &b]);
        assert_eq!(cols, vec!["temp"]);
    }

    #[test]
    fn summarize_requires_data() {
        let err = summarize(&[]).unwrap_err();
        assert_eq!(err.to_string(), "No data available");
    }

    #[test]
    fn summarize_reports_fields_and_bounds() {
        let a = record(json!({"temp": 20.0, "hum": 50}), 9, 0);
        let b = record(json!({"temp": 24.0}), 9, 30);
        let stats = summarize(&[&a, &b]).unwrap();
        assert_eq!(stats.total_readings, 2);
        assert_eq!(stats.first_timestamp, "2024-05-01 09:00:00");
        assert_eq!(stats.last_timestamp, "2024-05-01 09:30:00");
        assert_eq!(stats.fields.len(), 2);
        assert_eq!(stats.fields[0].field, "temp");
        assert!(stats.fields[0].trend.is_some());
        assert_eq!(stats.fields[1].summary.count, 1);
        assert!(stats.fields[1].trend.is_none());
    }

    #[test]
    fn sparse_field_trend_uses_last_ten_rows() {
        let mut recs = Vec::new();
        for i in 1..=12u32 {
            let payload = match i {
                1 => json!({"temp": i, "pressure": 100.0}),
                2 => json!({"temp": i, "pressure": 110.0}),
                12 => json!({"temp": i, "pressure": 130.0}),
                _ => json!({"temp": i}),
            };
            recs.push(record(payload, 11, i));
        }
        let refs: Vec<_> = recs.iter().collect();
        let stats = summarize(&refs).unwrap();

        let pressure = stats.fields.iter().find(|f| f.field == "pressure").unwrap();
        let t = pressure.trend.as_ref().unwrap();
        assert!(close(t.recent_avg, 130.0));
        assert!(close(t.overall_avg, 340.0 / 3.0));
        assert_eq!(t.direction, TrendDirection::Increasing);
    }

    #[test]
    fn sparse_field_absent_from_recent_rows_has_no_trend() {
        let mut recs = vec![record(json!({"temp": 1, "light": 5}), 9, 0), record(json!({"temp": 2, "light": 7}), 9, 1)];
        for i in 2..12u32 {
            recs.push(record(json!({"temp": i + 1}), 9, i));
        }
        let refs: Vec<_> = recs.iter().collect();
        let stats = summarize(&refs).unwrap();
        let light = stats.fields.iter().find(|f| f.field == "light").unwrap();
        assert_eq!(light.summary.count, 2);
        assert!(light.trend.is_none());
    }

    #[test]
    fn activity_groups_by_hour() {
        let recs = [
            record(json!({"v": 1}), 8, 15),
            record(json!({"v": 2}), 8, 59),
            record(json!({"v": 3}), 10, 0),
        ];
        let refs: Vec<_> = recs.iter().collect();
        assert_eq!(
            hourly_activity(&refs),
            vec![
                HourlyCount { hour: "2024-05-01 08:00".into(), count: 2 },
                HourlyCount { hour: "2024-05-01 10:00".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn csv_uses_first_appearance_columns() {
        let a = record(json!({"temp": 21.5, "sensor_id": "ESP32,001"}), 12, 0);
        let b = record(json!({"temp": 22, "note": "say \"hi\""}), 12, 1);
        let csv = to_csv(&[&a, &b]);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], "temp,sensor_id,timestamp,note");
        assert_eq!(lines[1], "21.5,\"ESP32,001\",2024-05-01 12:00:00,");
        assert_eq!(lines[2], "22,,2024-05-01 12:01:00,\"say \"\"hi\"\"\"");
        assert!(!csv.contains("datetime"));
    }

    #[test]
    fn nested_values_are_json_cells() {
        let rows = vec![
            json!({"timestamp": "t1", "state": 1, "response": {"ok": true}}),
            json!({"timestamp": "t2", "state": 0}),
        ];
        let rows: Vec<Map<String, Value>> = rows.into_iter().map(|v| v.as_object().unwrap().clone()).collect();
        let csv = rows_to_csv(&rows);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], "timestamp,state,response");
        assert_eq!(lines[1], r#"t1,1,"{""ok"":true}""#);
        assert_eq!(lines[2], "t2,0,");
    }

    #[test]
    fn export_name_is_timestamped() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 7, 8, 9).unwrap();
        assert_eq!(export_file_name(SENSOR_EXPORT, &at), "sensor_data_20240501_070809.csv");
        assert_eq!(export_file_name(ACTUATOR_EXPORT, &at), "actuator_data_20240501_070809.csv");
    }
}

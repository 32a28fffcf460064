use crate::record::Record;
use crate::server::SharedLog;
use log::info;
use tokio::time::{sleep, Duration};

const MAX_SUMMARY_FIELDS: usize = 4;

/// Logs a one-line view of the hub every `interval` while serving.
pub async fn run(log: SharedLog, interval: Duration, port: u16) {
    loop {
        sleep(interval).await;

        // Snapshot under the lock, log outside it
        let line = {
            let log = log.lock().await;
            summary_line(log.len(), log.latest(), port)
        };
        info!("{}", line);
    }
}

pub fn summary_line(total: usize, latest: Option<&Record>, port: u16) -> String {
    let latest = match latest {
        Some(record) => record,
        None => {
            return format!(
                "Waiting for sensor data... POST JSON to http://localhost:{}/sensor/data",
                port
            )
        }
    };

    let mut line = format!("Total readings: {} | Last update: {}", total, latest.timestamp());
    let metrics: Vec<String> = latest
        .numeric_fields()
        .take(MAX_SUMMARY_FIELDS)
        .map(|(name, value)| format!("{}={}", name, format_metric(value)))
        .collect();
    if !metrics.is_empty() {
        line.push_str(" | ");
        line.push_str(&metrics.join(" "));
    }
    line
}

fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use serde_json::json;

    #[test]
    fn empty_log_prompts_for_data() {
        assert_eq!(
            summary_line(0, None, 5002),
            "Waiting for sensor data... POST JSON to http://localhost:5002/sensor/data"
        );
    }

    #[test]
    fn shows_first_numeric_fields() {
        let at = Local.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let record = Record::from_value(
            json!({"temperature": 25.456, "sensor_id": "ESP32_001", "humidity": 60, "a": 1, "b": 2, "c": 3}),
            at,
        )
        .unwrap();
        assert_eq!(
            summary_line(7, Some(&record), 5002),
            "Total readings: 7 | Last update: 2024-06-01 08:00:00 | temperature=25.46 humidity=60 a=1 b=2"
        );
    }
}

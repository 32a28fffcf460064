use crate::analytics;
use crate::config::DeviceConfig;
use crate::error::{ErrorKind, HubError, Result};
use crate::record::{now_timestamp, Record};
use crate::types::{ActuatorEvent, ActuatorState, BoundedLog};
use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;

const NO_DATA: &str = "No data available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Unknown,
    Online,
    Offline,
}

/// Canned analyses the model can be asked for over the device history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AnalysisKind {
    Sensor,
    Actuator,
    Report,
    Maintenance,
    /// A free-form question asked over the histories
    Custom,
}

impl AnalysisKind {
    pub fn label(self) -> &'static str {
        match self {
            AnalysisKind::Sensor => "Analyze Current Sensor Data",
            AnalysisKind::Actuator => "Analyze Actuator Performance",
            AnalysisKind::Report => "Generate Device Report",
            AnalysisKind::Maintenance => "Predict Maintenance Needs",
            AnalysisKind::Custom => "Custom Analysis",
        }
    }
}

/// HTTP client for the device's `/sensor` and `/actuator` endpoints.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    status_timeout: Duration,
}

impl DeviceClient {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            status_timeout: Duration::from_secs(config.status_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn expect_json(method: &str, url: String, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Status {
                method: method.to_string(),
                url,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    pub async fn read_sensor(&self) -> Result<Value> {
        let url = format!("{}/sensor", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::expect_json("GET", url, response).await
    }

    pub async fn set_actuator(&self, state: ActuatorState) -> Result<Value> {
        let url = format!("{}/actuator", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "state": state.value() }))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::expect_json("POST", url, response).await
    }

    /// Online only when `/sensor` answers 200 within the status timeout.
    pub async fn check_status(&self) -> DeviceStatus {
        let url = format!("{}/sensor", self.base_url);
        match self.http.get(&url).timeout(self.status_timeout).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => DeviceStatus::Online,
            Ok(resp) => {
                warn!("Device status check returned {}", resp.status());
                DeviceStatus::Offline
            }
            Err(e) => {
                warn!("Device status check failed: {}", e);
                DeviceStatus::Offline
            }
        }
    }
}

/// What one `watch` run does besides reading the sensor.
#[derive(Debug, Clone, Default)]
pub struct WatchPlan {
    pub interval: Duration,
    /// Stop after this many reads; `None` polls until the future is dropped
    pub samples: Option<usize>,
    /// Actuator state applied before the first read
    pub initial_state: Option<ActuatorState>,
    /// Flip the actuator after every this many reads
    pub toggle_every: Option<usize>,
}

/// Controller state: last known status plus bounded reading and actuator
/// histories.
pub struct DeviceController {
    client: DeviceClient,
    status: DeviceStatus,
    readings: BoundedLog<Record>,
    actuator_events: BoundedLog<ActuatorEvent>,
}

impl DeviceController {
    pub fn new(client: DeviceClient, history_size: usize) -> Self {
        Self {
            client,
            status: DeviceStatus::Unknown,
            readings: BoundedLog::new(history_size),
            actuator_events: BoundedLog::new(history_size),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn readings(&self) -> &BoundedLog<Record> {
        &self.readings
    }

    pub fn actuator_events(&self) -> &BoundedLog<ActuatorEvent> {
        &self.actuator_events
    }

    pub async fn refresh_status(&mut self) -> DeviceStatus {
        self.status = self.client.check_status().await;
        self.status
    }

    fn note_failure(&mut self, err: &HubError) {
        if err.kind() == ErrorKind::Transport {
            self.status = DeviceStatus::Offline;
        }
    }

    /// Reads the sensor once and stamps the reading into the history.
    pub async fn read(&mut self) -> Result<&Record> {
        let value = match self.client.read_sensor().await {
            Ok(value) => value,
            Err(e) => {
                self.note_failure(&e);
                return Err(e);
            }
        };
        self.status = DeviceStatus::Online;

        let record = Record::from_value(value, Local::now())?;
        self.readings.push(record);
        self.readings
            .latest()
            .ok_or_else(|| HubError::Internal("reading history is empty after push".to_string()))
    }

    pub async fn set_actuator(&mut self, state: ActuatorState) -> Result<&ActuatorEvent> {
        let response = match self.client.set_actuator(state).await {
            Ok(response) => response,
            Err(e) => {
                self.note_failure(&e);
                return Err(e);
            }
        };
        info!("Actuator turned {}", state);

        self.actuator_events.push(ActuatorEvent {
            timestamp: now_timestamp(),
            state: state.value(),
            response,
        });
        self.actuator_events
            .latest()
            .ok_or_else(|| HubError::Internal("actuator history is empty after push".to_string()))
    }

    /// Polls the sensor per `plan`, driving the actuator along the way.
    /// Failed reads and actuator writes are logged and polling continues.
    /// Returns the number of successful reads.
    pub async fn watch<F>(&mut self, plan: &WatchPlan, mut on_reading: F) -> usize
    where
        F: FnMut(&Record),
    {
        if plan.samples == Some(0) {
            return 0;
        }

        let mut actuator = None;
        if let Some(state) = plan.initial_state {
            match self.set_actuator(state).await {
                Ok(_) => actuator = Some(state),
                Err(e) => error!("Error setting actuator: {}", e),
            }
        }

        let mut attempts = 0;
        let mut successes = 0;

        loop {
            match self.read().await {
                Ok(record) => {
                    on_reading(record);
                    successes += 1;
                }
                Err(e) => {
                    error!("Error reading sensor: {}", e);
                }
            }
            attempts += 1;

            if plan.toggle_every.is_some_and(|n| n > 0 && attempts % n == 0) {
                let next = actuator.map_or(ActuatorState::On, ActuatorState::toggled);
                match self.set_actuator(next).await {
                    Ok(_) => actuator = Some(next),
                    Err(e) => error!("Error setting actuator: {}", e),
                }
            }

            if plan.samples.is_some_and(|n| attempts >= n) {
                break;
            }
            sleep(plan.interval).await;
        }

        successes
    }

    /// Builds the prompt for an analysis from the current histories. Only
    /// `Custom` uses `question`, and requires it.
    pub fn prompt(&self, kind: AnalysisKind, question: Option<&str>) -> Result<String> {
        let prompt = match kind {
            AnalysisKind::Sensor => format!(
                "Analyze this IoT sensor data and provide insights: {}",
                render(self.readings.tail(5))
            ),
            AnalysisKind::Actuator => format!(
                "Analyze the actuator state changes and performance: {}",
                render(self.actuator_events.tail(10))
            ),
            AnalysisKind::Report => format!(
                "Generate a comprehensive report for this IoT device based on sensor data: {} and actuator states: {}",
                render(self.readings.tail(10)),
                render(self.actuator_events.tail(5))
            ),
            AnalysisKind::Maintenance => format!(
                "Based on this sensor data, predict potential maintenance needs: {}",
                render(self.readings.tail(10))
            ),
            AnalysisKind::Custom => {
                let question = question
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| HubError::validation("Custom analysis needs a question"))?;
                format!(
                    "{}\n\nDevice sensor data: {}\nActuator states: {}",
                    question,
                    render(self.readings.tail(10)),
                    render(self.actuator_events.tail(5))
                )
            }
        };
        Ok(prompt)
    }

    /// Reading history as CSV, without `datetime`.
    pub fn sensor_csv(&self) -> String {
        let records: Vec<&Record> = self.readings.iter().collect();
        analytics::to_csv(&records)
    }

    pub fn actuator_csv(&self) -> Result<String> {
        let rows = self
            .actuator_events
            .iter()
            .map(|event| match serde_json::to_value(event)? {
                Value::Object(row) => Ok(row),
                _ => Err(HubError::Internal("actuator event is not an object".to_string())),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(analytics::rows_to_csv(&rows))
    }
}

fn render<'a, T: Serialize + 'a>(items: impl Iterator<Item = &'a T>) -> String {
    let items: Vec<&T> = items.collect();
    if items.is_empty() {
        return NO_DATA.to_string();
    }
    serde_json::to_string(&items).unwrap_or_else(|_| NO_DATA.to_string())
}

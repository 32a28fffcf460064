//! Sensor ingestion hub with a bounded in-memory record log, plus command-line
//! clients for the hub, arbitrary REST APIs, a generative-language API and a
//! network-attached sensor/actuator device.

pub mod analytics;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod genai;
pub mod history;
pub mod hub_client;
pub mod record;
pub mod server;
pub mod summary;
pub mod types;

pub use error::{ErrorKind, HubError};
pub use record::Record;
pub use types::BoundedLog;

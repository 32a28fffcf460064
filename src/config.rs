use crate::console::HttpMethod;
use crate::device::AnalysisKind;
use crate::error::HubError;
use crate::types::{ActuatorState, DEFAULT_PER_PAGE};
use anyhow::{Context, Result};
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "./sensor-hub.toml";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Parser, Debug)]
#[clap(name = "sensor-hub", version, about)]
pub struct Cli {
    /// Path to configuration file (defaults to ./sensor-hub.toml when present)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (error, warn, info, debug, trace)
    #[clap(long, global = true)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sensor ingestion server
    Serve {
        /// Override bind address
        #[clap(long)]
        bind: Option<String>,
        /// Override listen port
        #[clap(long)]
        port: Option<u16>,
        /// Override log capacity
        #[clap(long)]
        max_readings: Option<usize>,
    },

    /// Talk to a running hub
    Hub {
        /// Override hub base URL
        #[clap(long)]
        url: Option<String>,
        #[clap(subcommand)]
        action: HubAction,
    },

    /// Send an ad-hoc REST request
    Request(RequestArgs),

    /// Send a prompt to the generative-language API
    Ask(AskArgs),

    /// Read and control the network device
    Device {
        /// Override device base URL
        #[clap(long)]
        base_url: Option<String>,
        #[clap(subcommand)]
        action: DeviceAction,
    },

    /// Show or clear saved request and conversation histories
    History {
        #[clap(subcommand)]
        kind: HistoryKind,
    },
}

#[derive(Subcommand, Debug)]
pub enum HubAction {
    /// Show hub status and reading count
    Status,
    /// Show the most recent reading
    Latest,
    /// Post a reading: inline JSON, or @path to read it from a file
    Send {
        #[clap(required_unless_present = "random")]
        payload: Option<String>,
        /// Send a generated test reading instead
        #[clap(long, conflicts_with = "payload")]
        random: bool,
    },
    /// Page through stored readings
    Readings {
        #[clap(long)]
        page: Option<usize>,
        #[clap(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: usize,
    },
    /// Per-field statistics and trends
    Stats,
    /// Readings per hour
    Activity,
    /// Download readings as CSV
    Export {
        /// Output file (defaults to a timestamped name in the current directory)
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Remove all stored readings
    Clear,
}

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    #[clap(long, value_enum, default_value_t = HttpMethod::Get)]
    pub method: HttpMethod,
    #[clap(long)]
    pub url: String,
    /// Headers as a JSON object
    #[clap(long)]
    pub headers: Option<String>,
    /// Query parameters as a JSON object (GET only)
    #[clap(long)]
    pub query: Option<String>,
    /// JSON body (POST and PUT only)
    #[clap(long)]
    pub body: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct AskArgs {
    #[clap(long)]
    pub prompt: String,
    #[clap(long)]
    pub model: Option<String>,
    #[clap(long)]
    pub temperature: Option<f32>,
    #[clap(long)]
    pub max_tokens: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum DeviceAction {
    /// Check whether the device answers
    Status,
    /// Read the sensor once
    Read,
    /// Switch the actuator
    Set {
        #[clap(value_enum)]
        state: ActuatorState,
    },
    /// Poll the sensor repeatedly, optionally driving the actuator and
    /// analysing the session with the model
    Watch {
        /// Seconds between reads
        #[clap(long)]
        interval: Option<u64>,
        /// Stop after this many reads (runs until Ctrl-C otherwise)
        #[clap(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        samples: Option<usize>,
        /// Switch the actuator to this state before the first read
        #[clap(long, value_enum)]
        set: Option<ActuatorState>,
        /// Flip the actuator after every N reads
        #[clap(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        toggle_every: Option<usize>,
        /// Ask the model for these analyses when done (repeatable)
        #[clap(long, value_enum)]
        analysis: Vec<AnalysisKind>,
        /// Question for `--analysis custom`
        #[clap(long)]
        question: Option<String>,
        /// Write sensor_data_*.csv and actuator_data_*.csv here when done
        #[clap(long)]
        export_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryKind {
    /// Successful JSON responses from `request`
    ApiCalls(HistoryArgs),
    /// Prompts and answers from `ask` and `device watch --analysis`
    Conversations(HistoryArgs),
}

#[derive(clap::Args, Debug)]
pub struct HistoryArgs {
    /// Show at most this many of the newest entries
    #[clap(long, default_value_t = 10)]
    pub last: usize,
    /// Print entries as JSON
    #[clap(long)]
    pub json: bool,
    /// Delete the saved history
    #[clap(long)]
    pub clear: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub device: DeviceConfig,
    pub genai: GenAiConfig,
    pub console: ConsoleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            hub: HubConfig::default(),
            device: DeviceConfig::default(),
            genai: GenAiConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Log capacity; older readings are evicted past this
    #[serde(default = "default_max_readings")]
    pub max_readings: usize,

    /// Seconds between console summaries while serving; 0 disables them
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5002
}

fn default_max_readings() -> usize {
    1000
}

fn default_summary_interval() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_readings: default_max_readings(),
            summary_interval_secs: default_summary_interval(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub url: String,
    pub timeout_secs: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5002".to_string(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub history_size: usize,
    pub poll_interval_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.43.64".to_string(),
            request_timeout_secs: 5,
            status_timeout_secs: 3,
            history_size: 100,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: Option<u64>,
    pub history_size: usize,
    /// Saved conversations; an empty path keeps them in memory only
    pub history_file: PathBuf,
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            model: "gemini-pro".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout_secs: None,
            history_size: 50,
            history_file: PathBuf::from(".sensor-hub/conversations.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub history_size: usize,
    pub timeout_secs: Option<u64>,
    /// Saved API calls; an empty path keeps them in memory only
    pub history_file: PathBuf,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            history_size: 50,
            timeout_secs: None,
            history_file: PathBuf::from(".sensor-hub/api-calls.json"),
        }
    }
}

pub fn timeout(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> std::result::Result<(), HubError> {
        if self.server.max_readings == 0 {
            return Err(HubError::ConfigError("server.max_readings must be at least 1".into()));
        }
        if self.device.history_size == 0 {
            return Err(HubError::ConfigError("device.history_size must be at least 1".into()));
        }
        if self.console.history_size == 0 || self.genai.history_size == 0 {
            return Err(HubError::ConfigError("history_size must be at least 1".into()));
        }
        crate::genai::GenerationSettings::new(
            self.genai.model.clone(),
            self.genai.temperature,
            self.genai.max_tokens,
        )
        .map_err(|e| HubError::ConfigError(format!("genai: {}", e)))?;
        Ok(())
    }

    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(ref level) = cli.log_level {
            self.log_level = level.clone();
        }

        match &cli.command {
            Command::Serve {
                bind,
                port,
                max_readings,
            } => {
                if let Some(bind) = bind {
                    self.server.bind = bind.clone();
                }
                if let Some(port) = port {
                    self.server.port = *port;
                }
                if let Some(max) = max_readings {
                    self.server.max_readings = *max;
                }
            }
            Command::Hub { url: Some(url), .. } => {
                self.hub.url = url.clone();
            }
            Command::Device {
                base_url: Some(base_url),
                ..
            } => {
                self.device.base_url = base_url.clone();
            }
            Command::Ask(args) => {
                if let Some(ref model) = args.model {
                    self.genai.model = model.clone();
                }
                if let Some(t) = args.temperature {
                    self.genai.temperature = t;
                }
                if let Some(n) = args.max_tokens {
                    self.genai.max_tokens = n;
                }
            }
            _ => {}
        }
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    Config::from_toml(&content)
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    // Explicit file, then the default location, then built-in defaults
    let mut config = match cli.config {
        Some(ref path) => read_config_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    // API key from the environment wins over the file
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.is_empty() {
            config.genai.api_key = key;
        }
    }

    // Apply CLI overrides
    config.apply_overrides(cli);
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["sensor-hub"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 5002);
        assert_eq!(config.server.max_readings, 1000);
        assert_eq!(config.device.request_timeout_secs, 5);
        assert_eq!(config.device.status_timeout_secs, 3);
        assert_eq!(config.device.history_size, 100);
        assert_eq!(config.genai.model, "gemini-pro");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"
            [server]
            port = 6000
            [device]
            base_url = "http://10.0.0.7"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.device.base_url, "http://10.0.0.7");
        assert_eq!(config.device.poll_interval_secs, 5);
    }

    #[test]
    fn validation_rejects_zero_capacity() {
        let mut config = Config::default();
        config.server.max_readings = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_temperature() {
        let mut config = Config::default();
        config.genai.temperature = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn serve_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7000\nmax_readings = 20").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = cli(&["--config", &path, "serve", "--port", "7100"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.server.max_readings, 20);
        assert_eq!(config.server.listen_addr(), "0.0.0.0:7100");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let cli = cli(&["--config", "/nonexistent/sensor-hub.toml", "hub", "status"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn ask_flags_override_generation_settings() {
        let mut config = Config::default();
        let cli = cli(&["ask", "--prompt", "hi", "--model", "gemini-1.5-flash", "--max-tokens", "64"]);
        config.apply_overrides(&cli);
        assert_eq!(config.genai.model, "gemini-1.5-flash");
        assert_eq!(config.genai.max_tokens, 64);
    }

    #[test]
    fn device_commands_parse() {
        let cli = cli(&[
            "device", "--base-url", "http://esp", "watch", "--samples", "3", "--set", "on", "--toggle-every", "2",
            "--analysis", "report", "--analysis", "custom", "--question", "Why so warm?",
        ]);
        match cli.command {
            Command::Device {
                base_url,
                action:
                    DeviceAction::Watch {
                        samples,
                        set,
                        toggle_every,
                        analysis,
                        question,
                        ..
                    },
            } => {
                assert_eq!(base_url.as_deref(), Some("http://esp"));
                assert_eq!(samples, Some(3));
                assert_eq!(set, Some(ActuatorState::On));
                assert_eq!(toggle_every, Some(2));
                assert_eq!(analysis, vec![AnalysisKind::Report, AnalysisKind::Custom]);
                assert_eq!(question.as_deref(), Some("Why so warm?"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn zero_samples_are_rejected() {
        let args = ["sensor-hub", "device", "watch", "--samples", "0"];
        assert!(Cli::try_parse_from(args).is_err());
        let args = ["sensor-hub", "device", "watch", "--toggle-every", "0"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn send_takes_payload_or_random() {
        match cli(&["hub", "send", "--random"]).command {
            Command::Hub {
                action: HubAction::Send { payload, random },
                ..
            } => {
                assert!(random);
                assert_eq!(payload, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["sensor-hub", "hub", "send"]).is_err());
        assert!(Cli::try_parse_from(["sensor-hub", "hub", "send", "{}", "--random"]).is_err());
    }

    #[test]
    fn history_files_default_and_can_be_disabled() {
        let config = Config::default();
        assert_eq!(config.console.history_file, PathBuf::from(".sensor-hub/api-calls.json"));
        let config = Config::from_toml("[genai]\nhistory_file = \"\"").unwrap();
        assert!(crate::history::enabled(&config.genai.history_file).is_none());
    }
}

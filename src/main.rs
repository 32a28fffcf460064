use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use sensor_hub::config::{
    self, AskArgs, Cli, Command, Config, DeviceAction, HistoryArgs, HistoryKind, HubAction, RequestArgs,
};
use sensor_hub::console::{ApiConsole, RequestSpec, ResponseBody};
use sensor_hub::device::{AnalysisKind, DeviceClient, DeviceController, WatchPlan};
use sensor_hub::genai::{ChatSession, GenAiClient, GenerationSettings};
use sensor_hub::hub_client::{self, HubClient};
use sensor_hub::record::Record;
use sensor_hub::types::{ApiCall, Conversation};
use sensor_hub::{analytics, history, server, summary, BoundedLog};
use serde::Serialize;
use serde_json::Value;
use simple_logger::SimpleLogger;
use std::path::Path;
use std::time::Duration;

const RECENT_ANALYSES: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config(&cli)?;
    init_logging(&config.log_level)?;

    match cli.command {
        Command::Serve { .. } => serve(&config).await,
        Command::Hub { action, .. } => hub(&config, action).await,
        Command::Request(args) => request(&config, args).await,
        Command::Ask(args) => ask(&config, args).await,
        Command::Device { action, .. } => device(&config, action).await,
        Command::History { kind } => show_history(&config, kind).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level: LevelFilter = level
        .parse()
        .with_context(|| format!("Invalid log level: {}", level))?;
    SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
        .context("Failed to initialize logger")
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn print_reading(record: &Record) {
    println!("[{}]", record.timestamp());
    for (key, value) in record.fields() {
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {}: {}", title_case(key), shown);
    }
}

async fn serve(config: &Config) -> Result<()> {
    info!(
        "Starting sensor-hub on {} (keeping the last {} readings)",
        config.server.listen_addr(),
        config.server.max_readings
    );
    let log = server::new_log(config.server.max_readings);

    // Spawn console summary task
    let summary_handle = if config.server.summary_interval_secs > 0 {
        let log = log.clone();
        let interval = Duration::from_secs(config.server.summary_interval_secs);
        let port = config.server.port;
        Some(tokio::spawn(async move { summary::run(log, interval, port).await }))
    } else {
        None
    };

    // Stop on Ctrl-C
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    };

    let result = server::run(&config.server, log, shutdown).await;
    if let Some(handle) = summary_handle {
        handle.abort();
    }
    result
}

async fn hub(config: &Config, action: HubAction) -> Result<()> {
    let client = HubClient::new(&config.hub)?;

    match action {
        HubAction::Status => {
            let status = client.status().await.context("API not responding")?;
            println!("API is responding at {}", config.hub.url);
            print_json(&status)?;
        }
        HubAction::Latest => match client.latest().await? {
            Some(latest) => print_json(&latest)?,
            None => println!("No data available"),
        },
        HubAction::Send { payload, .. } => {
            // clap guarantees a payload unless --random was given
            let payload = match payload {
                Some(arg) => hub_client::parse_payload(&arg)?,
                None => hub_client::random_payload(&mut rand::thread_rng()),
            };
            let ack = client.send(&payload).await?;
            println!("Data sent successfully");
            print_json(&ack)?;
        }
        HubAction::Readings { page, per_page } => {
            let page = client.readings(page, per_page).await?;
            print_page(&page)?;
        }
        HubAction::Stats => match client.stats().await? {
            Some(stats) => print_json(&stats)?,
            None => println!("No data available for analytics"),
        },
        HubAction::Activity => {
            let activity: Vec<analytics::HourlyCount> = serde_json::from_value(client.activity().await?)
                .context("Unexpected activity response")?;
            if activity.is_empty() {
                println!("No API activity logs available");
            }
            for bucket in activity {
                println!("{}  {:>5}  {}", bucket.hour, bucket.count, "#".repeat(bucket.count.min(60)));
            }
        }
        HubAction::Export { output } => {
            let csv = client.export_csv().await?;
            let path = output.unwrap_or_else(|| {
                analytics::export_file_name(analytics::SENSOR_EXPORT, &chrono::Local::now()).into()
            });
            tokio::fs::write(&path, csv)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("Saved readings to {}", path.display());
        }
        HubAction::Clear => {
            let result = client.clear().await?;
            println!("All logs cleared ({} removed)", result["removed"]);
        }
    }

    Ok(())
}

fn print_page(page: &Value) -> Result<()> {
    println!(
        "Page {}/{} ({} readings)",
        page["page"], page["total_pages"], page["total"]
    );
    let entries = page["entries"].as_array().context("Unexpected readings response")?;
    for entry in entries.iter().rev() {
        let ts = entry["entry"]["timestamp"].as_str().unwrap_or("-");
        println!("Log #{} - {}", entry["index"], ts);
        println!("  {}", entry["entry"]);
    }
    Ok(())
}

async fn request(config: &Config, args: RequestArgs) -> Result<()> {
    let spec = RequestSpec::parse(
        args.method,
        &args.url,
        args.headers.as_deref(),
        args.query.as_deref(),
        args.body.as_deref(),
    )?;

    // Continue the saved history
    let mut console = ApiConsole::new(&config.console)?;
    let history_path = history::enabled(&config.console.history_file);
    if let Some(path) = history_path {
        console = console.with_history(history::load(path, config.console.history_size).await?);
    }

    let response = console.send(&spec).await?;
    println!("Success! Status Code: {}", response.status);
    match response.body {
        ResponseBody::Json(json) => print_json(&json)?,
        ResponseBody::Text(text) => {
            println!("Response (not JSON):");
            println!("{}", text);
        }
    }

    if let Some(path) = history_path {
        history::save(path, console.history()).await?;
    }
    Ok(())
}

/// A session continuing the saved conversation history, when enabled.
async fn chat_session(config: &Config) -> Result<ChatSession> {
    let client = GenAiClient::new(&config.genai)?;
    let settings = GenerationSettings::from_config(&config.genai)?;
    let session = ChatSession::new(client, settings, config.genai.history_size);

    match history::enabled(&config.genai.history_file) {
        Some(path) => Ok(session.with_history(history::load(path, config.genai.history_size).await?)),
        None => Ok(session),
    }
}

async fn save_conversations(config: &Config, session: &ChatSession) -> Result<()> {
    if let Some(path) = history::enabled(&config.genai.history_file) {
        history::save(path, session.history()).await?;
    }
    Ok(())
}

async fn ask(config: &Config, args: AskArgs) -> Result<()> {
    let mut session = chat_session(config).await?;
    let settings = session.settings();
    info!(
        "Asking {} (temperature {}, max tokens {})",
        settings.model, settings.temperature, settings.max_tokens
    );

    let conversation = session.ask("chat", &args.prompt).await?;
    println!("{}", conversation.response);

    save_conversations(config, &session).await
}

async fn device(config: &Config, action: DeviceAction) -> Result<()> {
    let client = DeviceClient::new(&config.device)?;
    let base_url = client.base_url().to_string();
    let mut controller = DeviceController::new(client, config.device.history_size);

    match action {
        DeviceAction::Status => {
            let status = controller.refresh_status().await;
            println!("Device {}: {:?}", base_url, status);
        }
        DeviceAction::Read => {
            let record = controller.read().await.context("Error reading sensor")?;
            print_reading(record);
        }
        DeviceAction::Set { state } => {
            let event = controller.set_actuator(state).await?;
            println!("Actuator turned {} at {}", state, event.timestamp);
            print_json(&event.response)?;
        }
        DeviceAction::Watch {
            interval,
            samples,
            set,
            toggle_every,
            analysis,
            question,
            export_dir,
        } => {
            // Fail before polling if the analyses cannot run
            let needs_question = question.as_deref().map_or(true, |q| q.trim().is_empty());
            if analysis.contains(&AnalysisKind::Custom) && needs_question {
                bail!("--analysis custom needs --question");
            }
            let mut session = if analysis.is_empty() {
                None
            } else {
                Some(chat_session(config).await?)
            };

            let plan = WatchPlan {
                interval: Duration::from_secs(interval.unwrap_or(config.device.poll_interval_secs)),
                samples,
                initial_state: set,
                toggle_every,
            };
            watch(&mut controller, &plan).await;

            // Export and analyse what this run collected

            if let Some(dir) = export_dir {
                export_histories(&controller, &dir).await?;
            }

            if let Some(session) = session.as_mut() {
                for kind in &analysis {
                    if let Err(e) = summarize(&controller, session, *kind, question.as_deref()).await {
                        error!("{} failed: {}", kind.label(), e);
                    }
                }
                print_recent_analyses(session.history());
                save_conversations(config, session).await?;
            }
        }
    }

    Ok(())
}

async fn watch(controller: &mut DeviceController, plan: &WatchPlan) {
    info!("Polling device every {:?}", plan.interval);
    tokio::select! {
        n = controller.watch(plan, print_reading) => {
            info!("Finished polling: {} successful readings", n);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Polling interrupted");
        }
    }
}

async fn summarize(
    controller: &DeviceController,
    session: &mut ChatSession,
    kind: AnalysisKind,
    question: Option<&str>,
) -> Result<()> {
    let prompt = controller.prompt(kind, question)?;
    let conversation = session.ask(kind.label(), &prompt).await?;
    println!("\n{}\n", kind.label());
    println!("{}", conversation.response);
    Ok(())
}

fn print_recent_analyses(history: &BoundedLog<Conversation>) {
    println!("\nRecent analyses:");
    for conversation in history.tail(RECENT_ANALYSES).rev() {
        println!("  {}  {}", conversation.timestamp, conversation.label);
    }
}

async fn export_histories(controller: &DeviceController, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {:?}", dir))?;
    let now = chrono::Local::now();

    let files = [
        (analytics::SENSOR_EXPORT, controller.readings().len(), controller.sensor_csv()),
        (analytics::ACTUATOR_EXPORT, controller.actuator_events().len(), controller.actuator_csv()?),
    ];
    for (prefix, rows, csv) in files {
        if rows == 0 {
            println!("No {} to export", prefix.replace('_', " "));
            continue;
        }
        let path = dir.join(analytics::export_file_name(prefix, &now));
        tokio::fs::write(&path, csv)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("Saved {} rows to {}", rows, path.display());
    }
    Ok(())
}

async fn show_history(config: &Config, kind: HistoryKind) -> Result<()> {
    match kind {
        HistoryKind::ApiCalls(args) => {
            let path = history_path(&config.console.history_file)?;
            let log: BoundedLog<ApiCall> = history::load(path, config.console.history_size).await?;
            list_history(path, log, &args, |call| {
                println!("[{}] {} {} -> {}", call.timestamp, call.method, call.url, call.status_code);
                println!("  {}", call.response);
            })
            .await
        }
        HistoryKind::Conversations(args) => {
            let path = history_path(&config.genai.history_file)?;
            let log: BoundedLog<Conversation> = history::load(path, config.genai.history_size).await?;
            list_history(path, log, &args, |c| {
                println!(
                    "[{}] {} ({}, temperature {}, max tokens {})",
                    c.timestamp, c.label, c.model, c.temperature, c.max_tokens
                );
                println!("  Q: {}", c.prompt);
                println!("  A: {}", c.response);
            })
            .await
        }
    }
}

fn history_path(configured: &Path) -> Result<&Path> {
    history::enabled(configured).context("History is disabled (history_file is empty)")
}

/// Newest entries first, or clears the file with `--clear`.
async fn list_history<T: Serialize>(
    path: &Path,
    mut log: BoundedLog<T>,
    args: &HistoryArgs,
    print: impl Fn(&T),
) -> Result<()> {
    if args.clear {
        let removed = log.clear();
        history::save(path, &log).await?;
        println!("Cleared {} entries from {}", removed, path.display());
        return Ok(());
    }

    let entries: Vec<&T> = log.tail(args.last).collect();
    if entries.is_empty() {
        println!("No history yet");
        return Ok(());
    }
    if args.json {
        return print_json(&entries);
    }
    for entry in entries.into_iter().rev() {
        print(entry);
    }
    Ok(())
}

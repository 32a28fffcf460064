//! JSON files that carry the bounded API-call and conversation histories
//! across CLI runs.
//!
//! A missing file is an empty history. Saves go to a `.tmp` sibling first and
//! are renamed over the target, so an interrupted run never leaves a torn file.

use crate::error::{HubError, Result};
use crate::types::BoundedLog;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// `None` when history persistence is switched off (empty path).
pub fn enabled(path: &Path) -> Option<&Path> {
    (!path.as_os_str().is_empty()).then_some(path)
}

pub async fn load<T: DeserializeOwned>(path: &Path, capacity: usize) -> Result<BoundedLog<T>> {
    let data = match fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No history at {}, starting fresh", path.display());
            return Ok(BoundedLog::new(capacity));
        }
        Err(e) => return Err(e.into()),
    };

    let entries: Vec<T> = serde_json::from_str(&data)
        .map_err(|e| HubError::ConfigError(format!("History file {} is malformed: {}", path.display(), e)))?;
    Ok(BoundedLog::from_entries(capacity, entries))
}

pub async fn save<T: Serialize>(path: &Path, log: &BoundedLog<T>) -> Result<()> {
    let entries: Vec<&T> = log.iter().collect();
    let json = serde_json::to_string_pretty(&entries)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;

    debug!("Saved {} history entries to {}", log.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ApiCall;
    use serde_json::json;
    use tempfile::tempdir;

    fn call(n: u16) -> ApiCall {
        ApiCall {
            timestamp: "2024-02-01 10:00:00".into(),
            method: "GET".into(),
            url: format!("http://api/items/{}", n),
            status_code: 200,
            response: json!({ "id": n }),
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let log: BoundedLog<ApiCall> = load(&dir.path().join("none.json"), 5).await.unwrap();
        assert!(log.is_empty());
        assert_eq!(log.capacity(), 5);
    }

    #[tokio::test]
    async fn saved_history_reloads_newest_first_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("calls.json");

        let log = BoundedLog::from_entries(10, (1..=4).map(call));
        save(&path, &log).await.unwrap();
        assert!(!dir.path().join("nested").join("calls.json.tmp").exists());

        let reloaded: BoundedLog<ApiCall> = load(&path, 3).await.unwrap();
        let urls: Vec<_> = reloaded.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["http://api/items/2", "http://api/items/3", "http://api/items/4"]);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calls.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load::<ApiCall>(&path, 3).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn empty_path_disables_history() {
        assert!(enabled(Path::new("")).is_none());
        assert!(enabled(Path::new("calls.json")).is_some());
    }
}
